//! Identity generation for emitters, consumers and brokers
//!
//! Every handle carries an opaque string id. Callers may supply their own;
//! otherwise a time-ordered UUIDv7 is generated.

use tracing::debug;

/// Generate a fresh opaque identifier
pub fn generate_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Keep a caller-supplied id, or generate one when it is absent or empty
pub fn resolve_id(id: Option<String>) -> String {
    match id {
        Some(id) if !id.is_empty() => id,
        _ => {
            let id = generate_id();
            debug!(%id, "resolve_id: generated id");
            id
        }
    }
}
