//! IPC listener for the broker side
//!
//! Creates the Unix Domain Socket and serves broker requests on it.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::messages::{BrokerRequest, BrokerResponse};
use super::{MAX_MESSAGE_SIZE, get_socket_path};
use crate::broker::Broker;
use crate::emitter::Emitter;
use crate::error::Registration;

/// Create and bind a listener at the default socket path
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener() -> Result<(UnixListener, PathBuf)> {
    let socket_path = get_socket_path();
    create_listener_at(&socket_path)
}

/// Create a listener at a specific path
pub fn create_listener_at(socket_path: &PathBuf) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener: creating IPC socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    debug!(?socket_path, "create_listener: socket bound successfully");

    Ok((listener, socket_path.clone()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &PathBuf) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one request line from the stream
pub async fn read_request(stream: &mut UnixStream) -> Result<BrokerRequest> {
    // One byte over the limit is enough to detect an oversized line
    let mut reader = BufReader::new(stream).take(MAX_MESSAGE_SIZE as u64 + 1);
    let mut line = String::new();

    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC message")?;

    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: more than {} bytes", MAX_MESSAGE_SIZE));
    }

    if line.is_empty() {
        return Err(eyre::eyre!("Empty message received"));
    }

    let request: BrokerRequest = serde_json::from_str(line.trim()).context("Failed to parse IPC message")?;
    debug!(?request, "read_request: parsed request");

    Ok(request)
}

/// Send a response on the stream
pub async fn send_response(stream: &mut UnixStream, response: BrokerResponse) -> Result<()> {
    let response_json = serde_json::to_string(&response).context("Failed to serialize response")?;
    stream
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(?response, "send_response: sent response");
    Ok(())
}

/// Serve `broker` on `listener` until a client requests shutdown
///
/// Every connection is handled in its own task, so a client blocked on a
/// round never holds up the others.
pub async fn serve(broker: Broker, listener: UnixListener) -> Result<()> {
    info!(broker_id = %broker.id(), "Serving broker over IPC");
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(handle_connection(broker.clone(), stream, Arc::clone(&shutdown_tx)));
                }
                Err(e) => warn!(error = %e, "Failed to accept IPC connection"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "IPC connection task failed");
                }
            }
            _ = shutdown_rx.changed() => {
                info!(broker_id = %broker.id(), "Shutdown requested, stopping IPC server");
                break;
            }
        }
    }

    connections.shutdown().await;
    Ok(())
}

async fn handle_connection(broker: Broker, mut stream: UnixStream, shutdown_tx: Arc<watch::Sender<bool>>) {
    let response = match read_request(&mut stream).await {
        Ok(BrokerRequest::Shutdown) => {
            if let Err(e) = send_response(&mut stream, BrokerResponse::Ok).await {
                warn!(error = %e, "Failed to acknowledge shutdown");
            }
            shutdown_tx.send_replace(true);
            return;
        }
        Ok(request) => handle_request(&broker, request).await,
        Err(e) => {
            warn!(error = %e, "Invalid IPC request");
            BrokerResponse::Error { message: e.to_string() }
        }
    };

    if let Err(e) = send_response(&mut stream, response).await {
        warn!(error = %e, "Failed to send IPC response");
    }
}

/// Apply one request to the broker
pub(crate) async fn handle_request(broker: &Broker, request: BrokerRequest) -> BrokerResponse {
    match request {
        BrokerRequest::RegisterEmitter { id } => {
            if let Some(id) = id.as_deref()
                && broker.emitter(id).await.is_some()
            {
                return BrokerResponse::Registered { id: id.to_string() };
            }
            let emitter = Emitter::with_id(id.unwrap_or_default());
            match broker.register_emitter(&emitter).await {
                Registration::Registered | Registration::AlreadyRegistered => BrokerResponse::Registered {
                    id: emitter.id().to_string(),
                },
                Registration::Rejected(reason) => BrokerResponse::Rejected {
                    reason: reason.to_string(),
                },
            }
        }
        BrokerRequest::UnregisterEmitter { id } => match broker.unregister_emitter(&id).await {
            Some(_) => BrokerResponse::Ok,
            None => BrokerResponse::Error {
                message: format!("Unknown emitter: {}", id),
            },
        },
        BrokerRequest::Emit { id } => {
            let Some(emitter) = broker.emitter(&id).await else {
                return BrokerResponse::Error {
                    message: format!("Unknown emitter: {}", id),
                };
            };
            match emitter.emit().await {
                Ok(success) => BrokerResponse::RoundFinished { success },
                Err(e) => BrokerResponse::Error { message: e.to_string() },
            }
        }
        BrokerRequest::Status => BrokerResponse::Status {
            metrics: broker.metrics().await,
            session_open: broker.is_session_open().await,
        },
        BrokerRequest::Ping => BrokerResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        BrokerRequest::Shutdown => BrokerResponse::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_listener_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("subdir").join("broker.sock");

        let (_, path) = create_listener_at(&socket_path).unwrap();
        assert_eq!(path, socket_path);
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_create_listener_removes_stale_socket() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("broker.sock");
        std::fs::write(&socket_path, "stale").unwrap();

        assert!(create_listener_at(&socket_path).is_ok());
    }

    #[test]
    fn test_cleanup_socket_removes_file() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("broker.sock");
        std::fs::write(&socket_path, "test").unwrap();

        cleanup_socket(&socket_path);
        assert!(!socket_path.exists());
    }

    #[test]
    fn test_cleanup_socket_handles_missing_file() {
        let temp = TempDir::new().unwrap();
        cleanup_socket(&temp.path().join("nonexistent.sock"));
    }

    #[tokio::test]
    async fn test_handle_register_and_emit() {
        let broker = Broker::with_id("b", Duration::from_millis(100));

        let response = handle_request(&broker, BrokerRequest::RegisterEmitter { id: Some("e1".into()) }).await;
        assert_eq!(response, BrokerResponse::Registered { id: "e1".into() });

        // Registering the same id again is idempotent
        let response = handle_request(&broker, BrokerRequest::RegisterEmitter { id: Some("e1".into()) }).await;
        assert_eq!(response, BrokerResponse::Registered { id: "e1".into() });
        assert_eq!(broker.emitter_ids().await, vec!["e1".to_string()]);

        let response = handle_request(&broker, BrokerRequest::Emit { id: "e1".into() }).await;
        assert_eq!(response, BrokerResponse::RoundFinished { success: true });
    }

    #[tokio::test]
    async fn test_handle_unknown_emitter() {
        let broker = Broker::new(Duration::from_millis(100));
        let response = handle_request(&broker, BrokerRequest::Emit { id: "ghost".into() }).await;
        assert!(matches!(response, BrokerResponse::Error { .. }));

        let response = handle_request(&broker, BrokerRequest::UnregisterEmitter { id: "ghost".into() }).await;
        assert!(matches!(response, BrokerResponse::Error { .. }));
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("big.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await
        });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        let big = format!("{{\"type\":\"Emit\",\"id\":\"{}\"}}\n", "x".repeat(2048));
        client.write_all(big.as_bytes()).await.unwrap();

        let result = server.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        use super::super::client::BrokerClient;

        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let broker = Broker::with_id("served", Duration::from_millis(200));
        let server = tokio::spawn(serve(broker.clone(), listener));

        let client = BrokerClient::with_socket_path(socket_path);
        assert_eq!(client.ping().await.unwrap(), env!("CARGO_PKG_VERSION"));

        let id = client.register(Some("remote")).await.unwrap();
        assert_eq!(id, "remote");
        assert!(client.emit("remote").await.unwrap());

        let (metrics, session_open) = client.status().await.unwrap();
        assert!(!session_open);
        assert_eq!(metrics.rounds_succeeded, 1);

        client.unregister("remote").await.unwrap();
        assert!(broker.emitter_ids().await.is_empty());

        client.shutdown().await.unwrap();
        server.await.unwrap().unwrap();
    }
}
