//! IPC client for talking to a served broker

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::messages::{BrokerRequest, BrokerResponse};
use super::{MAX_MESSAGE_SIZE, get_socket_path};
use crate::broker::BrokerMetrics;

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a broker served over IPC
#[derive(Debug, Clone)]
pub struct BrokerClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for BrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(get_socket_path())
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    ///
    /// `emit` waits for the whole round, so this must exceed the broker's
    /// round deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the broker socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Register an emitter on the broker, returning its id
    pub async fn register(&self, id: Option<&str>) -> Result<String> {
        debug!(?id, "BrokerClient::register: called");
        let request = BrokerRequest::RegisterEmitter {
            id: id.map(str::to_string),
        };
        match self.send_request(request).await? {
            BrokerResponse::Registered { id } => Ok(id),
            BrokerResponse::Rejected { reason } => Err(eyre::eyre!("Registration rejected: {}", reason)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn unregister(&self, id: &str) -> Result<()> {
        debug!(%id, "BrokerClient::unregister: called");
        let request = BrokerRequest::UnregisterEmitter { id: id.to_string() };
        match self.send_request(request).await? {
            BrokerResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Signal completion for `id` and return the round outcome
    pub async fn emit(&self, id: &str) -> Result<bool> {
        debug!(%id, "BrokerClient::emit: called");
        match self.send_request(BrokerRequest::Emit { id: id.to_string() }).await? {
            BrokerResponse::RoundFinished { success } => Ok(success),
            other => Err(unexpected(other)),
        }
    }

    /// Broker counters and whether a round is open
    pub async fn status(&self) -> Result<(BrokerMetrics, bool)> {
        match self.send_request(BrokerRequest::Status).await? {
            BrokerResponse::Status { metrics, session_open } => Ok((metrics, session_open)),
            other => Err(unexpected(other)),
        }
    }

    /// Check if the broker is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("BrokerClient::ping: called");
        match self.send_request(BrokerRequest::Ping).await? {
            BrokerResponse::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the server to stop
    pub async fn shutdown(&self) -> Result<()> {
        debug!("BrokerClient::shutdown: called");
        match self.send_request(BrokerRequest::Shutdown).await? {
            BrokerResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn send_request(&self, request: BrokerRequest) -> Result<BrokerResponse> {
        debug!(?self.socket_path, ?request, "BrokerClient: sending request");

        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to broker socket")?;

        let request_json = serde_json::to_string(&request).context("Failed to serialize request")?;
        if request_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", request_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(request_json.as_bytes())
                .await
                .context("Failed to write request")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let mut reader = BufReader::new(&mut stream).take(MAX_MESSAGE_SIZE as u64 + 1);
        let mut response_line = String::new();

        tokio::time::timeout(self.timeout, async {
            let bytes_read = reader
                .read_line(&mut response_line)
                .await
                .context("Failed to read response")?;

            if bytes_read > MAX_MESSAGE_SIZE {
                return Err(eyre::eyre!("Response too large: {} bytes", bytes_read));
            }

            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        let response: BrokerResponse =
            serde_json::from_str(response_line.trim()).context("Failed to parse broker response")?;

        debug!(?response, "BrokerClient: received response");
        Ok(response)
    }
}

fn unexpected(response: BrokerResponse) -> eyre::Error {
    match response {
        BrokerResponse::Error { message } => eyre::eyre!("Broker error: {}", message),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}
