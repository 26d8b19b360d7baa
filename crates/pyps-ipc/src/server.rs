//! Unix socket IPC server for the pyps daemon.
//!
//! Handles incoming connections and dispatches requests to handlers. A
//! connection may carry several requests; each gets one response frame.

use crate::codec::{decode, read_frame, write_message};
use crate::{ErrorCode, IpcError, Request, Response};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};

/// How long an open connection may stay silent between requests
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Unix socket IPC server
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    handler: Arc<dyn RequestHandler>,
}

impl IpcServer {
    /// Create a new IPC server bound to the given socket path
    pub async fn new<P: AsRef<Path>>(
        socket_path: P,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, IpcError> {
        let socket_path = socket_path.as_ref();

        // Remove stale socket file if it exists
        if socket_path.exists() {
            let _ = std::fs::remove_file(socket_path);
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)?;

        // Set socket permissions (user only - 0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!(socket = %socket_path.display(), "IPC server listening");

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            handler,
        })
    }

    /// Path the server is bound to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Run the server, accepting connections until the task is dropped
    pub async fn run(&self) -> Result<(), IpcError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, handler).await {
                            tracing::debug!(error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept error");
                }
            }
        }
    }

    /// Serve requests on one connection until the peer closes it
    async fn handle_connection(
        mut stream: UnixStream,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), IpcError> {
        loop {
            let Some(body) = tokio::time::timeout(IDLE_TIMEOUT, read_frame(&mut stream)).await??
            else {
                return Ok(());
            };

            let request = match decode::<Request>(&body) {
                Ok(request) => request,
                Err(e) => {
                    let response = Response::error(
                        ErrorCode::InvalidRequest,
                        format!("Failed to parse request: {}", e),
                    );
                    write_message(&mut stream, &response).await?;
                    return Err(e);
                }
            };

            tracing::debug!(request = ?request, "Received request");

            let response = handler.handle(request).await;
            write_message(&mut stream, &response).await?;
        }
    }
}

/// Trait for handling incoming requests
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a request and return a response
    async fn handle(&self, request: Request) -> Response;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseData;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    struct TestHandler;

    #[async_trait]
    impl RequestHandler for TestHandler {
        async fn handle(&self, request: Request) -> Response {
            match request {
                Request::Ping => Response::ok_with(ResponseData::Pong {
                    timestamp: chrono::Utc::now().timestamp(),
                }),
                _ => Response::ack(),
            }
        }
    }

    async fn start(socket_path: &Path) {
        let server = IpcServer::new(socket_path, Arc::new(TestHandler))
            .await
            .unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }

    #[tokio::test]
    async fn test_server_ping() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("pyps.sock");
        start(&socket_path).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        write_message(&mut stream, &Request::Ping).await.unwrap();

        let body = read_frame(&mut stream).await.unwrap().unwrap();
        let response: Response = decode(&body).unwrap();
        assert!(
            matches!(
                response,
                Response::Ok {
                    data: Some(ResponseData::Pong { .. })
                }
            ),
            "Expected Pong response, got {:?}",
            response
        );
    }

    #[tokio::test]
    async fn test_server_multiple_requests_per_connection() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("pyps.sock");
        start(&socket_path).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        for _ in 0..3 {
            write_message(&mut stream, &Request::Stats).await.unwrap();
            let body = read_frame(&mut stream).await.unwrap().unwrap();
            assert_eq!(decode::<Response>(&body).unwrap(), Response::Ack);
        }
    }

    #[tokio::test]
    async fn test_server_rejects_garbage() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("pyps.sock");
        start(&socket_path).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let body = b"not a request";
        stream
            .write_all(&(body.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(body).await.unwrap();

        let body = read_frame(&mut stream).await.unwrap().unwrap();
        match decode::<Response>(&body).unwrap() {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidRequest),
            other => panic!("Expected error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_replaces_stale_socket() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("run/pyps.sock");
        std::fs::create_dir_all(socket_path.parent().unwrap()).unwrap();
        std::fs::write(&socket_path, b"stale").unwrap();

        let server = IpcServer::new(&socket_path, Arc::new(TestHandler))
            .await
            .unwrap();
        assert_eq!(server.socket_path(), socket_path.as_path());
    }
}
