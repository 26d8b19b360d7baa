//! IPC client for communicating with the pyps daemon.

use crate::codec::{decode, read_frame, write_message};
use crate::{IpcError, Request, Response, ResponseData};
use pyps_indexer::{ProjectDetail, ProjectList, Stats, SubIndexStats, SyncReport};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;

/// Default socket path
const DEFAULT_SOCKET_PATH: &str = "/tmp/pyps.sock";

/// Connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Request/response timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconciliation can take as long as the tree is large
const SYNC_TIMEOUT: Duration = Duration::from_secs(600);

/// IPC client for communicating with the daemon
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a client with default socket path
    pub fn new() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }

    /// Create a client with custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Connect with custom socket path
    pub async fn connect_to<P: AsRef<Path>>(socket_path: P) -> Result<ConnectedClient, IpcError> {
        Self::with_socket_path(socket_path).do_connect().await
    }

    async fn do_connect(&self) -> Result<ConnectedClient, IpcError> {
        if !self.socket_path.exists() {
            return Err(IpcError::DaemonNotRunning);
        }

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| IpcError::ConnectionFailed("Connection timed out".to_string()))??;

        Ok(ConnectedClient { stream })
    }

    /// Check if daemon is running
    pub fn is_daemon_running(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send a request and wait for response (opens new connection)
    pub async fn request(&self, request: Request) -> Result<Response, IpcError> {
        let mut client = self.do_connect().await?;
        client.send(request).await
    }

    /// Send a request and unwrap the data payload
    async fn request_data(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<ResponseData, IpcError> {
        let mut client = self.do_connect().await?;
        let response = client.send_with_timeout(request, timeout).await?;

        match response {
            Response::Ok { data: Some(data) } => Ok(data),
            Response::Error { code, message } => Err(IpcError::Remote { code, message }),
            _ => Err(IpcError::UnexpectedResponse),
        }
    }

    pub async fn list_projects(&self, sub_index: &str) -> Result<ProjectList, IpcError> {
        let request = Request::ListProjects {
            sub_index: sub_index.to_string(),
        };
        match self.request_data(request, REQUEST_TIMEOUT).await? {
            ResponseData::Projects { list } => Ok(list),
            _ => Err(IpcError::UnexpectedResponse),
        }
    }

    pub async fn project_detail(
        &self,
        project: &str,
        sub_index: &str,
    ) -> Result<ProjectDetail, IpcError> {
        let request = Request::ProjectDetail {
            project: project.to_string(),
            sub_index: sub_index.to_string(),
        };
        match self.request_data(request, REQUEST_TIMEOUT).await? {
            ResponseData::Project { detail } => Ok(detail),
            _ => Err(IpcError::UnexpectedResponse),
        }
    }

    pub async fn metadata(&self, filename: &str, sub_index: &str) -> Result<Vec<u8>, IpcError> {
        let request = Request::Metadata {
            filename: filename.to_string(),
            sub_index: sub_index.to_string(),
        };
        match self.request_data(request, REQUEST_TIMEOUT).await? {
            ResponseData::Metadata { content } => Ok(content),
            _ => Err(IpcError::UnexpectedResponse),
        }
    }

    pub async fn stats(&self) -> Result<Stats, IpcError> {
        match self.request_data(Request::Stats, REQUEST_TIMEOUT).await? {
            ResponseData::Stats { stats } => Ok(stats),
            _ => Err(IpcError::UnexpectedResponse),
        }
    }

    pub async fn stats_per_sub_index(&self) -> Result<Vec<SubIndexStats>, IpcError> {
        match self
            .request_data(Request::StatsPerSubIndex, REQUEST_TIMEOUT)
            .await?
        {
            ResponseData::SubIndexStats { entries } => Ok(entries),
            _ => Err(IpcError::UnexpectedResponse),
        }
    }

    /// Ask the daemon to reconcile now.
    pub async fn sync(&self) -> Result<SyncReport, IpcError> {
        match self.request_data(Request::Sync, SYNC_TIMEOUT).await? {
            ResponseData::Synced { report } => Ok(report),
            _ => Err(IpcError::UnexpectedResponse),
        }
    }

    /// Get daemon status
    pub async fn get_status(&self) -> Result<ResponseData, IpcError> {
        self.request_data(Request::Status, REQUEST_TIMEOUT).await
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected IPC client that can send requests and receive responses
pub struct ConnectedClient {
    stream: UnixStream,
}

impl ConnectedClient {
    /// Send a request and wait for response
    pub async fn send(&mut self, request: Request) -> Result<Response, IpcError> {
        self.send_with_timeout(request, REQUEST_TIMEOUT).await
    }

    async fn send_with_timeout(
        &mut self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, IpcError> {
        tokio::time::timeout(timeout, self.do_send(request))
            .await
            .map_err(|_| IpcError::ConnectionFailed("Request timed out".to_string()))?
    }

    async fn do_send(&mut self, request: Request) -> Result<Response, IpcError> {
        write_message(&mut self.stream, &request).await?;

        let body = read_frame(&mut self.stream).await?.ok_or_else(|| {
            IpcError::ConnectionFailed("Daemon closed the connection".to_string())
        })?;

        decode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorCode, IpcServer, RequestHandler};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct TestHandler;

    #[async_trait]
    impl RequestHandler for TestHandler {
        async fn handle(&self, request: Request) -> Response {
            match request {
                Request::Ping => Response::ok_with(ResponseData::Pong { timestamp: 0 }),
                Request::Stats => Response::ok_with(ResponseData::Stats {
                    stats: Stats {
                        distributions: 3,
                        projects: 2,
                        sub_indexes: 2,
                    },
                }),
                Request::ListProjects { .. } => {
                    Response::error(ErrorCode::NotFound, "no projects")
                }
                _ => Response::ack(),
            }
        }
    }

    async fn start_server(socket_path: &Path) {
        let server = IpcServer::new(socket_path, Arc::new(TestHandler))
            .await
            .unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }

    #[tokio::test]
    async fn test_client_connect_no_daemon() {
        let client = IpcClient::with_socket_path("/tmp/nonexistent_pyps_socket_12345.sock");
        let result = client.do_connect().await;
        assert!(matches!(result, Err(IpcError::DaemonNotRunning)));
        assert!(!client.is_daemon_running());
    }

    #[tokio::test]
    async fn test_client_default() {
        let client = IpcClient::default();
        assert_eq!(client.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[tokio::test]
    async fn test_client_connect_and_ping() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start_server(&socket_path).await;

        let client = IpcClient::with_socket_path(&socket_path);
        let response = client.request(Request::Ping).await.unwrap();

        assert!(matches!(
            response,
            Response::Ok {
                data: Some(ResponseData::Pong { .. })
            }
        ));
    }

    #[tokio::test]
    async fn test_client_stats() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start_server(&socket_path).await;

        let client = IpcClient::with_socket_path(&socket_path);
        let stats = client.stats().await.unwrap();
        assert_eq!(stats.distributions, 3);
    }

    #[tokio::test]
    async fn test_client_remote_error() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start_server(&socket_path).await;

        let client = IpcClient::with_socket_path(&socket_path);
        let err = client.list_projects("").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_client_unexpected_response() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start_server(&socket_path).await;

        let client = IpcClient::with_socket_path(&socket_path);
        let err = client.stats_per_sub_index().await.unwrap_err();
        assert!(matches!(err, IpcError::UnexpectedResponse));
    }

    #[tokio::test]
    async fn test_connected_client_reuses_connection() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start_server(&socket_path).await;

        let mut client = IpcClient::connect_to(&socket_path).await.unwrap();
        for _ in 0..3 {
            let response = client.send(Request::Ping).await.unwrap();
            assert!(matches!(response, Response::Ok { .. }));
        }
    }
}
