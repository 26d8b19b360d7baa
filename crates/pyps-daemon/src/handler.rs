//! Request handler for daemon IPC.

use async_trait::async_trait;
use pyps_core::{CoreError, IndexContext};
use pyps_ipc::{ErrorCode, Request, RequestHandler, Response, ResponseData};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

/// Handles incoming IPC requests
pub struct DaemonHandler {
    context: Arc<IndexContext>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
    requests_total: AtomicU64,
    shutting_down: AtomicBool,
}

impl DaemonHandler {
    /// Create a new handler
    pub fn new(
        context: Arc<IndexContext>,
        shutdown_tx: broadcast::Sender<()>,
        start_time: Instant,
    ) -> Self {
        Self {
            context,
            shutdown_tx,
            start_time,
            requests_total: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Get uptime in seconds
    fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Map a context failure onto the wire error.
fn error_response(error: CoreError) -> Response {
    match error {
        CoreError::NotFound(message) => Response::error(ErrorCode::NotFound, message),
        CoreError::NotCanonical { canonical } => Response::not_canonical(canonical),
        other => {
            tracing::error!(error = %other, "Request failed");
            Response::error(ErrorCode::InternalError, other.to_string())
        }
    }
}

#[async_trait]
impl RequestHandler for DaemonHandler {
    async fn handle(&self, request: Request) -> Response {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if self.shutting_down.load(Ordering::SeqCst) && request != Request::Ping {
            return Response::error(ErrorCode::ShuttingDown, "Daemon is shutting down");
        }

        match request {
            Request::Ping => Response::ok_with(ResponseData::Pong {
                timestamp: chrono::Utc::now().timestamp(),
            }),

            Request::Status => Response::ok_with(ResponseData::Status {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.uptime_secs(),
                base_dir: self.context.base_dir(),
                watching: self.context.is_watching().await,
                last_sync: self.context.last_sync().await.map(|t| t.to_rfc3339()),
                requests_total: self.requests_total.load(Ordering::Relaxed),
            }),

            Request::ListProjects { sub_index } => {
                match self.context.list_projects(&sub_index).await {
                    Ok(list) => Response::ok_with(ResponseData::Projects { list }),
                    Err(e) => error_response(e),
                }
            }

            Request::ProjectDetail { project, sub_index } => {
                match self.context.project_detail(&project, &sub_index).await {
                    Ok(detail) => Response::ok_with(ResponseData::Project { detail }),
                    Err(e) => error_response(e),
                }
            }

            Request::Metadata {
                filename,
                sub_index,
            } => match self.context.metadata(&filename, &sub_index).await {
                Ok(content) => Response::ok_with(ResponseData::Metadata { content }),
                Err(e) => error_response(e),
            },

            Request::Stats => match self.context.stats().await {
                Ok(stats) => Response::ok_with(ResponseData::Stats { stats }),
                Err(e) => error_response(e),
            },

            Request::StatsPerSubIndex => match self.context.stats_per_sub_index().await {
                Ok(entries) => Response::ok_with(ResponseData::SubIndexStats { entries }),
                Err(e) => error_response(e),
            },

            Request::Sync => match self.context.sync().await {
                Ok(report) => Response::ok_with(ResponseData::Synced { report }),
                Err(e) => error_response(e),
            },

            Request::Shutdown => {
                tracing::info!("Shutdown requested via IPC");
                self.shutting_down.store(true, Ordering::SeqCst);
                let _ = self.shutdown_tx.send(());
                Response::ack()
            }
        }
    }
}
