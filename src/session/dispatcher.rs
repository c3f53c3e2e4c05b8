//! Per-request orchestration: acquire, serialize, bound by a deadline, release.

use crate::session::registry::SessionRegistry;
use crate::utils::{Result, ServiceError};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Reply to one chat turn
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Reply {
    pub id: String,
    pub reply: String,
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    timeout: Duration,
    workers: Arc<Semaphore>,
    accepting: AtomicBool,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, timeout: Duration, max_workers: usize) -> Self {
        Self {
            registry,
            timeout,
            workers: Arc::new(Semaphore::new(max_workers)),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(ServiceError::ShuttingDown)
        }
    }

    /// Runs one turn on the session, creating it if needed.
    ///
    /// The turn runs on a worker task holding the session lock and the in-flight count.
    /// A worker slot is taken only once the lock is held, so turns waiting on a busy
    /// session never starve other sessions of workers.
    /// If the deadline passes first, this returns [`ServiceError::Timeout`] but the turn
    /// is **not** cancelled: it keeps running in the background, still holding the lock,
    /// and the next turn on the same session waits for it. A session is never run twice
    /// at once, at the price of a slow turn occupying its slot past the caller's timeout.
    pub async fn dispatch(&self, session_id: Option<&str>, message: impl Into<String>) -> Result<Reply> {
        self.ensure_accepting()?;
        let message = message.into();

        let (flight, id) = self.registry.acquire(session_id).await?;
        debug!(session_id = %id, in_flight = flight.handle().in_flight(), "Dispatching turn");

        let workers = Arc::clone(&self.workers);
        let worker = tokio::spawn(async move {
            let handle = Arc::clone(flight.handle());

            // Permit only once the lock is held
            let result = handle
                .with_lock(|conversation| {
                    handle.touch();
                    Box::pin(async move {
                        let _permit = workers
                            .acquire_owned()
                            .await
                            .context("worker pool closed")?;
                        conversation.send_and_run(&message).await
                    })
                })
                .await;

            drop(flight);
            result
        });

        match tokio::time::timeout(self.timeout, worker).await {
            Ok(Ok(Ok(reply))) => Ok(Reply { id, reply }),
            Ok(Ok(Err(e))) => {
                warn!(session_id = %id, error = %e, "Turn failed");
                Err(ServiceError::resource(id, format!("{:#}", e)))
            }
            Ok(Err(join_error)) => {
                error!(session_id = %id, error = %join_error, "Turn worker panicked");
                Err(ServiceError::resource(id, join_error.to_string()))
            }
            Err(_) => {
                warn!(
                    session_id = %id,
                    timeout_secs = self.timeout.as_secs(),
                    "Turn exceeded deadline, continuing in background"
                );
                Err(ServiceError::timeout(id, self.timeout.as_secs()))
            }
        }
    }

    /// Stops accepting requests and closes every session, running or not.
    ///
    /// Only the first call drains; later calls return 0.
    pub async fn shutdown(&self) -> usize {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return 0;
        }
        info!("Dispatcher draining, no new requests accepted");
        self.registry.close_all().await
    }
}
