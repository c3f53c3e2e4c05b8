//! Resource handle: one conversation plus the state needed to share it safely

use crate::conversation::Conversation;
use crate::session::policy::HandleSnapshot;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Owns a conversation for its whole lifetime.
///
/// The conversation is only reachable through [`SessionHandle::with_lock`], which
/// serializes turns. `last_used` and `in_flight` have their own synchronization so an
/// eviction scan never waits on a running turn.
pub struct SessionHandle {
    id: String,
    conversation: Box<dyn Conversation>,
    lock: tokio::sync::Mutex<()>,
    last_used: Mutex<Instant>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
    seq: u64,
}

impl SessionHandle {
    pub fn new(id: String, conversation: Box<dyn Conversation>, seq: u64) -> Self {
        Self {
            id,
            conversation,
            lock: tokio::sync::Mutex::new(()),
            last_used: Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            seq,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Insertion order within the registry
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks one operation as running. The count drops when the guard is dropped,
    /// on every path including panics.
    pub fn enter_flight(self: &Arc<Self>) -> FlightGuard {
        let previous = self.in_flight.fetch_add(1, Ordering::AcqRel);
        debug!(session_id = %self.id, in_flight = previous + 1, "Entered flight");
        FlightGuard {
            handle: Arc::clone(self),
        }
    }

    fn exit_flight(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "exit_flight without matching enter_flight");
        debug!(session_id = %self.id, in_flight = previous.saturating_sub(1), "Exited flight");
    }

    /// Runs `f` against the conversation while holding the session lock.
    ///
    /// The lock is released when `f`'s future completes or fails.
    pub async fn with_lock<T, F>(&self, f: F) -> T
    where
        F: for<'a> FnOnce(&'a dyn Conversation) -> BoxFuture<'a, T>,
    {
        let _guard = self.lock.lock().await;
        f(self.conversation.as_ref()).await
    }

    /// Closes the conversation once. Later calls do nothing; failures are logged.
    ///
    /// Does not take the session lock: shutdown closes conversations that still
    /// have a turn running.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        match self.conversation.close().await {
            Ok(()) => info!(session_id = %self.id, "Session closed"),
            Err(e) => warn!(session_id = %self.id, error = %e, "Failed to close conversation"),
        }
    }

    pub fn snapshot(&self) -> HandleSnapshot {
        HandleSnapshot {
            id: self.id.clone(),
            last_used: self.last_used(),
            in_flight: self.in_flight(),
            seq: self.seq,
        }
    }
}

/// Keeps a handle counted as in flight until dropped.
pub struct FlightGuard {
    handle: Arc<SessionHandle>,
}

impl FlightGuard {
    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.handle.exit_flight();
    }
}
