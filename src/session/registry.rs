use crate::config::Config;
use crate::conversation::ConversationFactory;
use crate::session::handle::{FlightGuard, SessionHandle};
use crate::session::policy::{EvictionPolicy, HandleSnapshot};
use crate::utils::{Result, ServiceError};
use lru::LruCache;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sessions in recency order, O(1) promotion and removal. Unbounded: capacity is
/// [`EvictionPolicy`]'s call.
struct Entries {
    cache: LruCache<String, Arc<SessionHandle>>,
    draining: bool,
}

impl Default for Entries {
    fn default() -> Self {
        Self {
            cache: LruCache::unbounded(),
            draining: false,
        }
    }
}

impl Entries {
    /// Marks `id` most recently used and returns its handle
    fn promote(&mut self, id: &str) -> Option<Arc<SessionHandle>> {
        self.cache.get(id).cloned()
    }

    /// Read without changing recency
    fn peek(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.cache.peek(id).cloned()
    }

    fn insert(&mut self, id: String, handle: Arc<SessionHandle>) {
        self.cache.put(id, handle);
    }

    fn remove(&mut self, id: &str) -> Option<Arc<SessionHandle>> {
        self.cache.pop(id)
    }

    /// Least recently used first
    fn ids(&self) -> Vec<String> {
        self.cache.iter().rev().map(|(id, _)| id.clone()).collect()
    }

    fn snapshot(&self) -> Vec<HandleSnapshot> {
        self.cache
            .iter()
            .rev()
            .map(|(_, handle)| handle.snapshot())
            .collect()
    }

    fn drain(&mut self) -> Vec<Arc<SessionHandle>> {
        let mut handles = Vec::with_capacity(self.cache.len());
        while let Some((_, handle)) = self.cache.pop_lru() {
            handles.push(handle);
        }
        handles
    }
}

/// Concurrent store of live conversations keyed by session id.
///
/// **Lock Scope Pattern**: the structural lock guards map membership and recency order
/// only. It is never held while the factory runs or while a turn runs, so one slow
/// session never blocks lookups of another.
pub struct SessionRegistry {
    entries: RwLock<Entries>,
    factory: Arc<dyn ConversationFactory>,
    policy: EvictionPolicy,
    storage_dir: PathBuf,
    next_seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn ConversationFactory>,
        policy: EvictionPolicy,
        storage_dir: PathBuf,
    ) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            factory,
            policy,
            storage_dir,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config, factory: Arc<dyn ConversationFactory>) -> Self {
        Self::new(
            factory,
            EvictionPolicy::new(config.max_sessions, config.ttl()),
            config.storage_dir.clone(),
        )
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Returns the session for `id`, creating (or resuming) it when unknown.
    ///
    /// Runs an eviction pass before the lookup, and again after a new session has been
    /// inserted so growth past `max_sessions` is undone immediately.
    pub async fn get_or_create(&self, id: Option<&str>) -> Result<(Arc<SessionHandle>, String)> {
        let (flight, id) = self.acquire(id).await?;
        let handle = Arc::clone(flight.handle());
        Ok((handle, id))
    }

    /// Like [`get_or_create`](Self::get_or_create), but the handle is already counted as
    /// in flight when it is handed out, so no eviction pass can see it idle between the
    /// lookup and its use.
    pub async fn acquire(&self, id: Option<&str>) -> Result<(FlightGuard, String)> {
        let requested = id.map(parse_session_id).transpose()?;

        self.evict_now().await;

        if let Some(uuid) = requested {
            let key = uuid.to_string();
            let mut entries = self.entries.write().await;
            if let Some(handle) = entries.promote(&key) {
                handle.touch();
                debug!(session_id = %key, "Session cache hit");
                return Ok((handle.enter_flight(), key));
            }
        }

        let conversation = self
            .factory
            .create(requested, &self.storage_dir)
            .await
            .map_err(|e| {
                error!(error = %e, "Conversation factory failed");
                ServiceError::creation_failed(format!("{:#}", e))
            })?;

        // Key on the canonical form so a later lookup with the same UUID hits
        let id = match requested {
            Some(uuid) => {
                let key = uuid.to_string();
                if !conversation.id().eq_ignore_ascii_case(&key) {
                    warn!(
                        session_id = %key,
                        conversation_id = %conversation.id(),
                        "Conversation reported a different id than requested"
                    );
                }
                key
            }
            None => match parse_session_id(conversation.id()) {
                Ok(uuid) => uuid.to_string(),
                Err(_) => {
                    let raw = conversation.id().to_string();
                    if let Err(e) = conversation.close().await {
                        warn!(error = %e, "Failed to close rejected conversation");
                    }
                    return Err(ServiceError::creation_failed(format!(
                        "conversation id is not a UUID: {}",
                        raw
                    )));
                }
            },
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let created = Arc::new(SessionHandle::new(id.clone(), conversation, seq));

        let (flight, discarded) = {
            let mut entries = self.entries.write().await;
            if entries.draining {
                drop(entries);
                created.close().await;
                return Err(ServiceError::ShuttingDown);
            }
            match entries.promote(&id) {
                Some(existing) => {
                    // Lost a creation race for the same id: keep the registered one,
                    // its creator may already be using it.
                    existing.touch();
                    (existing.enter_flight(), Some(created))
                }
                None => {
                    let flight = created.enter_flight();
                    entries.insert(id.clone(), created);
                    (flight, None)
                }
            }
        };

        match discarded {
            Some(loser) => {
                debug!(session_id = %id, "Concurrent creation resolved, closing duplicate");
                loser.close().await;
            }
            None => {
                info!(session_id = %id, resumed = requested.is_some(), "Session created");
                self.evict_now().await;
            }
        }

        Ok((flight, id))
    }

    /// Read-only existence check. Does not change recency or trigger eviction.
    pub async fn lookup(&self, id: &str) -> Option<Arc<SessionHandle>> {
        let key = Uuid::parse_str(id).ok()?.to_string();
        self.entries.read().await.peek(&key)
    }

    /// Runs one eviction pass and closes the evicted conversations outside the lock.
    pub async fn evict_now(&self) -> Vec<String> {
        let now = Instant::now();
        let evicted: Vec<Arc<SessionHandle>> = {
            let mut entries = self.entries.write().await;
            let snapshot = entries.snapshot();
            self.policy
                .select(&snapshot, now)
                .iter()
                .filter_map(|id| entries.remove(id))
                .collect()
        };

        let mut ids = Vec::with_capacity(evicted.len());
        for handle in evicted {
            let idle_secs = now.saturating_duration_since(handle.last_used()).as_secs();
            info!(session_id = %handle.id(), idle_secs = idle_secs, "Evicting session");
            handle.close().await;
            ids.push(handle.id().to_string());
        }
        ids
    }

    /// Closes every session and empties the registry. Used only at shutdown, so
    /// sessions with turns still running are closed too. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        entries.draining = true;

        let handles = entries.drain();

        for handle in &handles {
            if handle.in_flight() > 0 {
                warn!(
                    session_id = %handle.id(),
                    in_flight = handle.in_flight(),
                    "Closing session with work still running"
                );
            }
            handle.close().await;
        }

        info!(count = handles.len(), "Closed all sessions");
        handles.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.cache.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Session ids from least to most recently used
    pub async fn session_ids(&self) -> Vec<String> {
        self.entries.read().await.ids()
    }

    /// Starts a background task that runs an eviction pass every `every`.
    ///
    /// Returns a JoinHandle for graceful shutdown coordination and a shutdown sender
    /// to signal the task to stop.
    pub fn start_sweeper(
        self: &Arc<Self>,
        every: Duration,
    ) -> (tokio::task::JoinHandle<()>, tokio::sync::mpsc::Sender<()>) {
        let registry = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut interval = interval(every);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = registry.evict_now().await;
                        if !evicted.is_empty() {
                            info!(evicted = evicted.len(), "Sweeper evicted idle sessions");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Sweeper received shutdown signal, stopping...");
                        break;
                    }
                }
            }
        });

        (handle, shutdown_tx)
    }
}

/// Client-supplied ids must be UUIDs
pub fn parse_session_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ServiceError::invalid_argument(format!("malformed session id: {}", raw)))
}
