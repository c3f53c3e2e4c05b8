//! Mock conversations shared by the integration tests
#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use dash_sessions::conversation::{Conversation, ConversationFactory};
use dash_sessions::session::{Dispatcher, EvictionPolicy, SessionRegistry};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// What the mocks observed
#[derive(Default)]
pub struct Probe {
    pub created: AtomicUsize,
    /// Instance numbers, one entry per `close` call
    pub closes: Mutex<Vec<usize>>,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub completed: AtomicUsize,
}

impl Probe {
    pub fn close_count(&self, instance: usize) -> usize {
        self.closes
            .lock()
            .unwrap()
            .iter()
            .filter(|&&i| i == instance)
            .count()
    }

    pub fn total_closes(&self) -> usize {
        self.closes.lock().unwrap().len()
    }
}

/// Replies `echo: <message>`.
///
/// `fail` makes the turn error; `sleep:<ms>` makes it take that long first.
pub struct MockConversation {
    id: String,
    instance: usize,
    closed: AtomicBool,
    probe: Arc<Probe>,
}

#[async_trait]
impl Conversation for MockConversation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_and_run(&self, message: &str) -> Result<String> {
        if self.closed.load(Ordering::Acquire) {
            bail!("conversation closed");
        }
        if message == "fail" {
            bail!("backend exploded");
        }

        let running = self.probe.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_running.fetch_max(running, Ordering::SeqCst);

        if let Some(ms) = message.strip_prefix("sleep:") {
            let ms: u64 = ms.parse()?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        self.probe.running.fetch_sub(1, Ordering::SeqCst);
        self.probe.completed.fetch_add(1, Ordering::SeqCst);
        Ok(format!("echo: {}", message))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.probe.closes.lock().unwrap().push(self.instance);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockFactory {
    pub probe: Arc<Probe>,
    /// Every conversation gets this id, to force creation races
    pub fixed_id: Option<Uuid>,
    /// Report ids in upper case
    pub uppercase_ids: bool,
    /// Report this verbatim, UUID or not
    pub raw_id: Option<String>,
    pub create_delay: Duration,
    pub fail_create: AtomicBool,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixed_id(mut self, id: Uuid) -> Self {
        self.fixed_id = Some(id);
        self
    }

    pub fn with_uppercase_ids(mut self) -> Self {
        self.uppercase_ids = true;
        self
    }

    pub fn with_raw_id(mut self, id: &str) -> Self {
        self.raw_id = Some(id.to_string());
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }
}

#[async_trait]
impl ConversationFactory for MockFactory {
    async fn create(
        &self,
        resume_id: Option<Uuid>,
        _storage_dir: &Path,
    ) -> Result<Box<dyn Conversation>> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if self.fail_create.load(Ordering::Acquire) {
            bail!("agent backend unavailable");
        }

        let mut id = self
            .fixed_id
            .or(resume_id)
            .unwrap_or_else(Uuid::new_v4)
            .to_string();
        if self.uppercase_ids {
            id = id.to_uppercase();
        }
        if let Some(ref raw) = self.raw_id {
            id = raw.clone();
        }
        let instance = self.probe.created.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockConversation {
            id,
            instance,
            closed: AtomicBool::new(false),
            probe: Arc::clone(&self.probe),
        }))
    }
}

pub fn registry(
    factory: MockFactory,
    max_sessions: usize,
    ttl: Duration,
) -> (Arc<SessionRegistry>, Arc<Probe>) {
    let probe = Arc::clone(&factory.probe);
    let registry = SessionRegistry::new(
        Arc::new(factory),
        EvictionPolicy::new(max_sessions, ttl),
        std::env::temp_dir().join("dash-sessions-tests"),
    );
    (Arc::new(registry), probe)
}

pub fn dispatcher(
    factory: MockFactory,
    timeout: Duration,
    max_workers: usize,
) -> (Arc<Dispatcher>, Arc<Probe>) {
    let (registry, probe) = registry(factory, 16, Duration::from_secs(3600));
    (Arc::new(Dispatcher::new(registry, timeout, max_workers)), probe)
}
