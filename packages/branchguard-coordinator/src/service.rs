use branchguard_storage::{InMemoryStore, LockStore, ShadowIndexStore};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::{AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::event_handler::IndexingEventHandler;
use crate::lock_manager::LockManager;
use crate::merge::{AutoMergeEvaluator, MergeConflictChecker, NoMergeConflicts};
use crate::monitor;
use crate::shadow::{FsIndexSwapper, IndexSwapper, ShadowIndexManager};

/// Everything the coordinator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub lock_store: Arc<dyn LockStore>,
    pub shadow_store: Arc<dyn ShadowIndexStore>,
    pub clock: Arc<dyn Clock>,
    pub audit: Arc<dyn AuditSink>,
    pub swapper: Arc<dyn IndexSwapper>,
    pub merge_checker: Arc<dyn MergeConflictChecker>,
}

impl Collaborators {
    /// One backend for both lock and shadow records, production defaults
    /// for everything else.
    pub fn with_store<S>(store: Arc<S>) -> Self
    where
        S: LockStore + ShadowIndexStore + 'static,
    {
        Self {
            lock_store: store.clone(),
            shadow_store: store,
            clock: Arc::new(SystemClock),
            audit: Arc::new(TracingAuditSink),
            swapper: Arc::new(FsIndexSwapper),
            merge_checker: Arc::new(NoMergeConflicts),
        }
    }

    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn swapper(mut self, swapper: Arc<dyn IndexSwapper>) -> Self {
        self.swapper = swapper;
        self
    }

    pub fn merge_checker(mut self, checker: Arc<dyn MergeConflictChecker>) -> Self {
        self.merge_checker = checker;
        self
    }
}

/// Process-wide owner of the lock manager, shadow manager, event handler
/// and their background tasks.
///
/// Construct once, share via `Arc`, call [`start`](Self::start) to run the
/// sweeps and [`shutdown`](Self::shutdown) before exit.
pub struct Coordinator {
    config: CoordinatorConfig,
    locks: Arc<LockManager>,
    shadows: Arc<ShadowIndexManager>,
    events: Arc<IndexingEventHandler>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let locks = Arc::new(LockManager::new(
            collaborators.lock_store,
            collaborators.clock.clone(),
            collaborators.audit.clone(),
            config.locks.clone(),
        ));
        let shadows = Arc::new(ShadowIndexManager::new(
            collaborators.shadow_store,
            locks.clone(),
            collaborators.swapper,
            collaborators.clock,
            collaborators.audit,
            config.shadow.clone(),
        ));
        let events = Arc::new(IndexingEventHandler::new(
            locks.clone(),
            shadows.clone(),
            AutoMergeEvaluator::new(config.auto_merge.clone(), collaborators.merge_checker),
            config.events.clone(),
        ));

        Ok(Self {
            config,
            locks,
            shadows,
            events,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Coordinator over a SQLite database file.
    pub fn open_sqlite(config: CoordinatorConfig, db_path: impl AsRef<Path>) -> Result<Self> {
        let store = Arc::new(branchguard_storage::SqliteStore::new(db_path)?);
        Self::new(config, Collaborators::with_store(store))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn shadows(&self) -> &Arc<ShadowIndexManager> {
        &self.shadows
    }

    pub fn events(&self) -> &Arc<IndexingEventHandler> {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Spawn the lock sweeper and shadow monitor. No-op if already running.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        if self.shutdown.is_cancelled() {
            warn!("Coordinator already shut down; not starting background tasks");
            return;
        }

        tasks.push(monitor::spawn_lock_sweeper(
            self.locks.clone(),
            Duration::from_secs(self.config.locks.cleanup_interval_seconds),
            self.shutdown.child_token(),
        ));
        tasks.push(monitor::spawn_shadow_monitor(
            self.shadows.clone(),
            Duration::from_secs(self.config.shadow.monitor_interval_seconds),
            self.shutdown.child_token(),
        ));
        info!("Coordinator started {} background task(s)", tasks.len());
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Coordinator shut down");
    }
}
