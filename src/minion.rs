// src/minion.rs

//! The minion: async shell around the pure [`TaskPool`].
//!
//! Owns the polling loop and everything with side effects:
//! - building a fresh [`TaskContext`] and task instance per run
//! - spawning the run so the polling loop never waits on a task
//! - catching task errors and panics at this boundary
//! - feeding each settled run back into the pool
//!
//! Selection, life accounting and pacing all live in `pool`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::BoxFuture;
use crate::clock::{Clock, SystemClock};
use crate::data::{AccountInfo, DATA_KEY_ACCOUNT_INFO, DataStore};
use crate::errors::Result;
use crate::page::{Browser, Page, PageFallback, PageProvider, PageQuery, PageResolver};
use crate::pool::{EntryId, MinionState, TaskPool};
use crate::task::{TaskContext, TaskFactory, TickPolicy};
use crate::timing::format_timestamp;
use crate::user_agent::random_user_agent;

pub type SharedFactory = Arc<dyn TaskFactory>;

/// Runtime knobs of a [`Minion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinionSettings {
    /// Period of the polling timer.
    pub poll_interval: Duration,
    /// Pool-wide cooldown after every settled run.
    pub task_interval: Duration,
    pub tick: TickPolicy,
    /// Delay between page searches.
    pub page_retry: Duration,
    pub user_agent: String,
}

impl Default for MinionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            task_interval: Duration::from_secs(5),
            tick: TickPolicy::default(),
            page_retry: Duration::from_millis(500),
            user_agent: random_user_agent(),
        }
    }
}

/// Read-only view of one pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub id: u64,
    pub task: String,
    pub life: u32,
    pub awake_time: i64,
    /// `awake_time` as local `YYYY-MM-DD HH:MM:SS`.
    pub awake_at: String,
}

struct Shared {
    pool: Mutex<TaskPool<SharedFactory>>,
    data: DataStore,
    pages: Arc<PageResolver>,
    clock: Arc<dyn Clock>,
    settings: MinionSettings,
    polls: AtomicU64,
    runs: AtomicU64,
}

struct PollingHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Single-worker task scheduler.
pub struct Minion {
    shared: Arc<Shared>,
    polling: Mutex<Option<PollingHandle>>,
}

impl fmt::Debug for Minion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Minion")
            .field("pool", &*self.shared.lock_pool())
            .field("settings", &self.shared.settings)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Minion {
    pub fn new(browser: Arc<dyn Browser>, settings: MinionSettings) -> Self {
        Self::with_clock(browser, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        browser: Arc<dyn Browser>,
        settings: MinionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pages = Arc::new(PageResolver::new(
            browser,
            settings.user_agent.clone(),
            settings.page_retry,
        ));
        let shared = Shared {
            pool: Mutex::new(TaskPool::new(settings.task_interval)),
            data: DataStore::new(),
            pages,
            clock,
            settings,
            polls: AtomicU64::new(0),
            runs: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
            polling: Mutex::new(None),
        }
    }

    /// Append a pool entry, eligible immediately. `life == 0` means unlimited.
    pub fn add_task(&self, factory: SharedFactory, life: u32) -> EntryId {
        let name = factory.name().to_string();
        let id = self.shared.lock_pool().add(factory, life);
        debug!(entry = %id, task = %name, life, "task added to pool");
        id
    }

    /// Begin polling. Returns `false` if polling was already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut polling = lock(&self.polling);
        if polling.is_some() {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let join = tokio::spawn(async move {
            polling_loop(shared, shutdown_rx).await;
        });
        *polling = Some(PollingHandle { shutdown_tx, join });
        true
    }

    /// Stop polling and wait for the loop to exit. A task that is already
    /// running is left to finish on its own. Returns `false` if not running.
    pub async fn stop(&self) -> bool {
        let handle = lock(&self.polling).take();
        let Some(handle) = handle else {
            return false;
        };

        let _ = handle.shutdown_tx.send(true);
        if let Err(err) = handle.join.await {
            error!(error = %err, "polling loop ended abnormally");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.polling).is_some()
    }

    /// Run one poll cycle right now, outside the timer.
    ///
    /// Returns the entry selected for a run, if any. Preparing and running
    /// the task happen in the background.
    pub fn poll_once(&self) -> Option<EntryId> {
        self.shared.poll_once()
    }

    /// Wait until no task is running.
    pub async fn wait_idle(&self) {
        while self.state() == MinionState::Busy {
            sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn get_page(
        &self,
        query: impl Into<PageQuery>,
        fallback: impl Into<PageFallback>,
    ) -> BoxFuture<'_, anyhow::Result<Arc<dyn Page>>> {
        self.shared.pages.get_page(query.into(), fallback.into())
    }

    pub fn get_data<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.shared.data.get(key)
    }

    pub fn set_data<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.shared.data.set(key, value)
    }

    pub fn data(&self) -> &DataStore {
        &self.shared.data
    }

    /// Store account credentials for tasks under the `account_info` key.
    pub fn set_account(&self, account: &AccountInfo) -> Result<()> {
        self.shared.data.set(DATA_KEY_ACCOUNT_INFO, account)
    }

    pub fn user_agent(&self) -> &str {
        self.shared.pages.user_agent()
    }

    pub fn settings(&self) -> &MinionSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> MinionState {
        self.shared.lock_pool().state()
    }

    pub fn current(&self) -> Option<EntryId> {
        self.shared.lock_pool().current()
    }

    pub fn len(&self) -> usize {
        self.shared.lock_pool().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock_pool().is_empty()
    }

    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        self.shared
            .lock_pool()
            .entries()
            .iter()
            .map(|e| EntrySnapshot {
                id: e.id.0,
                task: e.factory.name().to_string(),
                life: e.life,
                awake_time: e.awake_time,
                awake_at: format_timestamp(e.awake_time),
            })
            .collect()
    }

    /// Poll cycles executed so far, including skipped ones.
    pub fn poll_count(&self) -> u64 {
        self.shared.polls.load(Ordering::SeqCst)
    }

    /// Runs settled so far, including precondition failures and faults.
    pub fn run_count(&self) -> u64 {
        self.shared.runs.load(Ordering::SeqCst)
    }
}

impl Drop for Minion {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.polling).take() {
            let _ = handle.shutdown_tx.send(true);
        }
    }
}

async fn polling_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    info!(
        poll_ms = shared.settings.poll_interval.as_millis() as u64,
        "minion polling started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = sleep(shared.settings.poll_interval) => {}
        }

        shared.poll_once();
    }

    info!("minion polling stopped");
}

impl Shared {
    fn lock_pool(&self) -> MutexGuard<'_, TaskPool<SharedFactory>> {
        lock(&self.pool)
    }

    fn poll_once(self: &Arc<Self>) -> Option<EntryId> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now_ms();

        // Busy flag and current entry flip together under this lock.
        let selection = match self.lock_pool().select(now) {
            Ok(selection) => selection,
            Err(skip) => {
                trace!(?skip, "poll skipped");
                return None;
            }
        };

        let entry = selection.entry;
        let factory = selection.factory;
        let name = factory.name().to_string();
        let pages: Arc<dyn PageProvider> = self.pages.clone();
        let ctx = TaskContext::new(
            pages,
            self.data.clone(),
            Arc::clone(&self.clock),
            self.settings.tick,
        );

        // Task code (create, prepare, start, destroy) only runs inside `run`.
        let shared = Arc::clone(self);
        let task_name = name.clone();
        tokio::spawn(async move {
            let run = tokio::spawn(async move {
                let mut task = factory.create(ctx);
                if !task.prepare() {
                    warn!(%entry, task = %task_name, "task preconditions not met; run skipped");
                    task.destroy();
                    return None;
                }

                info!(%entry, task = %task_name, "task started");
                let outcome = task.start().await;
                task.destroy();
                Some(outcome)
            });

            let awake_time = match run.await {
                Ok(None) => None,
                Ok(Some(Ok(result))) => {
                    info!(
                        %entry,
                        task = %name,
                        state = ?result.state,
                        message = %result.message,
                        "task settled"
                    );
                    result.awake_time
                }
                Ok(Some(Err(err))) => {
                    error!(%entry, task = %name, error = %err, "task failed");
                    None
                }
                Err(err) => {
                    error!(%entry, task = %name, error = %err, "task aborted");
                    None
                }
            };

            shared.settle(entry, &name, awake_time);
        });

        Some(entry)
    }

    fn settle(&self, entry: EntryId, name: &str, awake_time: Option<i64>) {
        let now = self.clock.now_ms();
        let settled = self.lock_pool().settle(entry, awake_time, now);
        self.runs.fetch_add(1, Ordering::SeqCst);

        if let Some(at) = settled.awake_time {
            info!(%entry, task = %name, awake_at = %format_timestamp(at), "next run scheduled");
        }
        if settled.removed {
            info!(%entry, task = %name, "life exhausted; entry removed");
        } else {
            debug!(%entry, task = %name, remaining_life = ?settled.remaining_life, "entry settled");
        }
    }
}
