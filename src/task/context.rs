// src/task/context.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::BoxFuture;
use crate::clock::Clock;
use crate::data::DataStore;
use crate::errors::Result;
use crate::page::{
    Page, PageEventKind, PageFallback, PageListener, PageProvider, PageQuery, SubscriptionId,
};

/// Pacing for `Transition::Tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPolicy {
    /// Fixed delay before a ticked step runs again.
    pub interval: Duration,
    /// Consecutive ticks allowed before the task gives up (`None` = never).
    pub max_ticks: Option<u32>,
}

impl TickPolicy {
    pub fn new(interval: Duration, max_ticks: Option<u32>) -> Self {
        Self { interval, max_ticks }
    }

    pub fn exhausted(&self, consecutive_ticks: u32) -> bool {
        self.max_ticks.is_some_and(|max| consecutive_ticks > max)
    }
}

impl Default for TickPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_ticks: None,
        }
    }
}

/// Page listeners registered during one task run.
///
/// Released by `destroy()`, and again on drop so a run that never reaches
/// `destroy()` (a panic inside a step) does not leave listeners behind.
#[derive(Debug, Default)]
pub struct Subscriptions {
    held: Vec<(Arc<dyn Page>, SubscriptionId)>,
}

impl Subscriptions {
    pub fn push(&mut self, page: Arc<dyn Page>, id: SubscriptionId) {
        self.held.push((page, id));
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Unsubscribe everything, returning how many listeners were still live.
    pub fn release_all(&mut self) -> usize {
        self.held
            .drain(..)
            .filter(|(page, id)| page.unsubscribe(*id))
            .count()
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        let released = self.release_all();
        if released > 0 {
            debug!(released, "released leftover page subscriptions");
        }
    }
}

/// Everything a task may touch during one run.
///
/// Built fresh by the scheduler for every run and owned by the task instance.
pub struct TaskContext {
    pages: Arc<dyn PageProvider>,
    data: DataStore,
    clock: Arc<dyn Clock>,
    tick: TickPolicy,
    subscriptions: Subscriptions,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("tick", &self.tick)
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    pub fn new(
        pages: Arc<dyn PageProvider>,
        data: DataStore,
        clock: Arc<dyn Clock>,
        tick: TickPolicy,
    ) -> Self {
        Self {
            pages,
            data,
            clock,
            tick,
            subscriptions: Subscriptions::default(),
        }
    }

    pub fn get_page(
        &self,
        query: impl Into<PageQuery>,
        fallback: impl Into<PageFallback>,
    ) -> BoxFuture<'_, anyhow::Result<Arc<dyn Page>>> {
        self.pages.get_page(query.into(), fallback.into())
    }

    pub fn get_data<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.data.get(key)
    }

    pub fn set_data<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.data.set(key, value)
    }

    pub fn data(&self) -> &DataStore {
        &self.data
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn tick_policy(&self) -> TickPolicy {
        self.tick
    }

    /// Register `listener` on `page` and remember it for release.
    pub fn subscribe(
        &mut self,
        page: &Arc<dyn Page>,
        kind: PageEventKind,
        listener: PageListener,
    ) -> SubscriptionId {
        let id = page.subscribe(kind, listener);
        self.subscriptions.push(Arc::clone(page), id);
        id
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn release_subscriptions(&mut self) -> usize {
        self.subscriptions.release_all()
    }
}
