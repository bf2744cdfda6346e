// src/task/mod.rs

//! Task contract.
//!
//! The scheduler only ever sees [`TaskFactory`] (stored in the pool) and the
//! [`Task`] instances it creates, one per run. Most tasks are written as a
//! [`StepTask`] and wrapped into a [`StepMachine`].

use std::fmt;
use std::sync::Arc;

use crate::BoxFuture;
use crate::errors::Result;

pub mod context;
pub mod machine;
pub mod result;

pub use context::{Subscriptions, TaskContext, TickPolicy};
pub use machine::{StepHandler, StepMachine, StepRegistry, StepResult, StepTask, Transition};
pub use result::{TaskResult, TaskState, TerminalState};

/// One live run of a pool entry.
pub trait Task: Send {
    fn name(&self) -> &str;

    fn state(&self) -> TaskState;

    /// Precondition check. When this returns `false` the scheduler never
    /// calls [`start`](Task::start).
    fn prepare(&mut self) -> bool;

    /// Run until a terminal state is reached.
    fn start(&mut self) -> BoxFuture<'_, Result<TaskResult>>;

    /// Release everything registered on external collaborators.
    fn destroy(&mut self);
}

/// What the pool stores: a way to build a fresh [`Task`] per run.
pub trait TaskFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, ctx: TaskContext) -> Box<dyn Task>;
}

impl fmt::Debug for dyn TaskFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskFactory").field(&self.name()).finish()
    }
}

struct FnFactory<F> {
    name: String,
    build: F,
}

impl<F> TaskFactory for FnFactory<F>
where
    F: Fn(TaskContext) -> Box<dyn Task> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, ctx: TaskContext) -> Box<dyn Task> {
        (self.build)(ctx)
    }
}

/// Factory from a closure.
pub fn factory<F>(name: impl Into<String>, build: F) -> Arc<dyn TaskFactory>
where
    F: Fn(TaskContext) -> Box<dyn Task> + Send + Sync + 'static,
{
    Arc::new(FnFactory {
        name: name.into(),
        build,
    })
}

/// Factory for a [`StepTask`]: `build` makes a fresh task value per run.
pub fn step_factory<T, F>(name: impl Into<String>, build: F) -> Arc<dyn TaskFactory>
where
    T: StepTask,
    F: Fn() -> T + Send + Sync + 'static,
{
    factory(name, move |ctx: TaskContext| -> Box<dyn Task> {
        Box::new(StepMachine::new(build(), ctx))
    })
}
