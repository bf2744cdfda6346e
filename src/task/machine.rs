// src/task/machine.rs

//! Step-based task state machine.
//!
//! A concrete task implements [`StepTask`]: a closed `Step` enum plus one
//! handler per step. [`StepMachine`] wraps it into a schedulable [`Task`] and
//! drives the handlers:
//!
//! - `Transition::Tick(step)` re-runs `step` after the tick interval
//! - `Transition::Next(step)` runs `step` immediately
//! - `Transition::Complete(result)` ends the run
//!
//! Consecutive ticks are counted; once the tick policy's bound is exceeded
//! the task completes `Canceled` instead of polling forever.

use std::fmt;

use tokio::time::sleep;
use tracing::{debug, trace};

use crate::BoxFuture;
use crate::errors::{MinionError, Result};

use super::{Task, TaskContext, TaskResult, TaskState};

/// What a step handler asks the machine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<S> {
    Tick(S),
    Next(S),
    Complete(TaskResult),
}

pub type StepResult<S> = anyhow::Result<Transition<S>>;

/// Handler signature for steps of `T`.
pub type StepHandler<T> = for<'a> fn(
    &'a mut T,
    &'a mut TaskContext,
) -> BoxFuture<'a, StepResult<<T as StepTask>::Step>>;

/// A task expressed as named steps.
pub trait StepTask: Send + Sized + 'static {
    type Step: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn register_steps(&self, steps: &mut StepRegistry<Self>);

    /// Synchronous precondition check run before any step.
    fn prepare(&mut self, _ctx: &mut TaskContext) -> bool {
        true
    }
}

/// Step table of one task type, in registration order.
pub struct StepRegistry<T: StepTask> {
    steps: Vec<(T::Step, StepHandler<T>)>,
    initial: Option<T::Step>,
}

impl<T: StepTask> Default for StepRegistry<T> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            initial: None,
        }
    }
}

impl<T: StepTask> fmt::Debug for StepRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.steps().collect::<Vec<_>>())
            .field("initial", &self.initial())
            .finish()
    }
}

impl<T: StepTask> StepRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `step`. Registering the same step twice replaces its handler.
    pub fn register(&mut self, step: T::Step, handler: StepHandler<T>) -> &mut Self {
        match self.steps.iter_mut().find(|(s, _)| *s == step) {
            Some(slot) => slot.1 = handler,
            None => self.steps.push((step, handler)),
        }
        self
    }

    /// Add `step` and make it the starting step.
    pub fn register_initial(&mut self, step: T::Step, handler: StepHandler<T>) -> &mut Self {
        self.initial = Some(step);
        self.register(step, handler)
    }

    /// The explicitly marked step, else the first one registered.
    pub fn initial(&self) -> Option<T::Step> {
        self.initial.or_else(|| self.steps.first().map(|(s, _)| *s))
    }

    pub fn handler(&self, step: T::Step) -> Option<StepHandler<T>> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, handler)| *handler)
    }

    pub fn steps(&self) -> impl Iterator<Item = T::Step> + '_ {
        self.steps.iter().map(|(s, _)| *s)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Runs a [`StepTask`] as a schedulable [`Task`].
pub struct StepMachine<T: StepTask> {
    task: T,
    ctx: TaskContext,
    steps: StepRegistry<T>,
    current: Option<T::Step>,
    state: TaskState,
    result: Option<TaskResult>,
}

impl<T: StepTask> fmt::Debug for StepMachine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepMachine")
            .field("task", &self.task.name())
            .field("current", &self.current)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T: StepTask> StepMachine<T> {
    pub fn new(task: T, ctx: TaskContext) -> Self {
        let mut steps = StepRegistry::new();
        task.register_steps(&mut steps);
        let current = steps.initial();
        Self {
            task,
            ctx,
            steps,
            current,
            state: TaskState::Pending,
            result: None,
        }
    }

    pub fn current_step(&self) -> Option<T::Step> {
        self.current
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    pub fn inner(&self) -> &T {
        &self.task
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    fn finish(&mut self, result: TaskResult) -> TaskResult {
        self.state = result.state.into();
        self.result = Some(result.clone());
        result
    }

    async fn drive(&mut self) -> Result<TaskResult> {
        let name = self.task.name().to_string();

        if self.state != TaskState::Pending {
            return Err(MinionError::InvalidState(format!(
                "task '{name}' cannot start from {:?}",
                self.state
            )));
        }
        let Some(mut step) = self.current else {
            self.state = TaskState::Failed;
            return Err(MinionError::NoSteps(name));
        };

        self.state = TaskState::Running;
        let policy = self.ctx.tick_policy();
        let mut ticks: u32 = 0;

        loop {
            self.current = Some(step);
            let Some(handler) = self.steps.handler(step) else {
                self.state = TaskState::Failed;
                return Err(MinionError::UnknownStep(format!("{name}: {step:?}")));
            };

            trace!(task = %name, ?step, ticks, "running step");
            let transition = match handler(&mut self.task, &mut self.ctx).await {
                Ok(transition) => transition,
                Err(err) => {
                    self.state = TaskState::Failed;
                    return Err(MinionError::Other(
                        err.context(format!("task '{name}' failed in step {step:?}")),
                    ));
                }
            };

            match transition {
                Transition::Next(next) => {
                    debug!(task = %name, from = ?step, to = ?next, "next step");
                    ticks = 0;
                    step = next;
                }
                Transition::Tick(next) => {
                    ticks += 1;
                    if policy.exhausted(ticks) {
                        debug!(task = %name, ?step, ticks, "tick limit reached");
                        return Ok(self.finish(TaskResult::canceled(format!(
                            "gave up on step {step:?} after {ticks} ticks"
                        ))));
                    }
                    sleep(policy.interval).await;
                    step = next;
                }
                Transition::Complete(result) => {
                    return Ok(self.finish(result));
                }
            }
        }
    }
}

impl<T: StepTask> Task for StepMachine<T> {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn prepare(&mut self) -> bool {
        self.task.prepare(&mut self.ctx)
    }

    fn start(&mut self) -> BoxFuture<'_, Result<TaskResult>> {
        Box::pin(self.drive())
    }

    fn destroy(&mut self) {
        let released = self.ctx.release_subscriptions();
        trace!(task = %self.task.name(), released, "task destroyed");
    }
}
