use std::sync::{Arc, Mutex};
use std::time::Duration;

use minion::BoxFuture;
use minion::errors::Result;
use minion::minion::SharedFactory;
use minion::task::{
    StepMachine, StepRegistry, StepResult, StepTask, Task, TaskContext, TaskResult, TaskState,
    TerminalState, Transition, factory,
};

/// What a scripted task does when it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    /// Settle immediately with this state and optional awake time.
    Settle {
        state: TerminalState,
        awake_time: Option<i64>,
    },
    /// Return an error from the step handler.
    Fail,
    /// Panic inside the step handler.
    Panic,
    /// Tick on the same step forever.
    TickForever,
    /// Sleep, then complete.
    Sleep(Duration),
    /// `prepare()` returns false.
    Unprepared,
    /// `prepare()` panics.
    PanicInPrepare,
}

impl Script {
    pub fn complete() -> Self {
        Script::Settle {
            state: TerminalState::Completed,
            awake_time: None,
        }
    }

    pub fn sleep_until(state: TerminalState, awake_time: i64) -> Self {
        Script::Settle {
            state,
            awake_time: Some(awake_time),
        }
    }
}

#[derive(Debug, Default)]
struct LogInner {
    started: Vec<String>,
    destroyed: Vec<String>,
    dropped: Vec<String>,
    active: usize,
    max_active: usize,
    ticks: u64,
}

/// Shared record of scripted runs.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    inner: Arc<Mutex<LogInner>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut LogInner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner)
    }

    /// Task names in the order their runs started.
    pub fn started(&self) -> Vec<String> {
        self.with(|l| l.started.clone())
    }

    /// Task names passed to `Task::destroy()`, one per call.
    pub fn destroyed(&self) -> Vec<String> {
        self.with(|l| l.destroyed.clone())
    }

    /// Task names whose started run was dropped, by any path.
    pub fn dropped(&self) -> Vec<String> {
        self.with(|l| l.dropped.clone())
    }

    pub fn active(&self) -> usize {
        self.with(|l| l.active)
    }

    /// Highest number of runs ever in flight at once.
    pub fn max_active(&self) -> usize {
        self.with(|l| l.max_active)
    }

    pub fn ticks(&self) -> u64 {
        self.with(|l| l.ticks)
    }

    fn enter(&self, name: &str) {
        self.with(|l| {
            l.started.push(name.to_string());
            l.active += 1;
            l.max_active = l.max_active.max(l.active);
        });
    }

    fn leave(&self) {
        self.with(|l| l.active = l.active.saturating_sub(1));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    Run,
    Loop,
}

/// A [`StepTask`] driven by a [`Script`], recording into a [`RunLog`].
#[derive(Debug)]
pub struct ScriptedTask {
    name: String,
    script: Script,
    log: RunLog,
    entered: bool,
}

impl ScriptedTask {
    pub fn new(name: &str, script: Script, log: RunLog) -> Self {
        Self {
            name: name.to_string(),
            script,
            log,
            entered: false,
        }
    }

    fn run<'a>(&'a mut self, _ctx: &'a mut TaskContext) -> BoxFuture<'a, StepResult<ScriptStep>> {
        Box::pin(async move {
            self.entered = true;
            self.log.enter(&self.name);

            match self.script.clone() {
                Script::Settle { state, awake_time } => {
                    let mut result = TaskResult::new(state, "scripted");
                    result.awake_time = awake_time;
                    Ok(Transition::Complete(result))
                }
                Script::Fail => Err(anyhow::anyhow!("scripted failure in {}", self.name)),
                Script::Panic => panic!("scripted panic in {}", self.name),
                Script::TickForever => Ok(Transition::Tick(ScriptStep::Loop)),
                Script::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(Transition::Complete(TaskResult::completed("slept")))
                }
                Script::Unprepared | Script::PanicInPrepare => Ok(Transition::Complete(
                    TaskResult::failed("ran without preconditions"),
                )),
            }
        })
    }

    fn tick<'a>(&'a mut self, _ctx: &'a mut TaskContext) -> BoxFuture<'a, StepResult<ScriptStep>> {
        Box::pin(async move {
            self.log.with(|l| l.ticks += 1);
            Ok(Transition::Tick(ScriptStep::Loop))
        })
    }
}

impl StepTask for ScriptedTask {
    type Step = ScriptStep;

    fn name(&self) -> &str {
        &self.name
    }

    fn register_steps(&self, steps: &mut StepRegistry<Self>) {
        steps
            .register(ScriptStep::Run, Self::run)
            .register(ScriptStep::Loop, Self::tick);
    }

    fn prepare(&mut self, _ctx: &mut TaskContext) -> bool {
        match self.script {
            Script::Unprepared => false,
            Script::PanicInPrepare => panic!("scripted prepare panic in {}", self.name),
            _ => true,
        }
    }
}

impl Drop for ScriptedTask {
    fn drop(&mut self) {
        if self.entered {
            self.log.with(|l| l.dropped.push(self.name.clone()));
            self.log.leave();
        }
    }
}

/// Step machine over a [`ScriptedTask`] that records `destroy()` calls.
pub struct Recorded {
    inner: StepMachine<ScriptedTask>,
    log: RunLog,
}

impl Task for Recorded {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn state(&self) -> TaskState {
        self.inner.state()
    }

    fn prepare(&mut self) -> bool {
        self.inner.prepare()
    }

    fn start(&mut self) -> BoxFuture<'_, Result<TaskResult>> {
        self.inner.start()
    }

    fn destroy(&mut self) {
        let name = self.inner.name().to_string();
        self.log.with(|l| l.destroyed.push(name));
        self.inner.destroy();
    }
}

/// Factory building a fresh [`ScriptedTask`] per run.
pub fn scripted(name: &str, script: Script, log: &RunLog) -> SharedFactory {
    let task_name = name.to_string();
    let log = log.clone();
    factory(name, move |ctx: TaskContext| -> Box<dyn Task> {
        let task = ScriptedTask::new(&task_name, script.clone(), log.clone());
        Box::new(Recorded {
            inner: StepMachine::new(task, ctx),
            log: log.clone(),
        })
    })
}
