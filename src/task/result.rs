// src/task/result.rs

use serde::Serialize;
use serde_json::Value;

/// Lifecycle of one task instance. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Canceled | TaskState::Failed
        )
    }
}

/// The states a task may complete with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    Completed,
    Canceled,
    Failed,
}

impl From<TerminalState> for TaskState {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Completed => TaskState::Completed,
            TerminalState::Canceled => TaskState::Canceled,
            TerminalState::Failed => TaskState::Failed,
        }
    }
}

/// Outcome handed back to the scheduler when a task settles.
///
/// `awake_time` (epoch milliseconds) becomes the pool entry's next eligible
/// time. `None` leaves the entry's awake time untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub state: TerminalState,
    pub message: String,
    pub result: Option<Value>,
    pub awake_time: Option<i64>,
}

impl TaskResult {
    pub fn new(state: TerminalState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            result: None,
            awake_time: None,
        }
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self::new(TerminalState::Completed, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(TerminalState::Canceled, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(TerminalState::Failed, message)
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_awake_time(mut self, awake_time: i64) -> Self {
        self.awake_time = Some(awake_time);
        self
    }
}
