//! Per-unit outcome of a fan-out.

/// Result of one unit inside a fan-out join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    /// The unit completed with a value.
    Done(T),
    /// The unit returned an error, rendered as a message.
    Failed(String),
    /// The unit exceeded its bounded wait and was abandoned.
    TimedOut,
}

impl<T> TaskOutcome<T> {
    /// Returns true if the unit produced a value.
    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done(_))
    }

    /// Returns true if the unit failed or timed out.
    pub fn is_failed(&self) -> bool {
        !self.is_done()
    }

    /// Returns a human readable reason for a failed unit.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            TaskOutcome::Done(_) => None,
            TaskOutcome::Failed(msg) => Some(msg),
            TaskOutcome::TimedOut => Some("timed out"),
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for TaskOutcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => TaskOutcome::Done(v),
            Err(e) => TaskOutcome::Failed(e.to_string()),
        }
    }
}
