//! Status state machine shared by jobs and units of work

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job or a unit of work
///
/// ```text
/// Pending ──► Running ──► Success
///    │  ▲        │  ├───► Failed
///    │  └reclaim─┘  └───► Canceled
///    └──────────────────► Failed / Canceled (propagated)
/// ```
///
/// Terminal states are immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for predecessors or capacity
    Pending,

    /// Submitted to a compute platform
    Running,

    /// Completed successfully
    Success,

    /// Completed with an error, or a predecessor failed
    Failed,

    /// Abandoned through propagation
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Running | Failed | Canceled) => true,
            (Running, Success | Failed | Canceled | Pending) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_sticky() {
        for terminal in [TaskStatus::Success, TaskStatus::Failed, TaskStatus::Canceled] {
            assert!(terminal.is_terminal());
            for next in [
                TaskStatus::Pending,
                TaskStatus::Running,
                TaskStatus::Success,
                TaskStatus::Failed,
                TaskStatus::Canceled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_reclaim_and_propagation_transitions() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Success));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_parse_accepts_platform_spellings() {
        assert_eq!("SUCCESS".parse::<TaskStatus>().unwrap(), TaskStatus::Success);
        assert_eq!("CANCELLED".parse::<TaskStatus>().unwrap(), TaskStatus::Canceled);
        assert!("done".parse::<TaskStatus>().is_err());
    }
}
