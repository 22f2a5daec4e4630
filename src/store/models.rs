use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a session. Transitions form a DAG; the three rightmost
/// states are terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Planning,
    AwaitingConfirmation,
    Executing,
    Completed,
    Failed,
    DeadlineExceeded,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::DeadlineExceeded
        )
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Open, Planning)
                | (Planning, AwaitingConfirmation)
                | (Planning, Failed)
                | (AwaitingConfirmation, Executing)
                | (AwaitingConfirmation, Failed)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, DeadlineExceeded)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Open => "OPEN",
            SessionStatus::Planning => "PLANNING",
            SessionStatus::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            SessionStatus::Executing => "EXECUTING",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::DeadlineExceeded => "DEADLINE_EXCEEDED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (InProgress, Completed) | (InProgress, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A unit of work bounded by a user prompt and optional deadline. `raw_plan`
/// holds the serialized plan snapshot, opaque to the store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub raw_plan: Option<String>,
}

/// An ordered atomic step within a session's plan. `position` ascends from 0
/// and is unique within the owning session; `react_history` holds the
/// serialized ReAct trace, opaque to the store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: String,
    pub session_id: String,
    pub position: i32,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub react_history: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub status: SessionStatus,
    pub deadline: Option<DateTime<Utc>>,
}

impl Default for NewSession {
    fn default() -> Self {
        Self {
            status: SessionStatus::Open,
            deadline: None,
        }
    }
}

/// Partial session update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub raw_plan: Option<String>,
}

impl SessionPatch {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_raw_plan(mut self, raw_plan: impl Into<String>) -> Self {
        self.raw_plan = Some(raw_plan.into());
        self
    }
}

/// Partial task update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub react_history: Option<String>,
}

impl TaskPatch {
    pub fn react_history(payload: impl Into<String>) -> Self {
        Self {
            react_history: Some(payload.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_transitions_form_a_dag() {
        use SessionStatus::*;

        assert!(Planning.can_transition_to(AwaitingConfirmation));
        assert!(AwaitingConfirmation.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Completed));
        assert!(Executing.can_transition_to(DeadlineExceeded));

        // no backward edges, no self edges
        assert!(!Executing.can_transition_to(AwaitingConfirmation));
        assert!(!Completed.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(Executing));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        use SessionStatus::*;

        for terminal in [Completed, Failed, DeadlineExceeded] {
            for next in [
                Open,
                Planning,
                AwaitingConfirmation,
                Executing,
                Completed,
                Failed,
                DeadlineExceeded,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn task_transitions_are_forward_only() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
    }

    #[test]
    fn statuses_serialize_screaming_snake() {
        let s = serde_json::to_string(&SessionStatus::AwaitingConfirmation).unwrap();
        assert_eq!(s, "\"AWAITING_CONFIRMATION\"");

        let t = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(t, "\"IN_PROGRESS\"");
    }
}
