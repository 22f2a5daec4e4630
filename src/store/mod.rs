mod models;
pub use models::*;

mod memory;
pub use memory::*;

mod postgres;
pub use postgres::*;

use async_trait::async_trait;

use crate::error::Result;

/// Durable storage for sessions and their tasks.
///
/// Every operation is individually atomic with respect to concurrent readers
/// and writers on the same session; task `position` assignment stays
/// monotonic under concurrent inserts (implementations may serialize
/// per-session to guarantee this).
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(&self, new_session: NewSession) -> Result<Session>;

    async fn session(&self, id: &str) -> Result<Option<Session>>;

    /// Applies a partial update. Fails `SessionNotFound` for an unknown id
    /// and `SessionStateInvalid` for a status change that leaves the
    /// transition DAG (including any mutation of a terminal status).
    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<Session>;

    /// Most recent sessions first.
    async fn list_sessions(&self, limit: Option<i64>) -> Result<Vec<Session>>;

    /// Tasks of a session in strictly ascending `position`.
    async fn list_tasks(&self, session_id: &str) -> Result<Vec<Task>>;

    /// Inserts a task with the given position, or `max(position) + 1`
    /// (0 for the first task) when omitted.
    async fn insert_task(
        &self,
        session_id: &str,
        description: &str,
        position: Option<i32>,
    ) -> Result<Task>;

    /// Applies a partial update and advances `updated_at`. Fails
    /// `TaskNotFound` for an unknown id.
    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task>;

    /// Sets the task status, returning `None` (not an error) for an unknown
    /// id.
    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<Option<Task>>;
}
