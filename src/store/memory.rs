use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, Result};

use super::{
    NewSession, Session, SessionPatch, Store, Task, TaskPatch, TaskStatus,
};

/// In-memory store with the same semantics as the Postgres-backed one.
/// Used by the test suite and by ephemeral runs that need no durability.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    tasks: HashMap<String, Task>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<MemoryStore> for Arc<dyn Store> {
    fn from(val: MemoryStore) -> Self {
        Arc::new(val)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_session(&self, new_session: NewSession) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            status: new_session.status,
            created_at: Utc::now(),
            deadline: new_session.deadline,
            raw_plan: None,
        };

        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn session(&self, id: &str) -> Result<Option<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(id).cloned())
    }

    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<Session> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;

        if let Some(next) = patch.status {
            if !session.status.can_transition_to(next) {
                return Err(CoreError::SessionStateInvalid(format!(
                    "session {id} cannot move from {} to {next}",
                    session.status
                )));
            }
            session.status = next;
        }
        if let Some(raw_plan) = patch.raw_plan {
            session.raw_plan = Some(raw_plan);
        }

        Ok(session.clone())
    }

    async fn list_sessions(&self, limit: Option<i64>) -> Result<Vec<Session>> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            sessions.truncate(limit.max(0) as usize);
        }
        Ok(sessions)
    }

    async fn list_tasks(&self, session_id: &str) -> Result<Vec<Task>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.position);
        Ok(tasks)
    }

    async fn insert_task(
        &self,
        session_id: &str,
        description: &str,
        position: Option<i32>,
    ) -> Result<Task> {
        if description.is_empty() {
            return Err(CoreError::internal("task description must not be empty"));
        }

        let mut inner = self.inner.lock().await;
        if !inner.sessions.contains_key(session_id) {
            return Err(CoreError::SessionNotFound(session_id.to_string()));
        }

        let position = position.unwrap_or_else(|| {
            inner
                .tasks
                .values()
                .filter(|t| t.session_id == session_id)
                .map(|t| t.position + 1)
                .max()
                .unwrap_or(0)
        });

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            position,
            description: description.to_string(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            react_history: None,
        };
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let mut inner = self.inner.lock().await;
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))?;

        apply_task_patch(task, patch);
        Ok(task.clone())
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<Option<Task>> {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(id) else {
            return Ok(None);
        };

        task.status = status;
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }
}

fn apply_task_patch(task: &mut Task, patch: TaskPatch) {
    if let Some(description) = patch.description {
        task.description = description;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(react_history) = patch.react_history {
        task.react_history = Some(react_history);
    }
    task.updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
    use super::super::SessionStatus;
    use super::*;

    async fn session_with_store() -> (MemoryStore, Session) {
        let store = MemoryStore::new();
        let session = store
            .create_session(NewSession {
                status: SessionStatus::Planning,
                deadline: None,
            })
            .await
            .unwrap();
        (store, session)
    }

    #[tokio::test]
    async fn task_positions_ascend_from_zero() {
        let (store, session) = session_with_store().await;

        for description in ["first", "second", "third"] {
            store
                .insert_task(&session.id, description, None)
                .await
                .unwrap();
        }

        let tasks = store.list_tasks(&session.id).await.unwrap();
        let positions: Vec<i32> = tasks.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn explicit_position_respected() {
        let (store, session) = session_with_store().await;

        store.insert_task(&session.id, "a", Some(7)).await.unwrap();
        let next = store.insert_task(&session.id, "b", None).await.unwrap();

        assert_eq!(next.position, 8);
    }

    #[tokio::test]
    async fn insert_into_unknown_session_fails() {
        let store = MemoryStore::new();

        let err = store.insert_task("nope", "task", None).await.unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn empty_description_rejected() {
        let (store, session) = session_with_store().await;

        assert!(store.insert_task(&session.id, "", None).await.is_err());
    }

    #[tokio::test]
    async fn status_update_round_trips_and_advances_updated_at() {
        let (store, session) = session_with_store().await;
        let task = store.insert_task(&session.id, "task", None).await.unwrap();

        let updated = store
            .update_task_status(&task.id, TaskStatus::InProgress)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, TaskStatus::InProgress);
        assert!(updated.updated_at >= task.updated_at);

        let listed = store.list_tasks(&session.id).await.unwrap();
        assert_eq!(listed[0].status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn status_update_on_unknown_task_returns_none() {
        let store = MemoryStore::new();

        let result = store
            .update_task_status("missing", TaskStatus::Completed)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn update_session_rejects_unknown_id() {
        let store = MemoryStore::new();

        let err = store
            .update_session("missing", SessionPatch::status(SessionStatus::Executing))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn terminal_session_status_is_immutable() {
        let (store, session) = session_with_store().await;
        store
            .update_session(
                &session.id,
                SessionPatch::status(SessionStatus::AwaitingConfirmation),
            )
            .await
            .unwrap();
        store
            .update_session(&session.id, SessionPatch::status(SessionStatus::Executing))
            .await
            .unwrap();
        store
            .update_session(&session.id, SessionPatch::status(SessionStatus::Completed))
            .await
            .unwrap();

        let err = store
            .update_session(&session.id, SessionPatch::status(SessionStatus::Executing))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SessionStateInvalid(_)));
    }

    #[tokio::test]
    async fn raw_plan_is_replaced_wholesale() {
        let (store, session) = session_with_store().await;

        store
            .update_session(
                &session.id,
                SessionPatch::default().with_raw_plan("[\"a\"]"),
            )
            .await
            .unwrap();
        let updated = store
            .update_session(
                &session.id,
                SessionPatch::default().with_raw_plan("[\"b\"]"),
            )
            .await
            .unwrap();

        assert_eq!(updated.raw_plan.as_deref(), Some("[\"b\"]"));
    }

    #[tokio::test]
    async fn list_sessions_newest_first_with_limit() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.create_session(NewSession::default()).await.unwrap();
        }

        let sessions = store.list_sessions(Some(2)).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].created_at >= sessions[1].created_at);
    }
}
