use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, Result};

use super::{
    NewSession, Session, SessionPatch, Store, Task, TaskPatch, TaskStatus,
};

const SESSION_COLUMNS: &str = "id, status, created_at, deadline, raw_plan";
const TASK_COLUMNS: &str =
    "id, session_id, position, description, status, created_at, updated_at, react_history";

/// Postgres-backed store. The reference DDL lives in `db/schema.sql`;
/// applying it is the deployment's concern.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_session(&self, new_session: NewSession) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        debug!(session_id = %id, status = %new_session.status, "creating session");

        let session = sqlx::query_as::<_, Session>(&format!(
            "INSERT INTO sessions (id, status, created_at, deadline) \
             VALUES ($1, $2, $3, $4) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(&id)
        .bind(new_session.status)
        .bind(Utc::now())
        .bind(new_session.deadline)
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    async fn session(&self, id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<Session> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;

        if let Some(next) = patch.status {
            if !current.status.can_transition_to(next) {
                return Err(CoreError::SessionStateInvalid(format!(
                    "session {id} cannot move from {} to {next}",
                    current.status
                )));
            }
        }

        debug!(session_id = %id, status = ?patch.status, "updating session");
        let updated = sqlx::query_as::<_, Session>(&format!(
            "UPDATE sessions SET status = COALESCE($2, status), \
             raw_plan = COALESCE($3, raw_plan) WHERE id = $1 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id)
        .bind(patch.status)
        .bind(patch.raw_plan)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn list_sessions(&self, limit: Option<i64>) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC \
             LIMIT $1"
        ))
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn list_tasks(&self, session_id: &str) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE session_id = $1 ORDER BY position ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

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

        // Locking the session row serializes per-session inserts so the
        // max(position) + 1 read stays monotonic under concurrency.
        let mut tx = self.pool.begin().await?;
        let session_exists = sqlx::query_scalar::<_, String>(
            "SELECT id FROM sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;
        if session_exists.is_none() {
            return Err(CoreError::SessionNotFound(session_id.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        debug!(session_id, task_id = %id, "inserting task");
        let now = Utc::now();
        let task = sqlx::query_as::<_, Task>(&format!(
            "INSERT INTO tasks (id, session_id, position, description, status, created_at, updated_at) \
             VALUES ($1, $2, \
                     COALESCE($3, (SELECT COALESCE(MAX(position) + 1, 0) FROM tasks WHERE session_id = $2)), \
                     $4, $5, $6, $6) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&id)
        .bind(session_id)
        .bind(position)
        .bind(description)
        .bind(TaskStatus::Pending)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET description = COALESCE($2, description), \
             status = COALESCE($3, status), \
             react_history = COALESCE($4, react_history), \
             updated_at = $5 \
             WHERE id = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(patch.description)
        .bind(patch.status)
        .bind(patch.react_history)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))?;

        Ok(task)
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<Option<Task>> {
        debug!(task_id = %id, %status, "updating task status");
        let task = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET status = $2, updated_at = $3 WHERE id = $1 \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::super::SessionStatus;
    use super::*;

    async fn connect() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgStore::connect(&url).await.unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn session_and_task_round_trip() {
        let store = connect().await;

        let session = store
            .create_session(NewSession {
                status: SessionStatus::Planning,
                deadline: None,
            })
            .await
            .unwrap();

        let a = store.insert_task(&session.id, "first", None).await.unwrap();
        let b = store.insert_task(&session.id, "second", None).await.unwrap();
        assert_eq!((a.position, b.position), (0, 1));

        let tasks = store.list_tasks(&session.id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].description, "first");

        let reloaded = store.session(&session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Planning);
    }

    #[tokio::test]
    #[ignore]
    async fn status_transition_enforced_in_database() {
        let store = connect().await;

        let session = store
            .create_session(NewSession {
                status: SessionStatus::Planning,
                deadline: None,
            })
            .await
            .unwrap();

        let err = store
            .update_session(&session.id, SessionPatch::status(SessionStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SessionStateInvalid(_)));
    }
}
