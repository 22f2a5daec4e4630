use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::llm::ModelRunner;
use crate::schemas::{plan_schema, PlanStep, ReactEntry};
use crate::store::{
    NewSession, SessionPatch, SessionStatus, Store, Task, TaskStatus,
};

use super::prompts::{planning_prompt, refinement_prompt};
use super::react::run_react_loop;

#[derive(Debug, Clone)]
pub struct PlanningRequest {
    pub prompt: String,
    pub repo_url: String,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    pub status: SessionStatus,
    pub log: Vec<ReactEntry>,
}

/// Plan-and-execute agent: turns a goal into an ordered task list, then
/// drives each task through a tool-calling ReAct loop until the session
/// completes, fails, or overruns its deadline.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    runner: Arc<dyn ModelRunner>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, runner: Arc<dyn ModelRunner>) -> Self {
        Self { store, runner }
    }

    /// Creates a session, asks the model for an ordered plan, persists each
    /// step as a task and the whole list as the session's plan snapshot.
    /// The session is left in `AWAITING_CONFIRMATION`.
    pub async fn start_planning(&self, request: PlanningRequest) -> Result<Vec<Task>> {
        let session = self
            .store
            .create_session(NewSession {
                status: SessionStatus::Planning,
                deadline: request.deadline,
            })
            .await?;
        info!(session_id = %session.id, "planning session started");

        let prompt = planning_prompt(&request.prompt, &request.repo_url);
        let steps = self.generate_plan(&prompt).await?;

        let mut tasks = Vec::with_capacity(steps.len());
        for step in &steps {
            tasks.push(
                self.store
                    .insert_task(&session.id, &step.description, None)
                    .await?,
            );
        }

        let raw_plan = serde_json::to_string(&tasks)?;
        self.store
            .update_session(
                &session.id,
                SessionPatch::status(SessionStatus::AwaitingConfirmation).with_raw_plan(raw_plan),
            )
            .await?;

        info!(session_id = %session.id, tasks = tasks.len(), "plan stored");
        Ok(tasks)
    }

    /// Replaces the session's plan with a revision of it. Existing tasks are
    /// kept in the store; the new steps are appended as fresh tasks and
    /// become the session's plan snapshot wholesale.
    pub async fn refine_plan(&self, session_id: &str, refinement: &str) -> Result<Vec<Task>> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;

        let existing = self.store.list_tasks(&session.id).await?;
        let prompt = refinement_prompt(&existing, refinement);
        let steps = self.generate_plan(&prompt).await?;

        let mut tasks = Vec::with_capacity(steps.len());
        for step in &steps {
            tasks.push(
                self.store
                    .insert_task(&session.id, &step.description, None)
                    .await?,
            );
        }

        let raw_plan = serde_json::to_string(&tasks)?;
        self.store
            .update_session(&session.id, SessionPatch::default().with_raw_plan(raw_plan))
            .await?;

        info!(session_id = %session.id, tasks = tasks.len(), "plan refined");
        Ok(tasks)
    }

    /// Runs the confirmed plan to a terminal session status, returning it
    /// together with every react entry produced along the way.
    pub async fn execute_plan(&self, session_id: &str) -> Result<ExecutionReport> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;

        if session.status != SessionStatus::AwaitingConfirmation {
            return Err(CoreError::SessionStateInvalid(format!(
                "session {session_id} is {}, expected {}",
                session.status,
                SessionStatus::AwaitingConfirmation
            )));
        }
        self.store
            .update_session(session_id, SessionPatch::status(SessionStatus::Executing))
            .await?;

        let mut plan = self.seed_plan(&session.raw_plan, session_id).await?;
        let mut log: Vec<ReactEntry> = Vec::new();

        let final_status = loop {
            if let Some(deadline) = session.deadline {
                if Utc::now() > deadline {
                    warn!(session_id, "session deadline exceeded");
                    self.store
                        .update_session(
                            session_id,
                            SessionPatch::status(SessionStatus::DeadlineExceeded),
                        )
                        .await?;
                    break SessionStatus::DeadlineExceeded;
                }
            }

            let Some(slot) = plan.iter().position(|t| t.status == TaskStatus::Pending) else {
                self.store
                    .update_session(session_id, SessionPatch::status(SessionStatus::Completed))
                    .await?;
                break SessionStatus::Completed;
            };

            let task = plan[slot].clone();
            info!(session_id, task_id = %task.id, position = task.position, "executing task");
            self.store
                .update_task_status(&task.id, TaskStatus::InProgress)
                .await?;
            plan[slot].status = TaskStatus::InProgress;

            let outcome =
                match run_react_loop(self.store.as_ref(), self.runner.as_ref(), &task).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        self.store
                            .update_task_status(&task.id, TaskStatus::Failed)
                            .await?;
                        self.store
                            .update_session(session_id, SessionPatch::status(SessionStatus::Failed))
                            .await?;
                        return Err(e);
                    }
                };

            log.extend(outcome.entries);
            self.store
                .update_task_status(&task.id, outcome.status)
                .await?;
            plan[slot].status = outcome.status;
        };

        Ok(ExecutionReport {
            status: final_status,
            log,
        })
    }

    async fn generate_plan(&self, prompt: &str) -> Result<Vec<PlanStep>> {
        let schema = plan_schema();
        let raw = self.runner.generate_json(prompt, Some(&schema)).await?;
        serde_json::from_value(raw).map_err(|e| {
            CoreError::PlanParseFailed(format!("model output does not describe a plan: {e}"))
        })
    }

    /// Seeds execution from the session's plan snapshot, falling back to the
    /// task store when the snapshot is absent or unreadable.
    async fn seed_plan(&self, raw_plan: &Option<String>, session_id: &str) -> Result<Vec<Task>> {
        if let Some(raw) = raw_plan.as_deref() {
            match serde_json::from_str::<Vec<Task>>(raw) {
                Ok(plan) => return Ok(plan),
                Err(e) => warn!(session_id, %e, "unreadable plan snapshot, falling back to task store"),
            }
        }
        self.store.list_tasks(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use crate::llm::FakeModelRunner;
    use crate::schemas::{ModelResponse, ToolCall};
    use crate::store::MemoryStore;
    use crate::tools::ToolRegistry;

    use super::*;

    fn tool_call_response(calls: Vec<ToolCall>) -> ModelResponse {
        ModelResponse {
            content: None,
            tool_calls: calls,
            provider: "fake".into(),
            model: "fake-model".into(),
            usage: None,
        }
    }

    fn orchestrator_with(fake: FakeModelRunner) -> (Arc<MemoryStore>, Arc<FakeModelRunner>, Orchestrator) {
        let store = Arc::new(MemoryStore::new());
        let runner = Arc::new(fake);
        let orchestrator = Orchestrator::new(store.clone(), runner.clone());
        (store, runner, orchestrator)
    }

    fn fake() -> FakeModelRunner {
        FakeModelRunner::new(Arc::new(ToolRegistry::standard()))
    }

    /// Creates a confirmed session with the given pending tasks, the way
    /// planning would have left it.
    async fn confirmed_session(
        store: &MemoryStore,
        descriptions: &[&str],
        deadline: Option<DateTime<Utc>>,
    ) -> String {
        let session = store
            .create_session(NewSession {
                status: SessionStatus::Planning,
                deadline,
            })
            .await
            .unwrap();
        for description in descriptions {
            store
                .insert_task(&session.id, description, None)
                .await
                .unwrap();
        }
        store
            .update_session(
                &session.id,
                SessionPatch::status(SessionStatus::AwaitingConfirmation),
            )
            .await
            .unwrap();
        session.id
    }

    #[tokio::test]
    async fn planning_stores_ordered_tasks_and_snapshot() {
        let (store, _, orchestrator) = orchestrator_with(
            fake().with_response(r#"[{"description":"Task 1"},{"description":"Task 2"}]"#),
        );

        let tasks = orchestrator
            .start_planning(PlanningRequest {
                prompt: "Create a simple web server".into(),
                repo_url: "https://github.com/test/repo".into(),
                deadline: None,
            })
            .await
            .unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(
            tasks.iter().map(|t| t.position).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(tasks[0].description, "Task 1");

        let session = store.session(&tasks[0].session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::AwaitingConfirmation);

        let snapshot: Vec<Task> =
            serde_json::from_str(session.raw_plan.as_deref().unwrap()).unwrap();
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            serde_json::to_value(&tasks).unwrap()
        );
    }

    #[tokio::test]
    async fn planning_accepts_fenced_json() {
        let (_, _, orchestrator) = orchestrator_with(
            fake().with_response("```json\n[{\"description\":\"Only task\"}]\n```"),
        );

        let tasks = orchestrator
            .start_planning(PlanningRequest {
                prompt: "goal".into(),
                repo_url: "https://example.com/repo".into(),
                deadline: None,
            })
            .await
            .unwrap();

        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn unparseable_plan_fails_with_plan_parse_error() {
        let (_, _, orchestrator) = orchestrator_with(fake().with_response("not json at all"));

        let err = orchestrator
            .start_planning(PlanningRequest {
                prompt: "goal".into(),
                repo_url: "https://example.com/repo".into(),
                deadline: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::PlanParseFailed(_)));
    }

    #[tokio::test]
    async fn execution_completes_on_task_complete_sentinel() {
        let (store, runner, orchestrator) = orchestrator_with(
            fake()
                .with_tool_response(tool_call_response(vec![ToolCall::new(
                    "call_1",
                    "run_shell_command",
                    json!({"command": "ls -l"}),
                )]))
                .with_response("TASK_COMPLETE"),
        );
        let session_id = confirmed_session(&store, &["List the repository files"], None).await;

        let report = orchestrator.execute_plan(&session_id).await.unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.log.len(), 2);

        let first = &report.log[0];
        assert_eq!(first.tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(first.tool_results.as_ref().unwrap().len(), 1);
        assert_eq!(
            first.tool_results.as_ref().unwrap()[0].tool_call_id,
            "call_1"
        );
        assert!(report.log[1]
            .content
            .as_deref()
            .unwrap()
            .contains("TASK_COMPLETE"));

        let tasks = store.list_tasks(&session_id).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(runner.calls().len(), 2);

        let session = store.session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn expired_deadline_short_circuits_before_any_model_call() {
        let (store, runner, orchestrator) = orchestrator_with(fake());
        let session_id = confirmed_session(
            &store,
            &["Never executed"],
            Some(Utc::now() - Duration::seconds(1)),
        )
        .await;

        let report = orchestrator.execute_plan(&session_id).await.unwrap();

        assert_eq!(report.status, SessionStatus::DeadlineExceeded);
        assert!(report.log.is_empty());
        assert!(runner.calls().is_empty());

        let session = store.session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::DeadlineExceeded);
    }

    #[tokio::test]
    async fn unknown_tool_failure_stays_inside_the_loop() {
        let (store, _, orchestrator) = orchestrator_with(
            fake()
                .with_tool_response(tool_call_response(vec![ToolCall::new(
                    "call_1",
                    "unknown_tool",
                    json!({}),
                )]))
                .with_response("TASK_COMPLETE"),
        );
        let session_id = confirmed_session(&store, &["Try an unknown tool"], None).await;

        let report = orchestrator.execute_plan(&session_id).await.unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(
            report.log[0].tool_results.as_ref().unwrap()[0].result,
            json!({"error": "Unknown tool: unknown_tool"})
        );
    }

    #[tokio::test]
    async fn execution_requires_awaiting_confirmation() {
        let (store, runner, orchestrator) = orchestrator_with(fake());
        let session = store
            .create_session(NewSession {
                status: SessionStatus::Planning,
                deadline: None,
            })
            .await
            .unwrap();

        let err = orchestrator.execute_plan(&session.id).await.unwrap_err();

        assert!(matches!(err, CoreError::SessionStateInvalid(_)));
        assert!(runner.calls().is_empty());

        let reloaded = store.session(&session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Planning);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let (_, _, orchestrator) = orchestrator_with(fake());

        let err = orchestrator.execute_plan("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn safety_bound_fails_the_task_after_51_entries() {
        // every react prompt matches the pattern, so the model never emits
        // the sentinel and the loop has to trip its fuse
        let (store, _, orchestrator) =
            orchestrator_with(fake().with_pattern("Task:", "still working"));
        let session_id = confirmed_session(&store, &["Loop forever"], None).await;

        let report = orchestrator.execute_plan(&session_id).await.unwrap();

        assert_eq!(report.log.len(), 51);
        let tasks = store.list_tasks(&session_id).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        // the session itself still drains its plan
        assert_eq!(report.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn model_failure_fails_task_and_session_and_surfaces() {
        let (store, _, orchestrator) = orchestrator_with(fake());
        let session_id = confirmed_session(&store, &["No canned response"], None).await;

        let err = orchestrator.execute_plan(&session_id).await.unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));

        let tasks = store.list_tasks(&session_id).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        let session = store.session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn react_history_is_persisted_per_iteration_and_resumed() {
        let (store, _, orchestrator) = orchestrator_with(fake().with_response("TASK_COMPLETE"));
        let session_id = confirmed_session(&store, &["Resume me"], None).await;

        let tasks = store.list_tasks(&session_id).await.unwrap();
        let prior = vec![ReactEntry {
            content: Some("earlier partial work".into()),
            ..Default::default()
        }];
        store
            .update_task(
                &tasks[0].id,
                crate::store::TaskPatch::react_history(serde_json::to_string(&prior).unwrap()),
            )
            .await
            .unwrap();

        let report = orchestrator.execute_plan(&session_id).await.unwrap();

        // only the new entry lands in the report's log
        assert_eq!(report.log.len(), 1);
        let stored = store.list_tasks(&session_id).await.unwrap();
        let history: Vec<ReactEntry> =
            serde_json::from_str(stored[0].react_history.as_deref().unwrap()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content.as_deref(), Some("earlier partial work"));
    }

    #[tokio::test]
    async fn refinement_replaces_the_plan_wholesale() {
        let (store, _, orchestrator) = orchestrator_with(
            fake()
                .with_response(r#"[{"description":"Old 1"},{"description":"Old 2"}]"#)
                .with_response(r#"[{"description":"New 1"},{"description":"New 2"}]"#),
        );

        let original = orchestrator
            .start_planning(PlanningRequest {
                prompt: "goal".into(),
                repo_url: "https://example.com/repo".into(),
                deadline: None,
            })
            .await
            .unwrap();
        let session_id = original[0].session_id.clone();

        let revised = orchestrator
            .refine_plan(&session_id, "split differently")
            .await
            .unwrap();

        assert_eq!(revised.len(), 2);
        assert_eq!(
            revised.iter().map(|t| t.position).collect::<Vec<_>>(),
            vec![2, 3]
        );

        let session = store.session(&session_id).await.unwrap().unwrap();
        let snapshot: Vec<Task> =
            serde_json::from_str(session.raw_plan.as_deref().unwrap()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|t| t.description.starts_with("New")));
    }

    #[tokio::test]
    async fn refining_an_unknown_session_fails() {
        let (_, _, orchestrator) = orchestrator_with(fake());

        let err = orchestrator.refine_plan("missing", "whatever").await.unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn tasks_execute_in_plan_order() {
        let (store, _, orchestrator) = orchestrator_with(
            fake()
                .with_response("TASK_COMPLETE")
                .with_response("TASK_COMPLETE"),
        );
        let session_id = confirmed_session(&store, &["first", "second"], None).await;

        let report = orchestrator.execute_plan(&session_id).await.unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        let tasks = store.list_tasks(&session_id).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
        // each completed task went through IN_PROGRESS and was updated after
        // its predecessor
        assert!(tasks[1].updated_at >= tasks[0].updated_at);
    }
}
