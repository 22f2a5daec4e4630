use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::llm::ModelRunner;
use crate::schemas::{decode_history, encode_history, ReactEntry};
use crate::store::{Store, Task, TaskPatch, TaskStatus};

use super::prompts::{react_prompt, TASK_COMPLETE_SENTINEL};

/// Hard safety bound on ReAct iterations per task. A task that has not
/// emitted the completion sentinel after this many entries is failed.
pub(crate) const MAX_LOOP_STEPS: usize = 50;

pub(crate) struct ReactOutcome {
    pub status: TaskStatus,
    /// Entries produced by this run (excluding any resumed history).
    pub entries: Vec<ReactEntry>,
}

/// Drives one task's reason-act dialogue to termination.
///
/// The loop is strictly sequential; each entry is persisted before the next
/// generation request, so a crash resumes at the following step. Tool
/// failures stay inside tool results; a model-runner error propagates after
/// the caller marks the task failed.
pub(crate) async fn run_react_loop(
    store: &dyn Store,
    runner: &dyn ModelRunner,
    task: &Task,
) -> Result<ReactOutcome> {
    let mut history = decode_history(task.react_history.as_deref()).map_err(|e| {
        CoreError::internal(format!("corrupt react history for task {}: {e}", task.id))
    })?;
    let resumed_at = history.len();
    if resumed_at > 0 {
        debug!(task_id = %task.id, entries = resumed_at, "resuming react loop from persisted history");
    }

    loop {
        let prompt = react_prompt(&task.description, &history);
        let response = runner.generate_with_tools(&prompt).await?;

        let tool_calls = (!response.tool_calls.is_empty()).then(|| response.tool_calls.clone());
        let tool_results = match &tool_calls {
            Some(calls) => Some(runner.execute_tool_calls(calls).await),
            None => None,
        };
        let observation = tool_results
            .as_ref()
            .map(|results| Value::Array(results.iter().map(|r| r.result.clone()).collect()));

        // an entry always carries content or tool calls; a degenerate empty
        // response is recorded as empty content
        let content = match (&response.content, &tool_calls) {
            (None, None) => Some(String::new()),
            _ => response.content.clone(),
        };
        history.push(ReactEntry {
            tool_calls,
            tool_results,
            content,
            observation,
        });
        store
            .update_task(&task.id, TaskPatch::react_history(encode_history(&history)?))
            .await?;

        let completed = response
            .content
            .as_deref()
            .is_some_and(|c| c.contains(TASK_COMPLETE_SENTINEL));
        if completed {
            debug!(task_id = %task.id, steps = history.len(), "task signalled completion");
            return Ok(ReactOutcome {
                status: TaskStatus::Completed,
                entries: history.split_off(resumed_at),
            });
        }
        if history.len() > MAX_LOOP_STEPS {
            warn!(task_id = %task.id, steps = history.len(), "react loop hit the safety bound");
            return Ok(ReactOutcome {
                status: TaskStatus::Failed,
                entries: history.split_off(resumed_at),
            });
        }
    }
}
