use indoc::formatdoc;

use crate::schemas::ReactEntry;
use crate::store::Task;

/// Most-recent history entries included verbatim in a ReAct prompt; older
/// entries collapse into a single summary line.
pub(crate) const MAX_HISTORY_ITEMS: usize = 5;

/// Termination sentinel the model is instructed to emit when a task is done.
pub(crate) const TASK_COMPLETE_SENTINEL: &str = "TASK_COMPLETE";

pub(crate) fn planning_prompt(goal: &str, repo_url: &str) -> String {
    formatdoc! {"
        You are planning development work on the repository {repo_url}.
        Break the following goal into a short, ordered list of concrete tasks.

        Goal: {goal}

        Respond with a JSON array of objects, each with a single \"description\" string."}
}

pub(crate) fn refinement_prompt(existing: &[Task], refinement: &str) -> String {
    let current = existing
        .iter()
        .map(|t| t.description.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    formatdoc! {"
        The current plan is: {current}

        Revise the plan according to this instruction: {refinement}

        Respond with the full revised plan as a JSON array of objects, each with a
        single \"description\" string."}
}

pub(crate) fn react_prompt(description: &str, history: &[ReactEntry]) -> String {
    let mut prompt = formatdoc! {"
        You are executing one step of a development plan.

        Task: {description}
    "};

    if history.len() > MAX_HISTORY_ITEMS {
        let elided = history.len() - MAX_HISTORY_ITEMS;
        prompt.push_str(&format!(
            "\n{elided} earlier actions were taken and are omitted here.\n"
        ));
    }
    let window = &history[history.len().saturating_sub(MAX_HISTORY_ITEMS)..];
    if !window.is_empty() {
        prompt.push_str("\nRecent actions:\n");
        for entry in window {
            prompt.push_str(&format!("- {}\n", entry.summary_line()));
        }
    }

    prompt.push_str(&formatdoc! {"

        Use the available tools as needed. When the task is fully complete, reply
        with {TASK_COMPLETE_SENTINEL}."});
    prompt
}
