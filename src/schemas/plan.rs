use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One step of a generated plan, as the model is asked to emit it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(description = "A single development task")]
pub struct PlanStep {
    #[schemars(description = "What this task should accomplish")]
    pub description: String,
}

/// JSON schema for a whole plan (`[{"description": ...}]`), with subschemas
/// inlined so it can be handed to a model verbatim.
pub fn plan_schema() -> serde_json::Value {
    let mut settings = schemars::gen::SchemaSettings::draft07();
    settings.inline_subschemas = true;
    let schema = settings.into_generator().into_root_schema_for::<Vec<PlanStep>>();
    serde_json::to_value(schema).expect("plan schema serializes")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn plan_steps_deserialize_from_model_array() {
        let raw = json!([{"description": "Task 1"}, {"description": "Task 2"}]);

        let steps: Vec<PlanStep> = serde_json::from_value(raw).unwrap();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].description, "Task 1");
    }

    #[test]
    fn plan_schema_is_an_array_of_described_objects() {
        let schema = plan_schema();

        assert_eq!(schema["type"], "array");
        let step = &schema["items"];
        assert_eq!(step["type"], "object");
        assert!(step["properties"]["description"].is_object());
    }
}
