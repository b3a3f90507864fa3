//! Typed results of the planner and architect stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A file the project needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct File {
    /// Path of the file to create, relative to the project root.
    pub path: String,
    /// What the file is for.
    pub purpose: String,
}

/// An engineering project plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// Name of the app to build.
    pub name: String,
    /// One-paragraph description of the app.
    pub description: String,
    /// Tech stack, e.g. "HTML, CSS, JavaScript".
    pub techstack: String,
    /// User-facing features.
    pub features: Vec<String>,
    /// Every file to create, with its purpose.
    pub files: Vec<File>,
}

/// One step of the implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImplementationTask {
    /// Path of the file this step modifies.
    pub filepath: String,
    /// Detailed description of what to implement in that file.
    pub task_description: String,
}

/// Ordered implementation steps for a plan.
///
/// Fields carried forward from earlier stages (the original `plan`) land in
/// `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskPlan {
    /// Steps in dependency order.
    pub implementation_steps: Vec<ImplementationTask>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskPlan {
    /// The plan this task plan was derived from, if it was carried forward.
    pub fn plan(&self) -> Option<Plan> {
        self.extra
            .get("plan")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagecraft_core::schema::Schema;
    use stagecraft_test_utils::{calculator_plan, calculator_task_plan};

    #[test]
    fn test_plan_schema_from_type() {
        let schema = Schema::from_type::<Plan>().unwrap();
        assert_eq!(schema.name(), "Plan");
        for field in ["name", "description", "techstack", "features", "files"] {
            assert!(schema.field(field).unwrap().required, "{field} should be required");
        }
        assert!(schema.validate(calculator_plan()).is_ok());
    }

    #[test]
    fn test_task_plan_schema_tolerates_extra() {
        let schema = Schema::from_type::<TaskPlan>().unwrap();
        assert_eq!(schema.name(), "TaskPlan");
        assert_eq!(schema.fields().len(), 1);

        let mut raw = calculator_task_plan();
        raw["notes"] = json!("keep it small");
        let typed = schema.validate(raw).unwrap();
        assert_eq!(typed.extension("notes"), Some(&json!("keep it small")));
    }

    #[test]
    fn test_task_plan_carries_plan() {
        let mut raw = calculator_task_plan();
        raw["plan"] = calculator_plan();
        let task_plan: TaskPlan = serde_json::from_value(raw).unwrap();

        let plan = task_plan.plan().unwrap();
        assert_eq!(plan.name, "Simple Calculator");
        assert_eq!(plan.files.len(), 3);
        assert_eq!(task_plan.implementation_steps[0].filepath, "index.html");
    }
}
