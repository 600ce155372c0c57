use serde::{Deserialize, Serialize};

use crate::node::{ProblemType, SolutionState};

/// Request shape for creating or updating a problem node.
///
/// When `id` is set and resolves to an existing problem in the current
/// snapshot, `create_solution` clones that subtree (ids preserved) instead of
/// creating a fresh node; the remaining fields are then ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub significance: String,
    pub criteria: String,
    #[serde(default = "default_problem_type")]
    pub problem_type: ProblemType,
}

fn default_problem_type() -> ProblemType {
    ProblemType::Implementation
}

impl ProblemRequest {
    pub fn new(
        title: impl Into<String>,
        significance: impl Into<String>,
        criteria: impl Into<String>,
        problem_type: ProblemType,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            significance: significance.into(),
            criteria: criteria.into(),
            problem_type,
        }
    }
}

/// Request shape for creating or updating a solution. On update, `None`
/// fields keep their previous values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolutionRequest {
    pub title: String,
    #[serde(default)]
    pub top_level_thoughts: Option<String>,
    #[serde(default)]
    pub implementation_plan: Option<String>,
    #[serde(default)]
    pub plan_justification: Option<String>,
    #[serde(default)]
    pub state: Option<SolutionState>,
    #[serde(default)]
    pub final_report: Option<String>,
    #[serde(default)]
    pub children: Option<Vec<ProblemRequest>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetSelectedSolutionRequest {
    #[serde(default)]
    pub solution_id: Option<String>,
}
