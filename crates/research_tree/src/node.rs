use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Problem,
    Solution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Implementation,
    /// A yes/no hypothesis. Conditional problems may not own solutions.
    Conditional,
}

impl ProblemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemType::Implementation => "implementation",
            ProblemType::Conditional => "conditional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionState {
    Success,
    Failure,
    InProgress,
}

impl SolutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolutionState::Success => "success",
            SolutionState::Failure => "failure",
            SolutionState::InProgress => "in_progress",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemNode {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub problem_type: ProblemType,
    #[serde(default)]
    pub selected_solution_id: Option<String>,
    pub significance: String,
    pub criteria: String,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl ProblemNode {
    pub fn new(
        title: impl Into<String>,
        problem_type: ProblemType,
        significance: impl Into<String>,
        criteria: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: Utc::now(),
            problem_type,
            selected_solution_id: None,
            significance: significance.into(),
            criteria: criteria.into(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionNode {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub top_level_thoughts: String,
    #[serde(default)]
    pub implementation_plan: String,
    #[serde(default)]
    pub plan_justification: String,
    pub state: SolutionState,
    #[serde(default)]
    pub final_report: Option<String>,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl SolutionNode {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: Utc::now(),
            top_level_thoughts: String::new(),
            implementation_plan: String::new(),
            plan_justification: String::new(),
            state: SolutionState::InProgress,
            final_report: None,
            children: Vec::new(),
        }
    }
}

/// A node of the research forest. Problem and solution levels strictly
/// alternate: problem children are solutions, solution children are problems.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Problem(ProblemNode),
    Solution(SolutionNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Problem(p) => &p.id,
            Node::Solution(s) => &s.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Node::Problem(p) => &p.title,
            Node::Solution(s) => &s.title,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Problem(_) => NodeKind::Problem,
            Node::Solution(_) => NodeKind::Solution,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Problem(p) => &p.children,
            Node::Solution(s) => &s.children,
        }
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        match self {
            Node::Problem(p) => &mut p.children,
            Node::Solution(s) => &mut s.children,
        }
    }

    pub fn as_problem(&self) -> Option<&ProblemNode> {
        match self {
            Node::Problem(p) => Some(p),
            Node::Solution(_) => None,
        }
    }

    pub fn as_problem_mut(&mut self) -> Option<&mut ProblemNode> {
        match self {
            Node::Problem(p) => Some(p),
            Node::Solution(_) => None,
        }
    }

    pub fn as_solution(&self) -> Option<&SolutionNode> {
        match self {
            Node::Solution(s) => Some(s),
            Node::Problem(_) => None,
        }
    }

    pub fn as_solution_mut(&mut self) -> Option<&mut SolutionNode> {
        match self {
            Node::Solution(s) => Some(s),
            Node::Problem(_) => None,
        }
    }
}
