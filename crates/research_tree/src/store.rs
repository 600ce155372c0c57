use std::collections::HashMap;

use serde::Serialize;

use crate::error::TreeError;
use crate::node::{Node, NodeKind, ProblemNode, ProblemType, SolutionNode};
use crate::request::{ProblemRequest, SolutionRequest};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Serialize)]
pub struct RelatedSolutions {
    pub ancestors: Vec<String>,
    pub descendants: Vec<String>,
    pub siblings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub kind: NodeKind,
    pub title: String,
}

/// In-memory store of immutable snapshots. Mutating commands clone the
/// current roots, apply the change and commit the clone under a fresh
/// snapshot id; `Node: Clone` is a deep copy that keeps node ids, which is
/// exactly the structural sharing the history needs.
pub struct ResearchTreeStore {
    snapshot_map: HashMap<String, Snapshot>,
    current_snapshot_id: String,
}

impl ResearchTreeStore {
    pub fn new() -> Self {
        let snapshot = Snapshot::empty();
        let current_snapshot_id = snapshot.id.clone();
        let mut snapshot_map = HashMap::new();
        snapshot_map.insert(current_snapshot_id.clone(), snapshot);
        Self {
            snapshot_map,
            current_snapshot_id,
        }
    }

    pub fn current(&self) -> &Snapshot {
        // The current id always points at a registered snapshot.
        &self.snapshot_map[&self.current_snapshot_id]
    }

    pub fn current_snapshot_id(&self) -> &str {
        &self.current_snapshot_id
    }

    pub fn snapshot(&self, id: &str) -> Option<&Snapshot> {
        self.snapshot_map.get(id)
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshot_map.len()
    }

    fn commit(&mut self, roots: Vec<Node>) -> Snapshot {
        let snapshot = Snapshot::new(roots);
        self.current_snapshot_id = snapshot.id.clone();
        self.snapshot_map
            .insert(snapshot.id.clone(), snapshot.clone());
        snapshot
    }

    /// Point the current snapshot at an already registered one (user
    /// rollback, project load).
    pub fn restore_snapshot(&mut self, snapshot_id: &str) -> Result<(), TreeError> {
        if !self.snapshot_map.contains_key(snapshot_id) {
            return Err(TreeError::SnapshotNotFound(snapshot_id.to_string()));
        }
        self.current_snapshot_id = snapshot_id.to_string();
        Ok(())
    }

    fn find_node<'a>(nodes: &'a [Node], node_id: &str) -> Option<&'a Node> {
        for node in nodes {
            if node.id() == node_id {
                return Some(node);
            }
            if let Some(found) = Self::find_node(node.children(), node_id) {
                return Some(found);
            }
        }
        None
    }

    fn find_node_mut<'a>(nodes: &'a mut [Node], node_id: &str) -> Option<&'a mut Node> {
        for node in nodes {
            if node.id() == node_id {
                return Some(node);
            }
            if let Some(found) = Self::find_node_mut(node.children_mut(), node_id) {
                return Some(found);
            }
        }
        None
    }

    fn find_parent<'a>(nodes: &'a [Node], node_id: &str) -> Option<&'a Node> {
        for node in nodes {
            if node.children().iter().any(|c| c.id() == node_id) {
                return Some(node);
            }
            if let Some(found) = Self::find_parent(node.children(), node_id) {
                return Some(found);
            }
        }
        None
    }

    fn find_parent_mut<'a>(nodes: &'a mut [Node], node_id: &str) -> Option<&'a mut Node> {
        for node in nodes {
            if node.children().iter().any(|c| c.id() == node_id) {
                return Some(node);
            }
            if let Some(found) = Self::find_parent_mut(node.children_mut(), node_id) {
                return Some(found);
            }
        }
        None
    }

    /// Build a problem node from a request. A request carrying the id of an
    /// existing problem reuses that subtree: the clone keeps every original
    /// id, so work already done below it survives the new solution.
    fn resolve_problem_request(&self, request: &ProblemRequest) -> ProblemNode {
        if let Some(id) = &request.id {
            if let Some(Node::Problem(existing)) = Self::find_node(&self.current().roots, id) {
                return existing.clone();
            }
        }
        ProblemNode::new(
            request.title.clone(),
            request.problem_type,
            request.significance.clone(),
            request.criteria.clone(),
        )
    }

    // ---------------- commands ----------------

    pub fn add_root_problem(&mut self, request: &ProblemRequest) -> Result<Snapshot, TreeError> {
        let mut roots = self.current().roots.clone();
        // Roots are always implementation problems.
        roots.push(Node::Problem(ProblemNode::new(
            request.title.clone(),
            ProblemType::Implementation,
            request.significance.clone(),
            request.criteria.clone(),
        )));
        Ok(self.commit(roots))
    }

    pub fn update_root_problem(
        &mut self,
        problem_id: &str,
        request: &ProblemRequest,
    ) -> Result<Snapshot, TreeError> {
        if request.problem_type == ProblemType::Conditional {
            return Err(TreeError::invalid("root problem cannot be conditional"));
        }
        let mut roots = self.current().roots.clone();
        let root = roots
            .iter_mut()
            .filter_map(Node::as_problem_mut)
            .find(|p| p.id == problem_id)
            .ok_or_else(|| TreeError::missing(format!("root problem {problem_id}")))?;
        root.title = request.title.clone();
        root.significance = request.significance.clone();
        root.criteria = request.criteria.clone();
        root.problem_type = request.problem_type;
        Ok(self.commit(roots))
    }

    pub fn delete_root_problem(&mut self, problem_id: &str) -> Result<Snapshot, TreeError> {
        let mut roots = self.current().roots.clone();
        let before = roots.len();
        roots.retain(|n| n.id() != problem_id);
        if roots.len() == before {
            return Err(TreeError::missing(format!("root problem {problem_id}")));
        }
        Ok(self.commit(roots))
    }

    pub fn create_solution(
        &mut self,
        problem_id: &str,
        request: &SolutionRequest,
    ) -> Result<Snapshot, TreeError> {
        // Resolve children against the pre-commit snapshot before any
        // mutation, so reuse-by-id sees the same tree the caller saw.
        let children: Vec<Node> = request
            .children
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|c| Node::Problem(self.resolve_problem_request(c)))
            .collect();

        let mut roots = self.current().roots.clone();
        let problem = Self::find_node_mut(&mut roots, problem_id)
            .and_then(Node::as_problem_mut)
            .ok_or_else(|| TreeError::missing(format!("problem {problem_id}")))?;
        if problem.problem_type == ProblemType::Conditional {
            return Err(TreeError::invalid("conditional problem cannot have solutions"));
        }

        let mut solution = SolutionNode::new(request.title.clone());
        solution.top_level_thoughts = request.top_level_thoughts.clone().unwrap_or_default();
        solution.implementation_plan = request.implementation_plan.clone().unwrap_or_default();
        solution.plan_justification = request.plan_justification.clone().unwrap_or_default();
        solution.children = children;

        problem.selected_solution_id = Some(solution.id.clone());
        problem.children.push(Node::Solution(solution));
        Ok(self.commit(roots))
    }

    pub fn update_solution(
        &mut self,
        solution_id: &str,
        request: &SolutionRequest,
    ) -> Result<Snapshot, TreeError> {
        let mut roots = self.current().roots.clone();
        let solution = Self::find_node_mut(&mut roots, solution_id)
            .and_then(Node::as_solution_mut)
            .ok_or_else(|| TreeError::missing(format!("solution {solution_id}")))?;
        if !request.title.is_empty() {
            solution.title = request.title.clone();
        }
        if let Some(v) = &request.top_level_thoughts {
            solution.top_level_thoughts = v.clone();
        }
        if let Some(v) = &request.implementation_plan {
            solution.implementation_plan = v.clone();
        }
        if let Some(v) = &request.plan_justification {
            solution.plan_justification = v.clone();
        }
        if let Some(v) = request.state {
            solution.state = v;
        }
        if let Some(v) = &request.final_report {
            solution.final_report = Some(v.clone());
        }
        Ok(self.commit(roots))
    }

    pub fn delete_solution(&mut self, solution_id: &str) -> Result<Snapshot, TreeError> {
        let mut roots = self.current().roots.clone();
        let parent = Self::find_parent_mut(&mut roots, solution_id)
            .ok_or_else(|| TreeError::missing(format!("solution {solution_id}")))?;
        // The parent's selected_solution_id is intentionally left as-is.
        parent.children_mut().retain(|c| c.id() != solution_id);
        Ok(self.commit(roots))
    }

    pub fn set_selected_solution(
        &mut self,
        problem_id: &str,
        solution_id: Option<&str>,
    ) -> Result<Snapshot, TreeError> {
        let mut roots = self.current().roots.clone();
        let problem = Self::find_node_mut(&mut roots, problem_id)
            .and_then(Node::as_problem_mut)
            .ok_or_else(|| TreeError::missing(format!("problem {problem_id}")))?;
        if let Some(solution_id) = solution_id {
            let is_child = problem
                .children
                .iter()
                .filter_map(Node::as_solution)
                .any(|s| s.id == solution_id);
            if !is_child {
                return Err(TreeError::invalid(
                    "selected solution is not a child of the problem",
                ));
            }
        }
        problem.selected_solution_id = solution_id.map(str::to_string);
        Ok(self.commit(roots))
    }

    pub fn update_problem(
        &mut self,
        problem_id: &str,
        request: &ProblemRequest,
    ) -> Result<Snapshot, TreeError> {
        let mut roots = self.current().roots.clone();
        let problem = Self::find_node_mut(&mut roots, problem_id)
            .and_then(Node::as_problem_mut)
            .ok_or_else(|| TreeError::missing(format!("problem {problem_id}")))?;
        problem.title = request.title.clone();
        problem.significance = request.significance.clone();
        problem.criteria = request.criteria.clone();
        problem.problem_type = request.problem_type;
        Ok(self.commit(roots))
    }

    // ---------------- queries ----------------

    pub fn node_summary(&self, node_id: &str) -> Result<NodeSummary, TreeError> {
        let node = Self::find_node(&self.current().roots, node_id)
            .ok_or_else(|| TreeError::missing(format!("node {node_id}")))?;
        Ok(NodeSummary {
            id: node.id().to_string(),
            kind: node.kind(),
            title: node.title().to_string(),
        })
    }

    pub fn parent_node_id(&self, node_id: &str) -> Result<String, TreeError> {
        Self::find_parent(&self.current().roots, node_id)
            .map(|n| n.id().to_string())
            .ok_or_else(|| TreeError::missing(format!("parent of {node_id}")))
    }

    pub fn root_problem_id(&self, node_id: &str) -> Result<String, TreeError> {
        for root in &self.current().roots {
            if Self::find_node(std::slice::from_ref(root), node_id).is_some() {
                return Ok(root.id().to_string());
            }
        }
        Err(TreeError::missing(format!("root of {node_id}")))
    }

    pub fn node_children_ids(
        &self,
        node_id: &str,
        only_implementation: bool,
    ) -> Result<Vec<String>, TreeError> {
        let node = Self::find_node(&self.current().roots, node_id)
            .ok_or_else(|| TreeError::missing(format!("node {node_id}")))?;
        Ok(node
            .children()
            .iter()
            .filter(|c| {
                if !only_implementation {
                    return true;
                }
                c.as_problem()
                    .map(|p| p.problem_type == ProblemType::Implementation)
                    .unwrap_or(false)
            })
            .map(|c| c.id().to_string())
            .collect())
    }

    pub fn selected_solution_id(&self, problem_id: &str) -> Result<Option<String>, TreeError> {
        let problem = Self::find_node(&self.current().roots, problem_id)
            .and_then(Node::as_problem)
            .ok_or_else(|| TreeError::missing(format!("problem {problem_id}")))?;
        if problem.problem_type != ProblemType::Implementation {
            return Err(TreeError::invalid(
                "only implementation problems carry a selected solution",
            ));
        }
        Ok(problem.selected_solution_id.clone())
    }

    pub fn node_id_by_title(&self, title: &str, kind: Option<NodeKind>) -> Option<String> {
        fn search(nodes: &[Node], title: &str, kind: Option<NodeKind>) -> Option<String> {
            for node in nodes {
                if node.title() == title && kind.map(|k| node.kind() == k).unwrap_or(true) {
                    return Some(node.id().to_string());
                }
                if let Some(found) = search(node.children(), title, kind) {
                    return Some(found);
                }
            }
            None
        }
        search(&self.current().roots, title, kind)
    }

    /// Indented one-line-per-node listing of the whole forest. Solutions are
    /// flagged against their parent problem's selected solution.
    pub fn compact_text_tree(&self) -> String {
        fn render(node: &Node, depth: usize, parent: Option<&ProblemNode>, lines: &mut Vec<String>) {
            let indent = "  ".repeat(depth);
            match node {
                Node::Problem(p) => {
                    lines.push(format!(
                        "{indent}- [P] {} ({})",
                        p.title,
                        p.problem_type.as_str()
                    ));
                    for child in &p.children {
                        render(child, depth + 1, Some(p), lines);
                    }
                }
                Node::Solution(s) => {
                    let flag = match parent {
                        Some(p) if p.selected_solution_id.as_deref() == Some(&s.id) => "(正启用)",
                        Some(_) => "(已弃用)",
                        None => "",
                    };
                    lines.push(format!(
                        "{indent}- [S] {} {} [{}]",
                        s.title,
                        flag,
                        s.state.as_str()
                    ));
                    for child in &s.children {
                        render(child, depth + 1, None, lines);
                    }
                }
            }
        }

        let mut lines = Vec::new();
        for root in &self.current().roots {
            render(root, 0, None, &mut lines);
        }
        lines.join("\n")
    }

    /// XML-shaped problem description consumed by agent prompts.
    pub fn problem_detail(&self, problem_id: &str) -> Result<String, TreeError> {
        let problem = Self::find_node(&self.current().roots, problem_id)
            .and_then(Node::as_problem)
            .ok_or_else(|| TreeError::missing(format!("problem {problem_id}")))?;
        Ok(format!(
            "<name>{}</name>\n<significance>\n{}\n</significance>\n<criteria>\n{}\n</criteria>",
            problem.title, problem.significance, problem.criteria
        ))
    }

    /// XML-shaped solution document consumed by agent prompts.
    pub fn solution_detail(&self, solution_id: &str) -> Result<String, TreeError> {
        let solution = Self::find_node(&self.current().roots, solution_id)
            .and_then(Node::as_solution)
            .ok_or_else(|| TreeError::missing(format!("solution {solution_id}")))?;

        let steps: Vec<String> = solution
            .children
            .iter()
            .filter_map(Node::as_problem)
            .map(|p| {
                format!(
                    "<step type={}>\n<name>{}</name>\n<significance>\n{}\n</significance>\n<criteria>\n{}\n</criteria>\n</step>",
                    p.problem_type.as_str(),
                    p.title,
                    p.significance,
                    p.criteria
                )
            })
            .collect();

        Ok(format!(
            "<solution>\n<name>{}</name>\n<top_level_thoughts>\n{}\n</top_level_thoughts>\n<research_plan>\n{}\n</research_plan>\n<implementation_plan>\n{}\n</implementation_plan>\n<plan_justification>\n{}\n</plan_justification>\n<final_report>\n{}\n</final_report>\n</solution>",
            solution.title,
            solution.top_level_thoughts,
            steps.join("\n"),
            solution.implementation_plan,
            solution.plan_justification,
            solution.final_report.as_deref().unwrap_or("暂无")
        ))
    }

    /// Solution ids related to a problem: every solution on the path to the
    /// root, every solution strictly below the problem's selected solution,
    /// and the problem's other solution children.
    pub fn related_solutions(&self, problem_id: &str) -> Result<RelatedSolutions, TreeError> {
        let roots = &self.current().roots;
        let target = Self::find_node(roots, problem_id)
            .and_then(Node::as_problem)
            .ok_or_else(|| TreeError::missing(format!("problem {problem_id}")))?;

        let mut ancestors = Vec::new();
        let mut cursor = problem_id.to_string();
        while let Some(parent) = Self::find_parent(roots, &cursor) {
            if parent.kind() == NodeKind::Solution {
                ancestors.push(parent.id().to_string());
            }
            cursor = parent.id().to_string();
        }

        fn collect_solutions(node: &Node, out: &mut Vec<String>) {
            for child in node.children() {
                if child.kind() == NodeKind::Solution {
                    out.push(child.id().to_string());
                }
                collect_solutions(child, out);
            }
        }

        let mut descendants = Vec::new();
        if let Some(selected_id) = &target.selected_solution_id {
            if let Some(selected) = target.children.iter().find(|c| c.id() == *selected_id) {
                collect_solutions(selected, &mut descendants);
            }
        }

        let siblings = target
            .children
            .iter()
            .filter_map(Node::as_solution)
            .filter(|s| Some(&s.id) != target.selected_solution_id.as_ref())
            .map(|s| s.id.clone())
            .collect();

        Ok(RelatedSolutions {
            ancestors,
            descendants,
            siblings,
        })
    }

    /// The title-ordered `ProblemRequest` views of a solution's sub-problems,
    /// ids included, so a rewrite can detect an unchanged list and inherit
    /// nodes by id.
    pub fn solution_children_requests(
        &self,
        solution_id: &str,
    ) -> Result<Vec<ProblemRequest>, TreeError> {
        let solution = Self::find_node(&self.current().roots, solution_id)
            .and_then(Node::as_solution)
            .ok_or_else(|| TreeError::missing(format!("solution {solution_id}")))?;
        Ok(solution
            .children
            .iter()
            .filter_map(Node::as_problem)
            .map(|p| ProblemRequest {
                id: Some(p.id.clone()),
                title: p.title.clone(),
                significance: p.significance.clone(),
                criteria: p.criteria.clone(),
                problem_type: p.problem_type,
            })
            .collect())
    }

    // ---------------- persistence ----------------

    pub fn export(&self) -> (HashMap<String, Snapshot>, String) {
        (self.snapshot_map.clone(), self.current_snapshot_id.clone())
    }

    pub fn import(
        &mut self,
        snapshot_map: HashMap<String, Snapshot>,
        current_snapshot_id: String,
    ) -> Result<(), TreeError> {
        if !snapshot_map.contains_key(&current_snapshot_id) {
            return Err(TreeError::SnapshotNotFound(current_snapshot_id));
        }
        self.snapshot_map = snapshot_map;
        self.current_snapshot_id = current_snapshot_id;
        Ok(())
    }

    pub fn reset(&mut self) {
        let snapshot = Snapshot::empty();
        self.current_snapshot_id = snapshot.id.clone();
        self.snapshot_map.clear();
        self.snapshot_map.insert(snapshot.id.clone(), snapshot);
    }
}

impl Default for ResearchTreeStore {
    fn default() -> Self {
        Self::new()
    }
}
