use research_tree::{ProblemRequest, SolutionRequest};

use crate::validators::create_solution::ResearchSubProblem;
use crate::validators::{required_text, XmlResponse};
use crate::xml::{XmlError, XmlValue};

/// Entry of a rewritten research plan: either a sub-problem inherited from
/// the prior solution (addressed by name, copied by id later) or a freshly
/// defined one.
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchPlanEntry {
    Inherit { name: String },
    New(ResearchSubProblem),
}

impl ResearchPlanEntry {
    fn from_xml(value: &XmlValue) -> Result<Self, XmlError> {
        let type_text = value
            .attr("type")
            .or_else(|| value.text_of("type"))
            .unwrap_or("implementation");
        if type_text == "inherit" {
            return Ok(Self::Inherit {
                name: required_text(value, "name")?,
            });
        }
        Ok(Self::New(ResearchSubProblem::from_xml(value)?))
    }

    pub fn name(&self) -> &str {
        match self {
            ResearchPlanEntry::Inherit { name } => name,
            ResearchPlanEntry::New(sub_problem) => &sub_problem.name,
        }
    }
}

/// Whether a rewritten solution replaces the node in place or spawns a new
/// solution next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionAction {
    Update,
    Create,
}

/// Validated `<response>` of the solution-rewrite task.
#[derive(Debug, Clone)]
pub struct ModifySolutionResponse {
    pub name: String,
    pub top_level_thoughts: String,
    pub research_plan: Vec<ResearchPlanEntry>,
    pub implementation_plan: String,
    pub plan_justification: String,
}

impl ModifySolutionResponse {
    /// Translate into a store request against the prior sub-problem list.
    ///
    /// When the new plan has the same length as the prior list, every entry
    /// inherits and the i-th name matches the i-th prior title, the solution
    /// is updated in place without touching its children. Any other shape
    /// creates a new solution whose inherit entries carry the prior node ids
    /// (triggering reuse-by-id in the store) and whose new entries are
    /// created fresh.
    pub fn to_request(
        &self,
        prior_children: &[ProblemRequest],
    ) -> Result<(SolutionAction, SolutionRequest), XmlError> {
        let unchanged = self.research_plan.len() == prior_children.len()
            && self
                .research_plan
                .iter()
                .zip(prior_children)
                .all(|(entry, prior)| {
                    matches!(entry, ResearchPlanEntry::Inherit { name } if *name == prior.title)
                });

        if unchanged {
            return Ok((
                SolutionAction::Update,
                SolutionRequest {
                    title: self.name.clone(),
                    top_level_thoughts: Some(self.top_level_thoughts.clone()),
                    implementation_plan: Some(self.implementation_plan.clone()),
                    plan_justification: Some(self.plan_justification.clone()),
                    ..Default::default()
                },
            ));
        }

        let children = self
            .research_plan
            .iter()
            .map(|entry| match entry {
                ResearchPlanEntry::Inherit { name } => prior_children
                    .iter()
                    .find(|prior| prior.title == *name)
                    .cloned()
                    .ok_or_else(|| {
                        XmlError::validation(format!("inherited sub-problem not found: {name}"))
                    }),
                ResearchPlanEntry::New(sub_problem) => Ok(sub_problem.to_request()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((
            SolutionAction::Create,
            SolutionRequest {
                title: self.name.clone(),
                top_level_thoughts: Some(self.top_level_thoughts.clone()),
                implementation_plan: Some(self.implementation_plan.clone()),
                plan_justification: Some(self.plan_justification.clone()),
                children: Some(children),
                ..Default::default()
            },
        ))
    }
}

impl XmlResponse for ModifySolutionResponse {
    fn from_xml(value: &XmlValue) -> Result<Self, XmlError> {
        let research_plan = value
            .list_of("research_plan")
            .into_iter()
            .flat_map(|plan| plan.list_of("sub_problem"))
            .map(ResearchPlanEntry::from_xml)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: required_text(value, "name")?,
            top_level_thoughts: required_text(value, "top_level_thoughts")?,
            research_plan,
            implementation_plan: required_text(value, "implementation_plan")?,
            plan_justification: required_text(value, "plan_justification")?,
        })
    }

    fn to_content(&self) -> String {
        let mut research_plan_text = String::new();
        for entry in &self.research_plan {
            match entry {
                ResearchPlanEntry::Inherit { name } => {
                    research_plan_text.push_str(&format!(
                        "[问题类型]: inherit\n[继承自问题]: {name}\n"
                    ));
                }
                ResearchPlanEntry::New(sub_problem) => {
                    research_plan_text.push_str(&format!(
                        "[问题类型]: {}\n[问题名称]: {}\n[问题意义]: \n{}\n[评判标准]: \n{}\n\n",
                        sub_problem.problem_type.as_str(),
                        sub_problem.name,
                        sub_problem.significance,
                        sub_problem.criteria
                    ));
                }
            }
        }
        format!(
            "【解决方案名称】: {}\n\n【顶层思考】: \n{}\n\n【研究方案】: \n{}\n\n【实施方案】: \n{}\n\n【方案论证】: \n{}",
            self.name,
            self.top_level_thoughts,
            research_plan_text,
            self.implementation_plan,
            self.plan_justification
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_fragment;
    use research_tree::ProblemType;

    fn prior() -> Vec<ProblemRequest> {
        vec![
            ProblemRequest {
                id: Some("q1".to_string()),
                title: "Q1".to_string(),
                significance: "s1".to_string(),
                criteria: "c1".to_string(),
                problem_type: ProblemType::Implementation,
            },
            ProblemRequest {
                id: Some("q2".to_string()),
                title: "Q2".to_string(),
                significance: "s2".to_string(),
                criteria: "c2".to_string(),
                problem_type: ProblemType::Conditional,
            },
        ]
    }

    fn response_with_plan(plan: &str) -> ModifySolutionResponse {
        let fragment = format!(
            "<response><name>新方案</name><top_level_thoughts>t</top_level_thoughts>\
<research_plan>{plan}</research_plan>\
<implementation_plan>i</implementation_plan><plan_justification>j</plan_justification></response>"
        );
        ModifySolutionResponse::from_xml(&parse_fragment(&fragment).unwrap()).unwrap()
    }

    #[test]
    fn full_positional_inherit_updates_in_place() {
        let response = response_with_plan(
            "<sub_problem type=\"inherit\"><name>Q1</name></sub_problem>\
<sub_problem type=\"inherit\"><name>Q2</name></sub_problem>",
        );
        let (action, request) = response.to_request(&prior()).unwrap();
        assert_eq!(action, SolutionAction::Update);
        assert!(request.children.is_none());
        assert_eq!(request.title, "新方案");
    }

    #[test]
    fn reordered_inherit_creates_a_new_solution() {
        let response = response_with_plan(
            "<sub_problem type=\"inherit\"><name>Q2</name></sub_problem>\
<sub_problem type=\"inherit\"><name>Q1</name></sub_problem>",
        );
        let (action, request) = response.to_request(&prior()).unwrap();
        assert_eq!(action, SolutionAction::Create);
        let children = request.children.unwrap();
        assert_eq!(children[0].id.as_deref(), Some("q2"));
        assert_eq!(children[1].id.as_deref(), Some("q1"));
    }

    #[test]
    fn mixed_plan_creates_with_inherited_ids_and_fresh_entries() {
        let response = response_with_plan(
            "<sub_problem type=\"inherit\"><name>Q1</name></sub_problem>\
<sub_problem type=\"implementation\"><name>Q3</name>\
<significance>s3</significance><criteria>c3</criteria></sub_problem>",
        );
        let (action, request) = response.to_request(&prior()).unwrap();
        assert_eq!(action, SolutionAction::Create);
        let children = request.children.unwrap();
        assert_eq!(children[0].id.as_deref(), Some("q1"));
        assert_eq!(children[0].title, "Q1");
        assert!(children[1].id.is_none());
        assert_eq!(children[1].title, "Q3");
    }

    #[test]
    fn shorter_plan_creates_instead_of_updating() {
        let response =
            response_with_plan("<sub_problem type=\"inherit\"><name>Q1</name></sub_problem>");
        let (action, request) = response.to_request(&prior()).unwrap();
        assert_eq!(action, SolutionAction::Create);
        assert_eq!(request.children.unwrap().len(), 1);
    }

    #[test]
    fn unknown_inherited_name_is_a_validation_error() {
        let response =
            response_with_plan("<sub_problem type=\"inherit\"><name>没有这个</name></sub_problem>");
        let err = response.to_request(&prior()).unwrap_err();
        assert!(err.to_string().contains("没有这个"));
    }

    #[test]
    fn content_lists_inherited_entries_by_origin() {
        let response = response_with_plan(
            "<sub_problem type=\"inherit\"><name>Q1</name></sub_problem>",
        );
        assert!(response.to_content().contains("[继承自问题]: Q1"));
    }
}
