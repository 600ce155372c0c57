use research_tree::{ProblemRequest, ProblemType, SolutionRequest};

use crate::validators::{optional_text, required_text, XmlResponse};
use crate::xml::{XmlError, XmlValue};

/// One sub-problem of a freshly designed research plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchSubProblem {
    pub problem_type: ProblemType,
    pub name: String,
    pub significance: String,
    pub criteria: String,
}

impl ResearchSubProblem {
    pub(crate) fn from_xml(value: &XmlValue) -> Result<Self, XmlError> {
        let type_text = value
            .attr("type")
            .or_else(|| value.text_of("type"))
            .unwrap_or("implementation");
        let problem_type = parse_problem_type(type_text)?;
        Ok(Self {
            problem_type,
            name: required_text(value, "name")?,
            significance: optional_text(value, "significance").unwrap_or_default(),
            criteria: optional_text(value, "criteria").unwrap_or_default(),
        })
    }

    pub fn to_request(&self) -> ProblemRequest {
        ProblemRequest::new(
            self.name.clone(),
            self.significance.clone(),
            self.criteria.clone(),
            self.problem_type,
        )
    }
}

pub(crate) fn parse_problem_type(text: &str) -> Result<ProblemType, XmlError> {
    match text {
        "implementation" => Ok(ProblemType::Implementation),
        "conditional" => Ok(ProblemType::Conditional),
        other => Err(XmlError::validation(format!(
            "unknown sub-problem type: {other}"
        ))),
    }
}

/// Validated `<response>` of the solution-creation task.
#[derive(Debug, Clone)]
pub struct CreateSolutionResponse {
    pub name: String,
    pub top_level_thoughts: String,
    pub research_plan: Vec<ResearchSubProblem>,
    pub implementation_plan: String,
    pub plan_justification: String,
}

impl CreateSolutionResponse {
    /// Fresh creation: every sub-problem request goes out without an id.
    pub fn to_request(&self) -> SolutionRequest {
        SolutionRequest {
            title: self.name.clone(),
            top_level_thoughts: Some(self.top_level_thoughts.clone()),
            implementation_plan: Some(self.implementation_plan.clone()),
            plan_justification: Some(self.plan_justification.clone()),
            children: Some(self.research_plan.iter().map(|p| p.to_request()).collect()),
            ..Default::default()
        }
    }
}

impl XmlResponse for CreateSolutionResponse {
    fn from_xml(value: &XmlValue) -> Result<Self, XmlError> {
        let research_plan = value
            .list_of("research_plan")
            .into_iter()
            .flat_map(|plan| plan.list_of("sub_problem"))
            .map(ResearchSubProblem::from_xml)
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
        for sub_problem in &self.research_plan {
            research_plan_text.push_str(&format!(
                "[问题类型]: {}\n[问题名称]: {}\n[问题意义]: \n{}\n[评判标准]: \n{}\n\n",
                sub_problem.problem_type.as_str(),
                sub_problem.name,
                sub_problem.significance,
                sub_problem.criteria
            ));
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
