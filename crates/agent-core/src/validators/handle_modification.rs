use crate::validators::{optional_text, required_text, XmlResponse};
use crate::xml::{XmlError, XmlValue};

/// The two-way decision of the modification-request task. The variants are
/// mutually exclusive by construction: an accept carries only the plan, a
/// reply carries only the answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept { modification_plan: String },
    Reply { response_to_user: String },
}

/// Validated `<response>` of the decide-accept-or-reply task.
///
/// Wire shape: `<decision type="accept|reply">` with `<reasoning>` plus the
/// variant-specific field; the discriminator rides on the attribute.
#[derive(Debug, Clone)]
pub struct HandleModificationRequestsResponse {
    pub reasoning: String,
    pub decision: Decision,
}

impl XmlResponse for HandleModificationRequestsResponse {
    fn from_xml(value: &XmlValue) -> Result<Self, XmlError> {
        let decision = value
            .get("decision")
            .ok_or_else(|| XmlError::validation("missing <decision> element"))?;
        let decision_type = decision
            .attr("type")
            .ok_or_else(|| XmlError::validation("<decision> is missing its type attribute"))?;
        let reasoning = required_text(decision, "reasoning")?;
        let modification_plan = optional_text(decision, "modification_plan");
        let response_to_user = optional_text(decision, "response_to_user");

        let decision = match decision_type {
            "accept" => {
                if response_to_user.is_some() {
                    return Err(XmlError::validation(
                        "an accept decision must not carry <response_to_user>",
                    ));
                }
                Decision::Accept {
                    modification_plan: modification_plan.ok_or_else(|| {
                        XmlError::validation("an accept decision requires <modification_plan>")
                    })?,
                }
            }
            "reply" => {
                if modification_plan.is_some() {
                    return Err(XmlError::validation(
                        "a reply decision must not carry <modification_plan>",
                    ));
                }
                Decision::Reply {
                    response_to_user: response_to_user.ok_or_else(|| {
                        XmlError::validation("a reply decision requires <response_to_user>")
                    })?,
                }
            }
            other => {
                return Err(XmlError::validation(format!(
                    "unknown decision type: {other}"
                )))
            }
        };

        Ok(Self { reasoning, decision })
    }

    fn to_content(&self) -> String {
        match &self.decision {
            Decision::Accept { modification_plan } => format!(
                "【做出修改的理由】: {}\n【修改计划】: {}\n",
                self.reasoning, modification_plan
            ),
            Decision::Reply { response_to_user } => format!(
                "【做出回复的理由】: {}\n【对用户的回复】: {}\n",
                self.reasoning, response_to_user
            ),
        }
    }
}
