//! Typed views of LLM responses.
//!
//! Each response type binds the parsed XML mapping through a validated
//! constructor: discriminator attributes are lifted into enum variants,
//! cross-field invariants are checked up front, and repeated elements are
//! collected uniformly whether they arrived as a list, a singleton or not at
//! all. A failed constructor yields a diagnostic the retry pipeline can show
//! while it re-prompts the model.

mod create_solution;
mod handle_modification;
mod modify_solution;

pub use create_solution::{CreateSolutionResponse, ResearchSubProblem};
pub use handle_modification::{Decision, HandleModificationRequestsResponse};
pub use modify_solution::{ModifySolutionResponse, ResearchPlanEntry, SolutionAction};

use crate::xml::{XmlError, XmlValue};

/// A structured response parsed out of a `<response>` fragment.
pub trait XmlResponse: Sized + Send {
    fn from_xml(value: &XmlValue) -> Result<Self, XmlError>;

    /// Rendering published as the assistant message's content once
    /// validation succeeded.
    fn to_content(&self) -> String;
}

/// Required non-empty text child.
pub(crate) fn required_text(value: &XmlValue, key: &str) -> Result<String, XmlError> {
    value
        .text_of(key)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| XmlError::validation(format!("missing required field <{key}>")))
}

/// Optional text child, absent and empty treated alike.
pub(crate) fn optional_text(value: &XmlValue, key: &str) -> Option<String> {
    value
        .text_of(key)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
