use agent_llm::LlmError;
use agent_retry::RetryableError;
use message_bus::BusError;
use research_tree::TreeError;
use thiserror::Error;

use crate::xml::XmlError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Xml(#[from] XmlError),

    #[error("{0}")]
    Tree(#[from] TreeError),

    #[error("message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("missing parameter: {0}")]
    MissingParam(&'static str),

    #[error("agent is already processing")]
    Busy,
}

impl AgentError {
    /// Stable kind string reported in the terminal task result.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Llm(_) => "LlmError",
            AgentError::Xml(_) => "XmlError",
            AgentError::Tree(_) => "TreeError",
            AgentError::Bus(_) => "BusError",
            AgentError::MissingParam(_) => "MissingParam",
            AgentError::Busy => "Busy",
        }
    }
}

impl RetryableError for AgentError {
    fn is_retryable(&self) -> bool {
        match self {
            AgentError::Llm(e) => e.is_retryable(),
            // Malformed model output is worth another prompt round.
            AgentError::Xml(_) => true,
            _ => false,
        }
    }
}
