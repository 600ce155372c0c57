//! Agent execution core.
//!
//! Hosts the shared agent machinery (task lifecycle with cooperative
//! cancellation, the call-LLM-parse-validate-with-retry pipeline, action
//! execution with message framing, environment-info gathering) and the two
//! concrete agents: breadth-first solution expansion and the user-chat
//! modification loop. Model output is exchanged as XML fragments; the `xml`
//! and `validators` modules turn free-form completions into typed,
//! invariant-checked response values.

mod auto_research;
mod chat;
mod error;
mod handle;
mod runtime;

pub mod prompts;
pub mod validators;
pub mod xml;

pub use auto_research::AutoResearchAgent;
pub use chat::UserChatAgent;
pub use error::AgentError;
pub use handle::{Agent, AgentHandle, AgentParams, TaskResult};
pub use runtime::{AgentRuntime, EnvironmentInfo};
