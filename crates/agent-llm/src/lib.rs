//! Streaming LLM client.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint in streaming mode
//! and republishes every delta as a patch: reasoning tokens become
//! `thinking_delta` patches, content tokens become `content_delta` patches,
//! and the stream close becomes a `finished` patch. The complete content
//! string is returned to the caller for post-processing.

mod client;
mod error;

pub use client::{DeepSeekClient, LlmClient, LlmStats, DEFAULT_BASE_URL};
pub use error::LlmError;
