//! Model client — the LLM collaborator.
//!
//! The pipeline never talks to a provider directly. Generation, fixing and
//! prompt-improvement requests all go through [`ModelClient`]; concrete
//! transports live in the CLI crate and scripted clients in [`crate::testing`].

use async_trait::async_trait;

use crate::error::ForgeResult;
use crate::types::{ReasoningEffort, Usage};

/// What the caller wants back from the completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Program source; transports strip markdown fences.
    Code,
    /// Free text, returned verbatim.
    Text,
}

/// Request passed to a model client.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
    pub reasoning_effort: ReasoningEffort,
    pub format: ResponseFormat,
}

impl ModelRequest {
    pub fn code(model: impl Into<String>, prompt: impl Into<String>, effort: ReasoningEffort) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            reasoning_effort: effort,
            format: ResponseFormat::Code,
        }
    }

    pub fn text(model: impl Into<String>, prompt: impl Into<String>, effort: ReasoningEffort) -> Self {
        Self {
            format: ResponseFormat::Text,
            ..Self::code(model, prompt, effort)
        }
    }
}

/// Successful completion with its billing data.
#[derive(Clone, Debug, Default)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

impl Completion {
    /// A blank completion counts as "no content".
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Trait implemented by LLM transports.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send one prompt, returning the generated text and usage.
    async fn ask(&self, request: &ModelRequest) -> ForgeResult<Completion>;

    /// Name of this client for logging.
    fn name(&self) -> &str;
}
