//! Agent invocation seam.
//!
//! Backends (Codex CLI, Gemini CLI, HTTP APIs, test doubles) implement
//! `AgentInvoker`. The core only ever sees raw text or an `InvocationError`.

use async_trait::async_trait;

use crate::error::InvocationError;
use crate::identity::AgentIdentity;

/// Runs one agent on one prompt.
///
/// Must be safe to call concurrently for distinct identities. Retries and
/// backoff, if any, belong in the implementation; the core calls exactly once.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// `prompt` already embeds the context; `context` is passed separately for
    /// backends that attach it out of band (files, working directories).
    async fn invoke(
        &self,
        identity: &AgentIdentity,
        prompt: &str,
        context: &str,
    ) -> Result<String, InvocationError>;
}

/// Optional post-processing of the report narrative into another language.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, language: &str) -> Result<String, InvocationError>;
}
