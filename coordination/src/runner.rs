//! Review request and the per-run execution context shared by every stage.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::InvocationError;
use crate::identity::AgentIdentity;
use crate::invoker::AgentInvoker;

// ── Request ──────────────────────────────────────────────────────────────────

/// What to review: a task description plus one opaque context blob.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    /// Human-readable description of what reviewers should focus on.
    pub task: String,
    /// Diff, repository description, or piped text. Opaque to the core.
    pub context: String,
    /// Label for logs and the report header.
    pub label: String,
}

impl ReviewRequest {
    pub fn new(task: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: context.into(),
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

// ── Context ──────────────────────────────────────────────────────────────────

/// Shared execution context handed to the pool and the arbiter.
///
/// Cheap to clone; everything heavy is behind `Arc` so spawned tasks can own
/// a copy.
#[derive(Clone)]
pub struct RunContext {
    pub invoker: Arc<dyn AgentInvoker>,
    pub request: Arc<ReviewRequest>,
    pub cancel: CancellationToken,
    /// Run-wide deadline. Calls still outstanding at this instant fail.
    pub deadline: Option<Instant>,
    /// Upper bound for any single agent call.
    pub agent_timeout: Option<Duration>,
}

impl RunContext {
    pub fn new(invoker: Arc<dyn AgentInvoker>, request: ReviewRequest) -> Self {
        Self {
            invoker,
            request: Arc::new(request),
            cancel: CancellationToken::new(),
            deadline: None,
            agent_timeout: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deadline = timeout.map(|t| Instant::now() + t);
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Earliest of the run deadline and `now + agent_timeout`.
    fn call_deadline(&self, started: Instant) -> Option<Instant> {
        let per_call = self.agent_timeout.map(|t| started + t);
        match (self.deadline, per_call) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Invoke one agent under the run's deadline and cancellation token.
    ///
    /// Whitespace-only output counts as a failure.
    pub async fn call(
        &self,
        identity: &AgentIdentity,
        prompt: &str,
    ) -> Result<String, InvocationError> {
        if self.is_cancelled() {
            return Err(InvocationError::Cancelled);
        }

        let started = Instant::now();
        debug!(agent = %identity, prompt_chars = prompt.len(), "invoking agent");
        debug!(agent = %identity, "prompt:\n{prompt}");

        let invocation = self
            .invoker
            .invoke(identity, prompt, &self.request.context);

        let bounded = async {
            match self.call_deadline(started) {
                Some(at) => match tokio::time::timeout_at(at, invocation).await {
                    Ok(result) => result,
                    Err(_) => Err(InvocationError::TimedOut(
                        at.saturating_duration_since(started),
                    )),
                },
                None => invocation.await,
            }
        };

        let output = tokio::select! {
            _ = self.cancel.cancelled() => return Err(InvocationError::Cancelled),
            result = bounded => result?,
        };

        if output.trim().is_empty() {
            return Err(InvocationError::EmptyOutput);
        }
        debug!(
            agent = %identity,
            output_chars = output.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "agent returned"
        );
        Ok(output)
    }
}
