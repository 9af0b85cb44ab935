//! Review orchestration error taxonomy.
//!
//! Errors split into three families:
//!
//! | Family               | Type              | Effect on the run                        |
//! |----------------------|-------------------|------------------------------------------|
//! | Per-call failure     | `InvocationError` | soft for reviewers, fatal for the arbiter |
//! | Fatal orchestration  | `ReviewError`     | run aborts, no report, no memo writes    |
//! | Soft degradation     | `RunWarning`      | recorded in the report metadata          |
//!
//! Retry classification lives on `InvocationError` because only the invoker
//! collaborator retries; the core never does.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arbiter::state::{ArbiterPhase, TransitionError};

/// Result alias for fatal orchestration outcomes.
pub type ReviewOutcome<T> = Result<T, ReviewError>;

/// Classification used by invokers to decide whether to retry a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Backend exited badly or produced nothing. Safe to retry.
    Transient,
    /// The call ran out of time. Retrying would double the wall clock.
    Timeout,
    /// The backend could not be started at all (missing binary, bad args).
    Configuration,
    /// Explicitly cancelled by the operator.
    Cancelled,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Suggested max attempts for retriable categories.
    pub fn default_max_attempts(self) -> Option<u32> {
        match self {
            Self::Transient => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure of a single agent invocation.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("failed to start agent backend: {0}")]
    Spawn(String),

    #[error("agent backend exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("agent backend returned empty output")]
    EmptyOutput,

    #[error("agent call timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("agent call cancelled")]
    Cancelled,

    #[error("agent backend error: {0}")]
    Backend(String),
}

impl InvocationError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::NonZeroExit { .. } | Self::EmptyOutput | Self::Backend(_) => {
                RetryCategory::Transient
            }
            Self::TimedOut(_) => RetryCategory::Timeout,
            Self::Spawn(_) => RetryCategory::Configuration,
            Self::Cancelled => RetryCategory::Cancelled,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }
}

/// Fatal orchestration errors. Any of these aborts the run without a report
/// and without persisting memo updates.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duplicate agent identity `{name}`")]
    DuplicateIdentity { name: String },

    #[error("Agent identities `{first}` and `{second}` both normalize to memo key `{key}`")]
    IdentityCollision {
        first: String,
        second: String,
        key: String,
    },

    #[error("All {failed} reviewers failed; nothing to arbitrate")]
    AllReviewersFailed { failed: usize },

    #[error("Arbiter failed during {phase}: {reason}")]
    ArbiterFailed { phase: ArbiterPhase, reason: String },

    #[error("Arbiter state machine error: {0}")]
    InvalidTransition(#[from] TransitionError),
}

impl ReviewError {
    /// Whether this error is raised before any agent is invoked.
    pub fn is_fatal_before_dispatch(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::DuplicateIdentity { .. } | Self::IdentityCollision { .. }
        )
    }
}

/// Soft failure recorded in the report metadata. Never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    ReviewerFailed { reviewer: String, reason: String },
    ParseWarning { agent: String, message: String },
    QueryDropped { target: String, reason: String },
    QueryFailed { target: String, reason: String },
    BudgetExhausted { pending: usize },
    MemoLoadFailed { agent: String, reason: String },
    MemoSaveFailed { agent: String, reason: String },
    TranslationFailed { language: String, reason: String },
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReviewerFailed { reviewer, reason } => {
                write!(f, "reviewer {reviewer} failed: {reason}")
            }
            Self::ParseWarning { agent, message } => write!(f, "{agent}: {message}"),
            Self::QueryDropped { target, reason } => {
                write!(f, "query to {target} dropped: {reason}")
            }
            Self::QueryFailed { target, reason } => {
                write!(f, "query to {target} failed: {reason}")
            }
            Self::BudgetExhausted { pending } => write!(
                f,
                "clarification budget exhausted with {pending} pending question(s)"
            ),
            Self::MemoLoadFailed { agent, reason } => {
                write!(f, "memo for {agent} could not be loaded: {reason}")
            }
            Self::MemoSaveFailed { agent, reason } => {
                write!(f, "memo for {agent} could not be saved: {reason}")
            }
            Self::TranslationFailed { language, reason } => {
                write!(f, "translation to {language} failed: {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(InvocationError::EmptyOutput.is_retriable());
        assert!(InvocationError::NonZeroExit {
            code: Some(1),
            stderr: String::new()
        }
        .is_retriable());
        assert!(!InvocationError::TimedOut(Duration::from_secs(5)).is_retriable());
        assert!(!InvocationError::Spawn("no such file".into()).is_retriable());
        assert!(!InvocationError::Cancelled.is_retriable());
        assert_eq!(RetryCategory::Transient.default_max_attempts(), Some(3));
        assert_eq!(RetryCategory::Timeout.default_max_attempts(), None);
    }

    #[test]
    fn configuration_errors_are_pre_dispatch() {
        let err = ReviewError::IdentityCollision {
            first: "Model A".into(),
            second: "model-a".into(),
            key: "model-a".into(),
        };
        assert!(err.is_fatal_before_dispatch());
        assert!(err.to_string().contains("model-a"));
        assert!(!ReviewError::AllReviewersFailed { failed: 3 }.is_fatal_before_dispatch());
    }

    #[test]
    fn warning_serializes_with_kind_tag() {
        let w = RunWarning::QueryDropped {
            target: "ghost".into(),
            reason: "unknown reviewer".into(),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["kind"], "query_dropped");
        assert_eq!(w.to_string(), "query to ghost dropped: unknown reviewer");
    }
}
