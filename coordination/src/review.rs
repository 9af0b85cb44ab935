//! Review results: one agent's parsed output for one round.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::finding::Finding;
use crate::identity::AgentIdentity;
use crate::memo::MemoUpdate;
use crate::protocol::parse_agent_output;

/// Which reviewer pass produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRound {
    Initial,
    CrossCheck,
}

impl std::fmt::Display for ReviewRound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::CrossCheck => write!(f, "cross_check"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewStatus {
    Succeeded,
    Failed { reason: String },
}

/// The full outcome of one reviewer for one round.
///
/// Owned by the round that produced it; the arbiter only reads it.
#[derive(Debug, Clone)]
pub struct ReviewResult {
    pub identity: AgentIdentity,
    pub round: ReviewRound,
    pub status: ReviewStatus,
    pub findings: Vec<Finding>,
    /// Narrative before the first finding.
    pub summary: String,
    /// Raw output with the control line removed.
    pub text: String,
    pub memo_update: Option<MemoUpdate>,
    /// Parse warnings (malformed control line and the like).
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

impl ReviewResult {
    /// Parse a successful invocation's raw output.
    pub fn from_output(
        identity: AgentIdentity,
        round: ReviewRound,
        raw: &str,
        elapsed: Duration,
    ) -> Self {
        let parsed = parse_agent_output(raw);
        Self {
            identity,
            round,
            status: ReviewStatus::Succeeded,
            findings: parsed.findings,
            summary: parsed.summary,
            text: parsed.cleaned,
            memo_update: parsed.memo_update,
            warnings: parsed.warnings,
            elapsed,
        }
    }

    pub fn failed(
        identity: AgentIdentity,
        round: ReviewRound,
        reason: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            identity,
            round,
            status: ReviewStatus::Failed {
                reason: reason.into(),
            },
            findings: Vec::new(),
            summary: String::new(),
            text: String::new(),
            memo_update: None,
            warnings: Vec::new(),
            elapsed,
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ReviewStatus::Succeeded)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            ReviewStatus::Failed { reason } => Some(reason),
            ReviewStatus::Succeeded => None,
        }
    }
}
