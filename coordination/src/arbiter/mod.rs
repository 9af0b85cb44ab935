//! Arbiter: cross-reviews the reviewers' findings, optionally asks them
//! clarification questions, and writes the unified review.
//!
//! - `state`: phases, legal transitions, round budget
//! - `machine`: the driver that invokes the arbiter and reviewers

pub mod machine;
pub mod state;

pub use machine::{Arbiter, ArbiterOutcome};
pub use state::{ArbiterPhase, ArbiterSession, PhaseTransition, TransitionError};

use serde::{Deserialize, Serialize};

/// One clarification question and the reviewer's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaExchange {
    /// Clarification round (1-based) the question was asked in.
    pub round: u32,
    /// Reviewer the question went to.
    pub target: String,
    pub question: String,
    /// Answer text with the control line removed, or a failure note.
    pub answer: String,
    /// True when the reviewer could not answer.
    #[serde(default)]
    pub failed: bool,
}

impl QaExchange {
    pub fn answered(
        round: u32,
        target: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            round,
            target: target.into(),
            question: question.into(),
            answer: answer.into(),
            failed: false,
        }
    }

    pub fn failed(
        round: u32,
        target: impl Into<String>,
        question: impl Into<String>,
        reason: &str,
    ) -> Self {
        Self {
            round,
            target: target.into(),
            question: question.into(),
            answer: format!("(no answer: {reason})"),
            failed: true,
        }
    }
}
