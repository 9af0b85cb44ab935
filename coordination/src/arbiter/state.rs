//! Arbiter state machine: phases, transitions, and session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ArbiterMode;

/// Phase of an arbiter session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterPhase {
    /// Reviewer results received, arbiter not yet invoked.
    Initial,
    /// Arbiter cross-reviews findings and decides whether to ask.
    Collecting,
    /// Clarification queries are out with reviewers.
    Querying,
    /// Answers are being folded into the arbiter's context.
    Answering,
    /// Final arbiter call producing the unified review.
    Synthesizing,
    /// Synthesis produced.
    Done,
    /// Arbiter invocation failed; the run aborts.
    Failed,
}

impl ArbiterPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [ArbiterPhase] {
        match self {
            Self::Initial => &[Self::Collecting, Self::Failed],
            Self::Collecting => &[Self::Querying, Self::Synthesizing, Self::Failed],
            Self::Querying => &[Self::Answering, Self::Failed],
            Self::Answering => &[Self::Collecting, Self::Failed],
            Self::Synthesizing => &[Self::Done, Self::Failed],
            Self::Done | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for ArbiterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "INITIAL"),
            Self::Collecting => write!(f, "COLLECTING"),
            Self::Querying => write!(f, "QUERYING"),
            Self::Answering => write!(f, "ANSWERING"),
            Self::Synthesizing => write!(f, "SYNTHESIZING"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: ArbiterPhase,
    pub to: ArbiterPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: ArbiterPhase,
    pub to: ArbiterPhase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// Tracks the arbiter's phase, round budget and transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterSession {
    pub mode: ArbiterMode,
    pub phase: ArbiterPhase,
    /// Number of QUERYING transitions so far.
    pub rounds_used: u32,
    pub max_rounds: u32,
    pub transitions: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
}

impl ArbiterSession {
    pub fn new(mode: ArbiterMode, max_rounds: u32) -> Self {
        Self {
            mode,
            phase: ArbiterPhase::Initial,
            rounds_used: 0,
            max_rounds,
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Transition to a new phase with a reason.
    ///
    /// Entering QUERYING is refused in single mode and once the round budget
    /// is spent, so the budget holds even if a caller misbehaves.
    pub fn transition(&mut self, to: ArbiterPhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }

        if to == ArbiterPhase::Querying {
            if self.mode == ArbiterMode::Single {
                return Err(TransitionError {
                    from: self.phase,
                    to,
                    reason: "single mode never queries".to_string(),
                });
            }
            if !self.has_rounds_remaining() {
                return Err(TransitionError {
                    from: self.phase,
                    to,
                    reason: format!("round budget of {} exhausted", self.max_rounds),
                });
            }
        }

        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;

        if to == ArbiterPhase::Querying {
            self.rounds_used += 1;
        }

        Ok(())
    }

    /// Whether another clarification round is allowed.
    pub fn has_rounds_remaining(&self) -> bool {
        self.mode == ArbiterMode::Multi && self.rounds_used < self.max_rounds
    }

    /// Number of QUERYING entries recorded in the history.
    pub fn querying_transitions(&self) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.to == ArbiterPhase::Querying)
            .count()
    }

    /// One-line status summary for logs.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} round {}/{}",
            self.mode, self.phase, self.rounds_used, self.max_rounds
        )
    }
}
