//! Run configuration for the review orchestrator.
//!
//! The binary layers environment variables, an optional TOML file and CLI
//! flags on top of these defaults; the core only sees the resolved
//! `RunConfig`.
//!
//! | Setting          | Default  | Meaning                                       |
//! |------------------|----------|-----------------------------------------------|
//! | `mode`           | single   | arbiter runs once, or loops with queries      |
//! | `max_rounds`     | 3        | max clarification rounds (multi mode)         |
//! | `max_queries`    | 50       | max clarification questions across all rounds |
//! | `agent_timeout`  | none     | per-call bound                                |
//! | `run_timeout`    | none     | whole-run bound                               |
//! | `max_parallel`   | none     | cap on concurrently running agents            |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::AgentIdentity;

/// Default number of clarification rounds in multi mode.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;
/// Default cap on clarification questions across the whole run.
pub const DEFAULT_MAX_QUERIES: u32 = 50;

/// How the arbiter operates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterMode {
    /// One arbiter call; its output is the synthesis. Never queries.
    #[default]
    Single,
    /// Collect → query → answer loop, bounded by the round budget.
    Multi,
}

impl std::fmt::Display for ArbiterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

/// Arbiter identity and budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    pub identity: AgentIdentity,
    #[serde(default)]
    pub mode: ArbiterMode,
    /// Upper bound on QUERYING transitions.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Upper bound on individual questions across all rounds.
    #[serde(default = "default_max_queries")]
    pub max_queries: u32,
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_max_queries() -> u32 {
    DEFAULT_MAX_QUERIES
}

impl ArbiterConfig {
    pub fn new(identity: AgentIdentity) -> Self {
        Self {
            identity,
            mode: ArbiterMode::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_queries: DEFAULT_MAX_QUERIES,
        }
    }

    pub fn with_mode(mut self, mode: ArbiterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn with_max_queries(mut self, queries: u32) -> Self {
        self.max_queries = queries;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.identity.name.trim().is_empty() {
            return Err("arbiter name must not be empty".into());
        }
        if self.mode == ArbiterMode::Multi {
            if self.max_rounds == 0 {
                return Err("max_rounds must be at least 1 in multi mode".into());
            }
            if self.max_queries == 0 {
                return Err("max_queries must be at least 1 in multi mode".into());
            }
        }
        Ok(())
    }
}

/// Time and concurrency limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub agent_timeout_secs: Option<u64>,
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

impl LimitsConfig {
    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout_secs.map(Duration::from_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.agent_timeout_secs == Some(0) {
            return Err("agent_timeout_secs must be positive".into());
        }
        if self.run_timeout_secs == Some(0) {
            return Err("run_timeout_secs must be positive".into());
        }
        if self.max_parallel == Some(0) {
            return Err("max_parallel must be at least 1".into());
        }
        Ok(())
    }
}

/// Fully resolved configuration for one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub reviewers: Vec<AgentIdentity>,
    pub arbiter: ArbiterConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Run a reviewer cross-check pass before arbitration.
    #[serde(default)]
    pub peer_review: bool,
    /// Ask for and render P2/P3 findings in detail.
    #[serde(default)]
    pub include_low_priority: bool,
    /// Target language for the report narrative, if not English.
    #[serde(default)]
    pub output_language: Option<String>,
}

impl RunConfig {
    pub fn new(reviewers: Vec<AgentIdentity>, arbiter: ArbiterConfig) -> Self {
        Self {
            reviewers,
            arbiter,
            limits: LimitsConfig::default(),
            peer_review: false,
            include_low_priority: false,
            output_language: None,
        }
    }

    /// Every identity that may own a memo: reviewers first, then the arbiter.
    pub fn identities(&self) -> impl Iterator<Item = &AgentIdentity> {
        self.reviewers
            .iter()
            .chain(std::iter::once(&self.arbiter.identity))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.reviewers.is_empty() {
            return Err("at least one reviewer must be configured".into());
        }
        if let Some(r) = self.reviewers.iter().find(|r| r.name.trim().is_empty()) {
            return Err(format!("reviewer with model `{}` has an empty name", r.model));
        }
        if let Some(lang) = &self.output_language {
            if lang.trim().is_empty() {
                return Err("output_language must not be empty when set".into());
            }
        }
        self.arbiter.validate()?;
        self.limits.validate()
    }
}
