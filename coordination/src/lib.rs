//! Multi-agent code review coordination library
//!
//! This library provides:
//! - A reviewer pool that runs several independent LLM reviewers concurrently
//! - An arbiter state machine that cross-checks their findings, optionally
//!   asks follow-up questions, and writes one unified review
//! - Per-agent private memos persisted across runs
//!
//! # Pipeline
//!
//! ```text
//! ReviewRequest ─► ReviewerPool ─► Arbiter ─► SynthesisReport
//!                      │              │
//!                      └── MemoLedger ┘ (persisted after success)
//! ```
//!
//! Agents are reached only through the [`AgentInvoker`] trait; the
//! `review-agents` binary supplies a CLI-backed implementation.
//!
//! # Control line
//!
//! Agents write free text and may end it with one structured line:
//!
//! ```text
//! CONTROL_JSON: {"memo":"prefers small diffs","append":true}
//! CONTROL_JSON: {"questions":[{"target":"Gemini[gemini-3-pro-preview]","question":"..."}]}
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod arbiter;
pub mod config;
pub mod error;
pub mod finding;
pub mod identity;
pub mod invoker;
pub mod memo;
pub mod orchestrator;
pub mod pool;
pub mod prompts;
pub mod protocol;
pub mod report;
pub mod review;
pub mod runner;

// Re-export key configuration types
pub use config::{
    ArbiterConfig, ArbiterMode, LimitsConfig, RunConfig, DEFAULT_MAX_QUERIES, DEFAULT_MAX_ROUNDS,
};

// Re-export error taxonomy
pub use error::{InvocationError, RetryCategory, ReviewError, ReviewOutcome, RunWarning};

// Re-export agent and finding types
pub use finding::{merge_findings, Attribution, Finding, Priority};
pub use identity::{AgentIdentity, BackendFamily};
pub use invoker::{AgentInvoker, Translator};

// Re-export memo types
pub use memo::{FileMemoStore, Memo, MemoKey, MemoKeyspace, MemoLedger, MemoMode, MemoStore, MemoStoreError, MemoUpdate};

// Re-export pipeline types
pub use arbiter::{Arbiter, ArbiterOutcome, ArbiterPhase, ArbiterSession, PhaseTransition, QaExchange};
pub use orchestrator::Orchestrator;
pub use pool::{PoolOutcome, ReviewerPool};
pub use protocol::{parse_agent_output, ArbiterDirective, ControlPayload, ParsedOutput, QueryRequest};
pub use report::{ReviewerSummary, SynthesisReport};
pub use review::{ReviewResult, ReviewRound, ReviewStatus};
pub use runner::{ReviewRequest, RunContext};
