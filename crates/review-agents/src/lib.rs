//! Command-line front end for multi-agent code review.
//!
//! - `config`: clap flags, TOML file and `MULTI_REVIEW_*` environment layering
//! - `context`: diff / repo / stdin review context
//! - `backends`: Codex and Gemini CLI invokers plus the report translator

pub mod backends;
pub mod config;
pub mod context;
