//! CLI, config-file and environment layering for the `multi-review` binary.
//!
//! Precedence, lowest first: built-in defaults, `--config` TOML file,
//! `MULTI_REVIEW_*` environment variables, command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::warn;

use review_coordination::{
    AgentIdentity, ArbiterConfig, ArbiterMode, BackendFamily, LimitsConfig, RunConfig,
    DEFAULT_MAX_QUERIES, DEFAULT_MAX_ROUNDS,
};

use crate::context::ContextMode;

pub const DEFAULT_TASK: &str =
    "Please review this code context for correctness, readability, and potential issues.";
pub const DEFAULT_MEMO_DIR: &str = ".multi_review_memos";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-pro-preview";
/// Reviewers used when no `--codex-model` is given.
pub const DEFAULT_CODEX_MODELS: &[&str] = &["gpt-5.1:high", "gpt-5.1-codex-max:xhigh"];
/// Effort applied to a codex spec without `:effort`.
pub const DEFAULT_CODEX_EFFORT: &str = "high";
/// Codex model and effort reserved for the arbiter when codex arbitrates.
pub const CODEX_ARBITER_MODEL: &str = "gpt-5.1-codex";
pub const CODEX_ARBITER_EFFORT: &str = "low";
/// Upper bound on one CLI agent process.
pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 3600;

const ENV_MEMO_DIR: &str = "MULTI_REVIEW_MEMO_DIR";
const ENV_SHELL_TIMEOUT: &str = "MULTI_REVIEW_SHELL_TIMEOUT_SEC";
const ENV_GEMINI_MODEL: &str = "MULTI_REVIEW_GEMINI_MODEL";
const ENV_MAX_QUERIES: &str = "MULTI_REVIEW_MAX_QUERIES";
const ENV_MAX_ROUNDS: &str = "MULTI_REVIEW_MAX_ROUNDS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid model spec `{0}`: expected MODEL or MODEL:EFFORT")]
    ModelSpec(String),

    #[error("no reviewers left after removing the arbiter-reserved model")]
    NoReviewers,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterFamily {
    /// Dedicated `gpt-5.1-codex` low-effort arbiter
    Codex,
    /// The configured Gemini model arbitrates
    Gemini,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RoundMode {
    /// One-shot synthesis, no follow-up questions
    Single,
    /// Clarification rounds before the synthesis
    Multi,
}

impl From<RoundMode> for ArbiterMode {
    fn from(mode: RoundMode) -> Self {
        match mode {
            RoundMode::Single => ArbiterMode::Single,
            RoundMode::Multi => ArbiterMode::Multi,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputLang {
    En,
    Zh,
}

impl OutputLang {
    /// Target language for translation, `None` for English.
    pub fn translation_target(self) -> Option<&'static str> {
        match self {
            Self::En => None,
            Self::Zh => Some("Simplified Chinese"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Markdown,
    Json,
}

/// Multi-model code review: several Codex/Gemini reviewers plus an arbiter.
#[derive(Parser, Debug, Clone)]
#[command(name = "multi-review", author, version, about, long_about = None)]
pub struct Cli {
    /// What the reviewers look at
    #[arg(long, value_enum, default_value_t = ContextMode::Repo)]
    pub context_mode: ContextMode,

    /// With --context-mode diff, review staged changes instead of the working tree
    #[arg(long, default_value_t = false)]
    pub cached: bool,

    /// Free-form description of the review task
    #[arg(long, default_value = DEFAULT_TASK)]
    pub task: String,

    /// Codex reviewer as MODEL or MODEL:EFFORT (repeatable)
    #[arg(long = "codex-model", value_name = "MODEL[:EFFORT]")]
    pub codex_models: Vec<String>,

    /// Gemini reviewer model
    #[arg(long)]
    pub gemini_model: Option<String>,

    /// Which backend family arbitrates
    #[arg(long, value_enum)]
    pub arbiter_family: Option<ArbiterFamily>,

    /// Arbiter round mode
    #[arg(long, value_enum)]
    pub arbiter_round_mode: Option<RoundMode>,

    /// Max clarification rounds (multi mode)
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Max clarification questions across all rounds
    #[arg(long)]
    pub max_queries: Option<u32>,

    /// Run a reviewer cross-check pass before arbitration
    #[arg(long, default_value_t = false)]
    pub peer_review: bool,

    /// List P2/P3 findings in detail
    #[arg(long = "include-p2-p3", default_value_t = false)]
    pub include_low_priority: bool,

    /// Language of the report summary
    #[arg(long, value_enum)]
    pub output_lang: Option<OutputLang>,

    /// Report format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
    pub format: OutputFormat,

    /// Directory holding per-agent memos
    #[arg(long)]
    pub memo_dir: Option<PathBuf>,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Per-call timeout in seconds
    #[arg(long)]
    pub agent_timeout: Option<u64>,

    /// Whole-run timeout in seconds
    #[arg(long)]
    pub run_timeout: Option<u64>,

    /// Cap on concurrently running reviewers
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Label shown in the report header
    #[arg(long)]
    pub label: Option<String>,

    /// Debug logging, including every prompt
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}

// ── Config file ──────────────────────────────────────────────────────────────

/// Optional `--config` TOML file. Every field may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub codex_models: Vec<String>,
    pub gemini_model: Option<String>,
    pub arbiter_family: Option<ArbiterFamily>,
    pub arbiter_round_mode: Option<RoundMode>,
    pub max_rounds: Option<u32>,
    pub max_queries: Option<u32>,
    pub peer_review: Option<bool>,
    pub include_p2_p3: Option<bool>,
    pub output_lang: Option<OutputLang>,
    pub memo_dir: Option<PathBuf>,
    pub agent_timeout_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub max_parallel: Option<usize>,
    pub shell_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Environment ──────────────────────────────────────────────────────────────

/// `MULTI_REVIEW_*` overrides. Unparseable or zero numeric values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub memo_dir: Option<PathBuf>,
    pub shell_timeout_secs: Option<u64>,
    pub gemini_model: Option<String>,
    pub max_queries: Option<u32>,
    pub max_rounds: Option<u32>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            memo_dir: text(ENV_MEMO_DIR).map(PathBuf::from),
            shell_timeout_secs: text(ENV_SHELL_TIMEOUT)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| *v >= 1.0)
                .map(|v| v as u64),
            gemini_model: text(ENV_GEMINI_MODEL),
            max_queries: text(ENV_MAX_QUERIES).and_then(|v| v.parse().ok()),
            max_rounds: text(ENV_MAX_ROUNDS)
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0),
        }
    }
}

// ── Resolution ───────────────────────────────────────────────────────────────

/// Everything the binary needs after layering.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub run: RunConfig,
    pub memo_dir: PathBuf,
    pub shell_timeout: Duration,
    pub context_mode: ContextMode,
    pub cached: bool,
    pub task: String,
    pub label: String,
    pub format: OutputFormat,
    pub verbose: bool,
}

/// Split `MODEL[:EFFORT]`; the effort defaults to [`DEFAULT_CODEX_EFFORT`].
pub fn parse_model_spec(spec: &str) -> Result<(String, String), ConfigError> {
    let (model, effort) = match spec.split_once(':') {
        Some((m, e)) => (m.trim(), e.trim()),
        None => (spec.trim(), DEFAULT_CODEX_EFFORT),
    };
    if model.is_empty() || effort.is_empty() {
        return Err(ConfigError::ModelSpec(spec.to_string()));
    }
    Ok((model.to_string(), effort.to_string()))
}

fn codex_identity(model: &str, effort: &str) -> AgentIdentity {
    AgentIdentity::new(
        AgentIdentity::conventional_name(BackendFamily::Codex, model, Some(effort)),
        BackendFamily::Codex,
        model,
    )
    .with_effort(effort)
}

/// Build reviewers and the arbiter.
///
/// With a codex arbiter, a codex reviewer using the reserved arbiter
/// model/effort is skipped with a warning.
pub fn build_roster(
    codex_specs: &[String],
    gemini_model: &str,
    family: ArbiterFamily,
) -> Result<(Vec<AgentIdentity>, AgentIdentity), ConfigError> {
    let mut reviewers = Vec::new();
    for spec in codex_specs {
        let (model, effort) = parse_model_spec(spec)?;
        if family == ArbiterFamily::Codex && model == CODEX_ARBITER_MODEL && effort == CODEX_ARBITER_EFFORT {
            warn!(
                spec = %spec,
                "ignoring codex reviewer reserved for the codex arbiter"
            );
            continue;
        }
        reviewers.push(codex_identity(&model, &effort));
    }
    if reviewers.is_empty() {
        return Err(ConfigError::NoReviewers);
    }

    reviewers.push(AgentIdentity::new(
        AgentIdentity::conventional_name(BackendFamily::Gemini, gemini_model, None),
        BackendFamily::Gemini,
        gemini_model,
    ));

    let arbiter = match family {
        ArbiterFamily::Codex => codex_identity(CODEX_ARBITER_MODEL, CODEX_ARBITER_EFFORT),
        ArbiterFamily::Gemini => AgentIdentity::new(
            format!("Gemini-Arbiter[{gemini_model}]"),
            BackendFamily::Gemini,
            gemini_model,
        ),
    };

    Ok((reviewers, arbiter))
}

/// Layer defaults, file, environment and CLI into one configuration.
pub fn resolve(cli: &Cli, file: FileConfig, env: &EnvOverrides) -> Result<ResolvedConfig, ConfigError> {
    let codex_specs: Vec<String> = if !cli.codex_models.is_empty() {
        cli.codex_models.clone()
    } else if !file.codex_models.is_empty() {
        file.codex_models.clone()
    } else {
        DEFAULT_CODEX_MODELS.iter().map(|s| s.to_string()).collect()
    };
    let gemini_model = cli
        .gemini_model
        .clone()
        .or_else(|| env.gemini_model.clone())
        .or(file.gemini_model)
        .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
    let family = cli
        .arbiter_family
        .or(file.arbiter_family)
        .unwrap_or(ArbiterFamily::Codex);

    let (reviewers, arbiter_identity) = build_roster(&codex_specs, &gemini_model, family)?;

    let mode: ArbiterMode = cli
        .arbiter_round_mode
        .or(file.arbiter_round_mode)
        .map(Into::into)
        .unwrap_or_default();
    let arbiter = ArbiterConfig::new(arbiter_identity)
        .with_mode(mode)
        .with_max_rounds(
            cli.max_rounds
                .or(env.max_rounds)
                .or(file.max_rounds)
                .unwrap_or(DEFAULT_MAX_ROUNDS),
        )
        .with_max_queries(
            cli.max_queries
                .or(env.max_queries)
                .or(file.max_queries)
                .unwrap_or(DEFAULT_MAX_QUERIES),
        );

    let mut run = RunConfig::new(reviewers, arbiter);
    run.limits = LimitsConfig {
        agent_timeout_secs: cli.agent_timeout.or(file.agent_timeout_secs),
        run_timeout_secs: cli.run_timeout.or(file.run_timeout_secs),
        max_parallel: cli.max_parallel.or(file.max_parallel),
    };
    run.peer_review = cli.peer_review || file.peer_review.unwrap_or(false);
    run.include_low_priority = cli.include_low_priority || file.include_p2_p3.unwrap_or(false);
    run.output_language = cli
        .output_lang
        .or(file.output_lang)
        .unwrap_or(OutputLang::En)
        .translation_target()
        .map(str::to_string);
    run.validate().map_err(ConfigError::Invalid)?;

    let memo_dir = cli
        .memo_dir
        .clone()
        .or_else(|| env.memo_dir.clone())
        .or(file.memo_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MEMO_DIR));
    let shell_timeout = Duration::from_secs(
        env.shell_timeout_secs
            .or(file.shell_timeout_secs)
            .unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS),
    );

    Ok(ResolvedConfig {
        run,
        memo_dir,
        shell_timeout,
        context_mode: cli.context_mode,
        cached: cli.cached,
        task: cli.task.clone(),
        label: cli.label.clone().unwrap_or_default(),
        format: cli.format,
        verbose: cli.verbose,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_spec_parsing() {
        assert_eq!(
            parse_model_spec("gpt-5.1:xhigh").unwrap(),
            ("gpt-5.1".to_string(), "xhigh".to_string())
        );
        assert_eq!(
            parse_model_spec("gpt-5.1").unwrap(),
            ("gpt-5.1".to_string(), "high".to_string())
        );
        assert!(parse_model_spec(":high").is_err());
        assert!(parse_model_spec("gpt-5.1:").is_err());
    }

    #[test]
    fn reserved_arbiter_model_is_skipped_for_codex_arbiter() {
        let specs = vec!["gpt-5.1-codex:low".to_string(), "gpt-5.1:high".to_string()];
        let (reviewers, arbiter) = build_roster(&specs, "g", ArbiterFamily::Codex).unwrap();
        let names: Vec<&str> = reviewers.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Codex[gpt-5.1|high]", "Gemini[g]"]);
        assert_eq!(arbiter.name, "Codex[gpt-5.1-codex|low]");

        // A gemini arbiter frees the reserved config.
        let (reviewers, arbiter) = build_roster(&specs, "g", ArbiterFamily::Gemini).unwrap();
        assert_eq!(reviewers.len(), 3);
        assert_eq!(arbiter.name, "Gemini-Arbiter[g]");
    }

    #[test]
    fn only_reserved_model_leaves_no_reviewers() {
        let specs = vec!["gpt-5.1-codex:low".to_string()];
        assert!(matches!(
            build_roster(&specs, "g", ArbiterFamily::Codex),
            Err(ConfigError::NoReviewers)
        ));
    }

    #[test]
    fn env_lookup_ignores_garbage() {
        let env = EnvOverrides::from_lookup(|key| match key {
            "MULTI_REVIEW_SHELL_TIMEOUT_SEC" => Some("not-a-number".into()),
            "MULTI_REVIEW_MAX_ROUNDS" => Some("0".into()),
            "MULTI_REVIEW_MEMO_DIR" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(env, EnvOverrides::default());

        let env = EnvOverrides::from_lookup(|key| match key {
            "MULTI_REVIEW_SHELL_TIMEOUT_SEC" => Some("90.5".into()),
            _ => None,
        });
        assert_eq!(env.shell_timeout_secs, Some(90));
    }
}
