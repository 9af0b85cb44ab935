//! Review context providers: the single text blob every agent receives.
//!
//! `diff` and `repo` do not inline code. The CLI agents run in the
//! repository and inspect it with their own tools; the context only tells
//! them where to look. `stdin` passes piped text through verbatim.

use std::path::Path;
use std::process::Stdio;

use clap::ValueEnum;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("no git diff found (nothing to review)")]
    NoDiff,

    #[error("git diff exited with status {0:?}; is this a git repository?")]
    GitFailed(Option<i32>),

    #[error("failed to run git: {0}")]
    GitSpawn(#[source] std::io::Error),

    #[error("no data read from stdin for context")]
    EmptyStdin,

    #[error("failed to read stdin: {0}")]
    Stdin(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContextMode {
    /// Current git diff (or staged changes with --cached)
    Diff,
    /// The repository in the working directory
    Repo,
    /// Text piped on stdin, e.g. `gh pr diff 123 | multi-review --context-mode stdin`
    Stdin,
}

impl std::fmt::Display for ContextMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Diff => write!(f, "diff"),
            Self::Repo => write!(f, "repo"),
            Self::Stdin => write!(f, "stdin"),
        }
    }
}

pub fn diff_context() -> String {
    "CONTEXT_MODE: diff\n\
     The code under review is the current git diff in this repository. Use your available \
     tools (git diff, search, file inspection) to examine the changed code directly from the \
     working directory."
        .to_string()
}

pub fn repo_context() -> String {
    "CONTEXT_MODE: repo\n\
     The code under review is the repository in your current working directory. Inspect \
     whatever you need directly from disk with your tools instead of relying on inlined code."
        .to_string()
}

/// Wrap piped text. Whitespace-only input is an error.
pub fn stdin_context(data: &str) -> Result<String, ContextError> {
    if data.trim().is_empty() {
        return Err(ContextError::EmptyStdin);
    }
    Ok(format!(
        "CONTEXT_MODE: stdin\nAdditional text context from stdin follows below.\n\n{data}"
    ))
}

/// Fail fast when there is nothing to review.
///
/// `git diff --quiet` exits 0 without changes, 1 with changes, >1 on error.
pub async fn ensure_diff_exists(repo_root: &Path, cached: bool) -> Result<(), ContextError> {
    let mut cmd = Command::new("git");
    cmd.arg("diff");
    if cached {
        cmd.arg("--cached");
    }
    let status = cmd
        .arg("--quiet")
        .current_dir(repo_root)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(ContextError::GitSpawn)?;

    match status.code() {
        Some(1) => Ok(()),
        Some(0) => Err(ContextError::NoDiff),
        code => Err(ContextError::GitFailed(code)),
    }
}

/// Produce the context text for `mode`.
pub async fn resolve_context(mode: ContextMode, cached: bool, repo_root: &Path) -> Result<String, ContextError> {
    match mode {
        ContextMode::Diff => {
            ensure_diff_exists(repo_root, cached).await?;
            Ok(diff_context())
        }
        ContextMode::Repo => Ok(repo_context()),
        ContextMode::Stdin => {
            let mut data = String::new();
            tokio::io::stdin()
                .read_to_string(&mut data)
                .await
                .map_err(ContextError::Stdin)?;
            stdin_context(&data)
        }
    }
}
