//! CLI-backed agents: Codex and Gemini command-line tools driven over stdin.
//!
//! ```text
//! codex --yolo --search --config model_reasoning_effort=<effort> exec --model <model> -
//! gemini --yolo --model <model>
//! ```
//!
//! The prompt is written to the child's stdin and stdout is the answer. Each
//! call runs in its own process group under a timeout; a non-zero exit is
//! retried, a timeout is not.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use review_coordination::{AgentIdentity, AgentInvoker, BackendFamily, InvocationError, RetryCategory, Translator};

/// Bytes of stderr kept in an error.
const STDERR_MAX_BYTES: usize = 4000;
/// Model used for report translation.
pub const TRANSLATOR_MODEL: &str = "gpt-5.1";

/// Program and arguments for one agent.
pub fn command_for(identity: &AgentIdentity) -> Result<(&'static str, Vec<String>), InvocationError> {
    match identity.family {
        BackendFamily::Codex => {
            let mut args = vec!["--yolo".to_string(), "--search".to_string()];
            if let Some(effort) = &identity.effort {
                args.push("--config".to_string());
                args.push(format!("model_reasoning_effort={effort}"));
            }
            args.extend([
                "exec".to_string(),
                "--model".to_string(),
                identity.model.clone(),
                "-".to_string(),
            ]);
            Ok(("codex", args))
        }
        BackendFamily::Gemini => Ok((
            "gemini",
            vec!["--yolo".to_string(), "--model".to_string(), identity.model.clone()],
        )),
        other => Err(InvocationError::Backend(format!(
            "no command-line backend for {other} agents"
        ))),
    }
}

/// Shell-quoted rendering for logs.
fn render_command(program: &str, args: &[String]) -> String {
    shlex::try_join(std::iter::once(program).chain(args.iter().map(String::as_str)))
        .unwrap_or_else(|_| format!("{program} {}", args.join(" ")))
}

fn truncate_stderr(stderr: &[u8]) -> String {
    let s = String::from_utf8_lossy(stderr);
    if s.len() <= STDERR_MAX_BYTES {
        return s.trim().to_string();
    }
    let mut cut = STDERR_MAX_BYTES;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...\n[truncated at {} bytes]", &s[..cut], s.len())
}

/// Runs agents as local CLI processes.
#[derive(Debug, Clone)]
pub struct CliInvoker {
    workdir: PathBuf,
    timeout: Duration,
    max_attempts: u32,
}

impl CliInvoker {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            max_attempts: RetryCategory::Transient.default_max_attempts().unwrap_or(1),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run `program` once with `input` on stdin.
    pub async fn run_once(&self, program: &str, args: &[String], input: &str) -> Result<String, InvocationError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a timeout takes down the agent's children too.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| InvocationError::Spawn(format!("{program}: {e}")))?;

        // Feed stdin concurrently so a chatty child cannot deadlock on a full pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "agent closed stdin early");
                }
            });
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(InvocationError::Spawn(format!("{program}: {e}"))),
            Err(_) => return Err(InvocationError::TimedOut(self.timeout)),
        };

        if !output.status.success() {
            return Err(InvocationError::NonZeroExit {
                code: output.status.code(),
                stderr: truncate_stderr(&output.stderr),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run with retries on retriable failures.
    async fn run_with_retry(&self, label: &str, program: &str, args: &[String], input: &str) -> Result<String, InvocationError> {
        let mut attempt = 1;
        loop {
            match self.run_once(program, args, input).await {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retriable() && attempt < self.max_attempts => {
                    warn!(agent = label, attempt, max_attempts = self.max_attempts, error = %e, "agent CLI failed; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl AgentInvoker for CliInvoker {
    async fn invoke(
        &self,
        identity: &AgentIdentity,
        prompt: &str,
        _context: &str,
    ) -> Result<String, InvocationError> {
        let (program, args) = command_for(identity)?;
        debug!(
            agent = %identity,
            command = %render_command(program, &args),
            workdir = %self.workdir.display(),
            "spawning agent CLI"
        );
        self.run_with_retry(&identity.name, program, &args, prompt).await
    }
}

/// Translates report text with a Codex CLI call.
#[derive(Debug, Clone)]
pub struct CliTranslator {
    invoker: CliInvoker,
    identity: AgentIdentity,
}

impl CliTranslator {
    pub fn new(invoker: CliInvoker) -> Self {
        Self {
            invoker,
            identity: AgentIdentity::new("Translator", BackendFamily::Codex, TRANSLATOR_MODEL),
        }
    }
}

pub fn translation_prompt(text: &str, language: &str) -> String {
    format!(
        "You are a professional technical translator.\n\n\
         Task:\n\
         - Translate the following Markdown software code review into {language}.\n\
         - Keep all Markdown structure, headings, lists, code blocks and inline code exactly as \
         they are.\n\
         - Do not add commentary or explanations.\n\
         - Translate only natural language; keep code identifiers, file paths and keywords in \
         their original form.\n\n\
         <INPUT_MARKDOWN>\n{text}\n</INPUT_MARKDOWN>"
    )
}

#[async_trait]
impl Translator for CliTranslator {
    async fn translate(&self, text: &str, language: &str) -> Result<String, InvocationError> {
        let (program, args) = command_for(&self.identity)?;
        self.invoker
            .run_with_retry(&self.identity.name, program, &args, &translation_prompt(text, language))
            .await
    }
}
