//! Synthesis report: the run's final artifact, rendered as markdown or JSON.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::arbiter::{ArbiterOutcome, PhaseTransition, QaExchange};
use crate::config::ArbiterMode;
use crate::error::RunWarning;
use crate::finding::{merge_findings, Finding, Priority};
use crate::identity::{AgentIdentity, BackendFamily};
use crate::pool::PoolOutcome;
use crate::review::{ReviewResult, ReviewRound};
use crate::runner::ReviewRequest;

/// Per-reviewer line in the report metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerSummary {
    pub name: String,
    pub family: BackendFamily,
    pub model: String,
    /// Pass whose result the arbiter saw.
    pub round: ReviewRound,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub findings: usize,
    pub elapsed_ms: u64,
}

impl From<&ReviewResult> for ReviewerSummary {
    fn from(r: &ReviewResult) -> Self {
        Self {
            name: r.identity.name.clone(),
            family: r.identity.family,
            model: r.identity.model.clone(),
            round: r.round,
            succeeded: r.is_success(),
            failure: r.failure_reason().map(str::to_string),
            findings: r.findings.len(),
            elapsed_ms: r.elapsed.as_millis() as u64,
        }
    }
}

/// Unified review produced by one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub task: String,
    pub mode: ArbiterMode,
    pub arbiter: String,
    /// Arbiter narrative (translated when an output language was set).
    pub summary: String,
    /// Deduplicated, most severe first.
    pub findings: Vec<Finding>,
    /// Full arbiter output with the control line removed.
    pub text: String,
    pub reviewers: Vec<ReviewerSummary>,
    pub rounds_used: u32,
    pub queries_issued: u32,
    pub qa: Vec<QaExchange>,
    pub transitions: Vec<PhaseTransition>,
    pub warnings: Vec<RunWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub memos_saved: usize,
}

impl SynthesisReport {
    /// Assemble the report from the pool results and the arbiter outcome.
    ///
    /// `warnings` are the run-level warnings gathered before arbitration;
    /// the arbiter's own warnings are appended after them.
    pub fn assemble(
        request: &ReviewRequest,
        mode: ArbiterMode,
        arbiter: &AgentIdentity,
        pool: &PoolOutcome,
        outcome: ArbiterOutcome,
        mut warnings: Vec<RunWarning>,
    ) -> Self {
        warnings.extend(outcome.warnings);
        let synthesis = outcome.synthesis;
        let summary = if synthesis.summary.is_empty() && synthesis.findings.is_empty() {
            synthesis.cleaned.clone()
        } else {
            synthesis.summary
        };

        Self {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            label: request.label.clone(),
            task: request.task.clone(),
            mode,
            arbiter: arbiter.name.clone(),
            summary,
            findings: merge_findings(synthesis.findings),
            text: synthesis.cleaned,
            reviewers: pool.results.iter().map(ReviewerSummary::from).collect(),
            rounds_used: outcome.rounds_used,
            queries_issued: outcome.queries_issued,
            qa: outcome.qa,
            transitions: outcome.transitions,
            warnings,
            language: None,
            memos_saved: 0,
        }
    }

    pub fn findings_by_priority(&self) -> BTreeMap<Priority, Vec<&Finding>> {
        let mut out: BTreeMap<Priority, Vec<&Finding>> = BTreeMap::new();
        for f in &self.findings {
            out.entry(f.priority).or_default().push(f);
        }
        out
    }

    pub fn count(&self, priority: Priority) -> usize {
        self.findings.iter().filter(|f| f.priority == priority).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable rendering.
    ///
    /// Without `include_low_priority` only P0/P1 findings are listed and the
    /// number of hidden P2/P3 findings is stated instead.
    pub fn to_markdown(&self, include_low_priority: bool) -> String {
        let mut md = String::new();

        let title = if self.label.is_empty() {
            "Code review".to_string()
        } else {
            format!("Code review: {}", self.label)
        };
        let _ = writeln!(md, "# {title}\n");
        let _ = writeln!(
            md,
            "_Run `{}` at {} · arbiter {} ({} mode)_\n",
            self.run_id,
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.arbiter,
            self.mode
        );

        md.push_str("## Summary\n\n");
        if self.summary.trim().is_empty() {
            md.push_str("(no summary)\n\n");
        } else {
            let _ = writeln!(md, "{}\n", self.summary.trim());
        }

        md.push_str("## Findings\n\n");
        let shown: Vec<&Finding> = self
            .findings
            .iter()
            .filter(|f| include_low_priority || f.priority.is_high())
            .collect();
        let hidden = self.findings.len() - shown.len();

        if shown.is_empty() {
            md.push_str(if include_low_priority {
                "No issues found.\n\n"
            } else {
                "No P0/P1 issues found.\n\n"
            });
        }
        for f in &shown {
            render_finding(&mut md, f);
        }
        if hidden > 0 {
            let _ = writeln!(
                md,
                "_{hidden} lower-priority (P2/P3) finding(s) not shown._\n"
            );
        }

        md.push_str("## Run metadata\n\n");
        for r in &self.reviewers {
            match &r.failure {
                None => {
                    let _ = writeln!(
                        md,
                        "- {}: ok, {} finding(s), {:.1}s",
                        r.name,
                        r.findings,
                        r.elapsed_ms as f64 / 1000.0
                    );
                }
                Some(reason) => {
                    let _ = writeln!(md, "- {}: failed ({reason})", r.name);
                }
            }
        }
        if self.mode == ArbiterMode::Multi {
            let _ = writeln!(
                md,
                "- Clarification: {} round(s), {} question(s)",
                self.rounds_used, self.queries_issued
            );
        }
        if let Some(lang) = &self.language {
            let _ = writeln!(md, "- Summary language: {lang}");
        }
        if !self.warnings.is_empty() {
            md.push_str("\n### Warnings\n\n");
            for w in &self.warnings {
                let _ = writeln!(md, "- {w}");
            }
        }
        md
    }
}

fn render_finding(md: &mut String, f: &Finding) {
    let _ = writeln!(md, "### [{}] {}\n", f.priority, f.title);
    if let Some(loc) = &f.location {
        let _ = writeln!(md, "Location: `{loc}`\n");
    }
    if f.needs_human_review {
        md.push_str("**NEEDS HUMAN REVIEW**\n\n");
    }
    if !f.description.is_empty() {
        let _ = writeln!(md, "{}\n", f.description);
    }
    if let Some(attr) = &f.attribution {
        let agreed = if attr.agreed_by.is_empty() {
            "none".to_string()
        } else {
            attr.agreed_by.join(", ")
        };
        let _ = writeln!(
            md,
            "_Proposed by: {}; agreed by: {}_\n",
            attr.proposed_by.join(", "),
            agreed
        );
    }
}
