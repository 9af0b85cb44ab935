//! Tolerant parser for semi-structured agent output.
//!
//! A finding starts at a line whose first token is a priority marker:
//!
//! ```text
//! [P0] Title            P1: Title           - [P2] Title
//! 1. **[P3]** Title     P0 - Title          P2 Title
//! ```
//!
//! Everything up to the next marker belongs to that finding. A marker alone
//! on its line takes its title from the next non-empty line. Text before the
//! first marker is the summary. Control lines are pulled out wherever they
//! appear and merged in order: memo updates accumulate, the last directive
//! wins. Nothing in here returns an error: problems become warnings.

use std::sync::LazyLock;

use regex::Regex;

use super::control::{control_payload_text, decode_payload, ArbiterDirective};
use crate::finding::{Attribution, Finding, Priority};
use crate::memo::MemoUpdate;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*+]\s+|\d+[.)]\s+)?(?:\*\*)?(?:\[(P[0-3])\](?:\*\*)?\s*[:\-]?\s*|(P[0-3])(?:\*\*)?(?:\s*[:\-]\s*|\s+))(.*)$",
    )
    .expect("MARKER_RE regex should compile")
});

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*+]\s+)?(?:\*\*)?location(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.+)$")
        .expect("LOCATION_RE regex should compile")
});

static PATH_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`([\w./-]+\.[A-Za-z0-9]+(?::\d+(?:-\d+)?)?)`")
        .expect("PATH_REF_RE regex should compile")
});

static ATTRIBUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)models:\s*proposed_by\s*=\s*\[(.*)\]\s*,?\s*agreed_by\s*=\s*\[(.*)\]")
        .expect("ATTRIBUTION_RE regex should compile")
});

/// Titles that mark a section heading rather than an issue (`**P0 issues**`).
const SECTION_WORDS: &[&str] = &["issue", "issues", "findings", "none"];

/// Everything extracted from one agent output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    /// Narrative text before the first finding.
    pub summary: String,
    pub findings: Vec<Finding>,
    /// The raw output with control lines removed.
    pub cleaned: String,
    pub memo_update: Option<MemoUpdate>,
    pub directive: Option<ArbiterDirective>,
    pub warnings: Vec<String>,
}

struct OpenFinding {
    priority: Priority,
    title: String,
    body: Vec<String>,
}

/// Parse raw agent output. Never fails.
pub fn parse_agent_output(raw: &str) -> ParsedOutput {
    let mut out = ParsedOutput::default();
    let mut kept_lines: Vec<&str> = Vec::new();
    let mut summary_lines: Vec<&str> = Vec::new();
    let mut current: Option<OpenFinding> = None;
    let mut in_fence = false;

    for line in raw.lines() {
        if let Some(payload) = control_payload_text(line) {
            match decode_payload(payload) {
                Ok(decoded) => {
                    out.warnings.extend(decoded.warnings);
                    if let Some(update) = decoded.payload.memo {
                        out.memo_update = Some(match out.memo_update.take() {
                            Some(earlier) => earlier.then(update),
                            None => update,
                        });
                    }
                    if let Some(directive) = decoded.payload.directive {
                        if out.directive.replace(directive).is_some() {
                            out.warnings.push(
                                "multiple arbiter directives; the last one wins".to_string(),
                            );
                        }
                    }
                }
                Err(e) => out.warnings.push(e),
            }
            continue;
        }
        kept_lines.push(line);

        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }

        if !in_fence {
            if let Some((priority, title)) = match_marker(line) {
                if let Some(open) = current.take() {
                    close_into(open, &mut out);
                }
                current = Some(OpenFinding {
                    priority,
                    title,
                    body: Vec::new(),
                });
                continue;
            }
        }

        match current.as_mut() {
            Some(open) => open.body.push(line.to_string()),
            None => summary_lines.push(line),
        }
    }

    if let Some(open) = current.take() {
        close_into(open, &mut out);
    }

    out.summary = summary_lines.join("\n").trim().to_string();
    out.cleaned = kept_lines.join("\n").trim().to_string();
    out
}

fn match_marker(line: &str) -> Option<(Priority, String)> {
    let caps = MARKER_RE.captures(line)?;
    let token = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let priority = Priority::from_marker(token)?;
    let title = clean_title(caps.get(3).map(|m| m.as_str()).unwrap_or_default());

    let bare = title.trim_end_matches(':').to_ascii_lowercase();
    if SECTION_WORDS.contains(&bare.as_str()) {
        return None;
    }
    Some((priority, title))
}

fn close_into(open: OpenFinding, out: &mut ParsedOutput) {
    match close_finding(open) {
        Some(finding) => out.findings.push(finding),
        None => out
            .warnings
            .push("priority marker with no title or body was ignored".to_string()),
    }
}

fn close_finding(mut open: OpenFinding) -> Option<Finding> {
    if open.title.is_empty() {
        // Bare marker: the first non-empty body line is the title.
        let idx = open.body.iter().position(|l| !l.trim().is_empty())?;
        let line = open.body.remove(idx);
        open.body.drain(..idx);
        open.title = clean_title(&line);
    }

    let description = open.body.join("\n").trim().to_string();
    let mut finding = Finding::new(open.priority, open.title).with_description(description);

    let full_text = format!("{}\n{}", finding.title, finding.description);

    finding.location = open
        .body
        .iter()
        .find_map(|l| LOCATION_RE.captures(l))
        .map(|c| c[1].trim().trim_matches('*').trim().trim_matches('`').to_string())
        .or_else(|| PATH_REF_RE.captures(&full_text).map(|c| c[1].to_string()));

    finding.needs_human_review = full_text.to_ascii_uppercase().contains("NEEDS HUMAN REVIEW");

    finding.attribution = ATTRIBUTION_RE.captures(&full_text).map(|c| Attribution {
        proposed_by: split_names(&c[1]),
        agreed_by: split_names(&c[2]),
    });

    Some(finding)
}

fn clean_title(raw: &str) -> String {
    raw.trim().trim_matches('*').trim().to_string()
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(|n| n.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}
