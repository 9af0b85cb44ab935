//! Control line: the one structured line an agent may embed in free text.
//!
//! ```text
//! CONTROL_JSON: {"memo":"remember X","append":true}
//! CONTROL_JSON: {"questions":[{"target":"Codex[gpt-5.1|high]","question":"..."}]}
//! CONTROL_JSON: {"no_questions":true}
//! ```
//!
//! Emission is strict (canonical keys only, compact JSON, one line). Parsing
//! is lenient: the legacy `MEMO_JSON:` prefix, the legacy
//! `{"append": "...", "overwrite": bool}` memo shape, the legacy
//! `{"state": "query" | "final"}` arbiter shape, surrounding backticks and
//! stray text around the JSON object are all accepted.

use serde_json::{json, Map, Value};

use crate::memo::{MemoMode, MemoUpdate};

/// Prefix of the control line emitted by this crate's prompts.
pub const CONTROL_PREFIX: &str = "CONTROL_JSON:";
/// Older prefix still accepted when parsing.
pub const LEGACY_MEMO_PREFIX: &str = "MEMO_JSON:";

/// One clarification request from the arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub target: String,
    pub question: String,
}

/// What the arbiter wants next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterDirective {
    Ask(Vec<QueryRequest>),
    NoQuestions,
}

/// Decoded control-line payload. Either half may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPayload {
    pub memo: Option<MemoUpdate>,
    pub directive: Option<ArbiterDirective>,
}

impl ControlPayload {
    /// Render the canonical control line.
    pub fn to_line(&self) -> String {
        let mut obj = Map::new();
        if let Some(update) = &self.memo {
            obj.insert("memo".into(), Value::String(update.text.clone()));
            obj.insert("append".into(), Value::Bool(update.mode == MemoMode::Append));
        }
        match &self.directive {
            Some(ArbiterDirective::Ask(requests)) => {
                let questions: Vec<Value> = requests
                    .iter()
                    .map(|q| json!({ "target": q.target, "question": q.question }))
                    .collect();
                obj.insert("questions".into(), Value::Array(questions));
            }
            Some(ArbiterDirective::NoQuestions) => {
                obj.insert("no_questions".into(), Value::Bool(true));
            }
            None => {}
        }
        format!("{CONTROL_PREFIX} {}", Value::Object(obj))
    }
}

/// Result of decoding one control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedControl {
    pub payload: ControlPayload,
    /// Field-level problems; the affected field is dropped, the rest kept.
    pub warnings: Vec<String>,
}

/// If `line` is a control line, return its payload text (after the prefix).
pub fn control_payload_text(line: &str) -> Option<&str> {
    let stripped = line.trim().trim_matches('`').trim();
    stripped
        .strip_prefix(CONTROL_PREFIX)
        .or_else(|| stripped.strip_prefix(LEGACY_MEMO_PREFIX))
        .map(str::trim)
}

/// Decode the text after the prefix.
///
/// `Err` means the payload as a whole is unusable (not JSON, not an object).
/// Field-level problems are reported in `DecodedControl::warnings`.
pub fn decode_payload(text: &str) -> Result<DecodedControl, String> {
    let value = parse_json_object(text)?;
    let Value::Object(obj) = value else {
        return Err("control payload is not a JSON object".to_string());
    };

    let mut warnings = Vec::new();
    let memo = decode_memo(&obj, &mut warnings);
    let directive = decode_directive(&obj, &mut warnings);

    Ok(DecodedControl {
        payload: ControlPayload { memo, directive },
        warnings,
    })
}

fn parse_json_object(text: &str) -> Result<Value, String> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }
    // Agents sometimes wrap the object in prose or fences.
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Ok(v);
            }
        }
    }
    Err(format!("control payload is not valid JSON: {}", truncate(text, 80)))
}

fn decode_memo(obj: &Map<String, Value>, warnings: &mut Vec<String>) -> Option<MemoUpdate> {
    let (text, mode) = match (obj.get("memo"), obj.get("append")) {
        (Some(Value::String(text)), append) => {
            let mode = match append {
                None | Some(Value::Null) | Some(Value::Bool(false)) => MemoMode::Replace,
                Some(Value::Bool(true)) => MemoMode::Append,
                Some(other) => {
                    warnings.push(format!("`append` must be a boolean, got {other}"));
                    return None;
                }
            };
            (text.clone(), mode)
        }
        (Some(Value::Null), _) => return None,
        (Some(other), _) => {
            warnings.push(format!("`memo` must be a string, got {other}"));
            return None;
        }
        // Legacy shape: {"append": "<text>", "overwrite": bool}
        (None, Some(Value::String(text))) => {
            let mode = match obj.get("overwrite") {
                Some(Value::Bool(true)) => MemoMode::Replace,
                None | Some(Value::Null) | Some(Value::Bool(false)) => MemoMode::Append,
                Some(other) => {
                    warnings.push(format!("`overwrite` must be a boolean, got {other}"));
                    return None;
                }
            };
            (text.clone(), mode)
        }
        (None, Some(Value::Bool(_)) | Some(Value::Null) | None) => return None,
        (None, Some(other)) => {
            warnings.push(format!("`append` must be a string or boolean, got {other}"));
            return None;
        }
    };

    if text.trim().is_empty() {
        return None;
    }
    Some(MemoUpdate { text, mode })
}

fn decode_directive(
    obj: &Map<String, Value>,
    warnings: &mut Vec<String>,
) -> Option<ArbiterDirective> {
    if let Some(raw) = obj.get("questions") {
        let Value::Array(items) = raw else {
            warnings.push(format!("`questions` must be an array, got {raw}"));
            return None;
        };
        let mut requests = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            match decode_question(item) {
                Some(q) => requests.push(q),
                None => warnings.push(format!(
                    "question #{} is missing a string `target` or `question`",
                    idx + 1
                )),
            }
        }
        return if requests.is_empty() {
            if items.is_empty() {
                Some(ArbiterDirective::NoQuestions)
            } else {
                None
            }
        } else {
            Some(ArbiterDirective::Ask(requests))
        };
    }

    if let Some(flag) = obj.get("no_questions") {
        return match flag {
            Value::Bool(true) => Some(ArbiterDirective::NoQuestions),
            Value::Bool(false) => None,
            other => {
                warnings.push(format!("`no_questions` must be a boolean, got {other}"));
                None
            }
        };
    }

    match obj.get("state").and_then(Value::as_str) {
        Some("final") => Some(ArbiterDirective::NoQuestions),
        Some("query") => match decode_question(&Value::Object(obj.clone())) {
            Some(q) => Some(ArbiterDirective::Ask(vec![q])),
            None => {
                warnings.push("`state: query` without a target and question".to_string());
                None
            }
        },
        _ => None,
    }
}

fn decode_question(item: &Value) -> Option<QueryRequest> {
    let target = item
        .get("target")
        .or_else(|| item.get("target_reviewer"))
        .and_then(Value::as_str)?
        .trim();
    let question = item.get("question").and_then(Value::as_str)?.trim();
    if target.is_empty() || question.is_empty() {
        return None;
    }
    Some(QueryRequest {
        target: target.to_string(),
        question: question.to_string(),
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}
