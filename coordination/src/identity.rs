//! Agent identities: who a reviewer or arbiter is, and which backend runs it.

use serde::{Deserialize, Serialize};

/// Backend family an agent runs on.
///
/// The core never branches on this; it is carried so the invoker
/// collaborator can pick the right transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFamily {
    Codex,
    Gemini,
    Claude,
    Custom,
}

impl std::fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codex => write!(f, "codex"),
            Self::Gemini => write!(f, "gemini"),
            Self::Claude => write!(f, "claude"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// A named agent: opaque name, backend family, model and optional tuning.
///
/// `name` is the key for memo lookup and for addressing clarification
/// queries, so it must be unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub name: String,
    pub family: BackendFamily,
    /// Backend model identifier (e.g. `gpt-5.1`).
    pub model: String,
    /// Optional tuning parameter such as a reasoning effort level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, family: BackendFamily, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family,
            model: model.into(),
            effort: None,
        }
    }

    pub fn with_effort(mut self, effort: impl Into<String>) -> Self {
        self.effort = Some(effort.into());
        self
    }

    /// Conventional display name, e.g. `Codex[gpt-5.1|high]` or `Gemini[gemini-3-pro-preview]`.
    pub fn conventional_name(family: BackendFamily, model: &str, effort: Option<&str>) -> String {
        let family = match family {
            BackendFamily::Codex => "Codex",
            BackendFamily::Gemini => "Gemini",
            BackendFamily::Claude => "Claude",
            BackendFamily::Custom => "Agent",
        };
        match effort {
            Some(effort) => format!("{family}[{model}|{effort}]"),
            None => format!("{family}[{model}]"),
        }
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
