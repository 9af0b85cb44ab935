//! Findings: priority-tagged issues reported by agents.

use serde::{Deserialize, Serialize};

/// Severity of a finding. `P0` is the most severe.
///
/// `Ord` sorts the most severe first, so `P0 < P1 < P2 < P3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Self::P0, Self::P1, Self::P2, Self::P3];

    /// Parse a marker token (`P0`, `p2`, ...).
    pub fn from_marker(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "P0" => Some(Self::P0),
            "P1" => Some(Self::P1),
            "P2" => Some(Self::P2),
            "P3" => Some(Self::P3),
            _ => None,
        }
    }

    /// P0 and P1 are shown in detail by default; P2/P3 only on request.
    pub fn is_high(self) -> bool {
        matches!(self, Self::P0 | Self::P1)
    }

    pub fn meaning(self) -> &'static str {
        match self {
            Self::P0 => "critical / blocking, must be fixed before merge",
            Self::P1 => "important, should be fixed soon",
            Self::P2 => "normal, worthwhile improvement",
            Self::P3 => "minor / nice-to-have",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P0 => write!(f, "P0"),
            Self::P1 => write!(f, "P1"),
            Self::P2 => write!(f, "P2"),
            Self::P3 => write!(f, "P3"),
        }
    }
}

/// Which agents raised an issue and which agreed with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub proposed_by: Vec<String>,
    pub agreed_by: Vec<String>,
}

impl Attribution {
    fn merge(&mut self, other: &Attribution) {
        for name in &other.proposed_by {
            if !self.proposed_by.contains(name) {
                self.proposed_by.push(name.clone());
            }
        }
        for name in &other.agreed_by {
            if !self.agreed_by.contains(name) {
                self.agreed_by.push(name.clone());
            }
        }
    }
}

/// One reported issue. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub priority: Priority,
    pub title: String,
    /// Everything after the title line, trimmed.
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub needs_human_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

impl Finding {
    pub fn new(priority: Priority, title: impl Into<String>) -> Self {
        Self {
            priority,
            title: title.into(),
            description: String::new(),
            location: None,
            needs_human_review: false,
            attribution: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Key used to recognise the same issue reported twice: the title reduced
    /// to lowercase alphanumeric words, plus the location if any.
    pub fn dedup_key(&self) -> String {
        let words: Vec<String> = self
            .title
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();
        match &self.location {
            Some(loc) => format!("{}@{}", words.join(" "), loc.trim().to_lowercase()),
            None => words.join(" "),
        }
    }
}

/// Merge duplicate findings and order them most-severe first.
///
/// Duplicates (same `dedup_key`) collapse into the first occurrence, which
/// takes the more severe priority, the longer description, and the union of
/// attributions. The sort is stable, so findings of equal priority keep their
/// input order.
pub fn merge_findings(findings: impl IntoIterator<Item = Finding>) -> Vec<Finding> {
    let mut merged: Vec<Finding> = Vec::new();

    for finding in findings {
        let key = finding.dedup_key();
        match merged.iter_mut().find(|f| f.dedup_key() == key) {
            Some(existing) => {
                existing.priority = existing.priority.min(finding.priority);
                existing.needs_human_review |= finding.needs_human_review;
                if finding.description.len() > existing.description.len() {
                    existing.description = finding.description;
                }
                if existing.location.is_none() {
                    existing.location = finding.location;
                }
                match (&mut existing.attribution, &finding.attribution) {
                    (Some(mine), Some(theirs)) => mine.merge(theirs),
                    (None, Some(theirs)) => existing.attribution = Some(theirs.clone()),
                    _ => {}
                }
            }
            None => merged.push(finding),
        }
    }

    merged.sort_by_key(|f| f.priority);
    merged
}
