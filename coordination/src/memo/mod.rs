//! Per-agent private memos carried across runs.
//!
//! A memo is free text owned by exactly one agent identity. Agents update it
//! through the control line; the orchestrator persists the result only after
//! a successful run.

pub mod ledger;
pub mod store;

pub use ledger::MemoLedger;
pub use store::{FileMemoStore, MemoKey, MemoKeyspace, MemoStore, MemoStoreError};

use serde::{Deserialize, Serialize};

/// Persistent free-text note for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Memo(String);

impl Memo {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for Memo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoMode {
    Replace,
    Append,
}

/// A requested change to an agent's memo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoUpdate {
    pub text: String,
    pub mode: MemoMode,
}

impl MemoUpdate {
    pub fn replace(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: MemoMode::Replace,
        }
    }

    pub fn append(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: MemoMode::Append,
        }
    }

    /// Apply this update to the current memo (if any).
    ///
    /// Appending to an empty memo behaves like a replace. Otherwise the new
    /// text starts on its own line.
    pub fn apply(&self, current: Option<&Memo>) -> Memo {
        match (self.mode, current) {
            (MemoMode::Append, Some(memo)) if !memo.as_str().is_empty() => {
                let mut text = memo.as_str().to_string();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&self.text);
                Memo(text)
            }
            _ => Memo(self.text.clone()),
        }
    }

    /// Fold `next` into this update so that applying the result equals
    /// applying `self` and then `next`.
    pub fn then(self, next: MemoUpdate) -> MemoUpdate {
        match next.mode {
            MemoMode::Replace => next,
            MemoMode::Append if self.text.is_empty() => MemoUpdate {
                text: next.text,
                mode: self.mode,
            },
            MemoMode::Append => {
                let mut text = self.text;
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&next.text);
                MemoUpdate {
                    text,
                    mode: self.mode,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_ignores_current() {
        let current = Memo::new("old");
        assert_eq!(MemoUpdate::replace("new").apply(Some(&current)).as_str(), "new");
    }

    #[test]
    fn append_adds_newline_separator() {
        let current = Memo::new("first");
        assert_eq!(
            MemoUpdate::append("second").apply(Some(&current)).as_str(),
            "first\nsecond"
        );
        let current = Memo::new("first\n");
        assert_eq!(
            MemoUpdate::append("second").apply(Some(&current)).as_str(),
            "first\nsecond"
        );
    }

    #[test]
    fn chained_updates_match_sequential_application() {
        let current = Memo::new("base");
        let cases = [
            (MemoUpdate::append("one"), MemoUpdate::append("two")),
            (MemoUpdate::replace("one"), MemoUpdate::append("two")),
            (MemoUpdate::append("one"), MemoUpdate::replace("two")),
            (MemoUpdate::replace(""), MemoUpdate::append("two")),
        ];
        for (first, second) in cases {
            let stepwise = second.apply(Some(&first.apply(Some(&current))));
            let folded = first.clone().then(second.clone()).apply(Some(&current));
            assert_eq!(folded, stepwise, "{first:?} then {second:?}");
        }
        assert_eq!(
            MemoUpdate::append("one").then(MemoUpdate::append("two")),
            MemoUpdate::append("one\ntwo")
        );
    }

    #[test]
    fn append_to_nothing_creates_memo() {
        assert_eq!(MemoUpdate::append("hello").apply(None).as_str(), "hello");
        assert_eq!(
            MemoUpdate::append("hello").apply(Some(&Memo::default())).as_str(),
            "hello"
        );
    }
}
