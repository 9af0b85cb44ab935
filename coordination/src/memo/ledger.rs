//! In-run memo working set.
//!
//! Loaded once at run start, updated in memory as agent outputs arrive, and
//! written back only after the run succeeds. A memo whose stored value could
//! not be read is never written back, so an unreadable file is not clobbered.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use super::{Memo, MemoKey, MemoKeyspace, MemoStore, MemoUpdate};
use crate::error::RunWarning;

#[derive(Debug, Clone)]
struct Entry {
    key: MemoKey,
    current: Option<Memo>,
    dirty: bool,
    /// False when the stored memo failed to load.
    writable: bool,
}

/// Working copy of every configured agent's memo for one run.
#[derive(Debug, Clone, Default)]
pub struct MemoLedger {
    entries: BTreeMap<String, Entry>,
}

impl MemoLedger {
    /// Load the memo of every identity in `keyspace`.
    ///
    /// Load failures are soft: the agent starts with an empty memo and the
    /// failure is returned as a warning.
    pub fn load<'a>(
        store: &dyn MemoStore,
        keyspace: &MemoKeyspace,
        names: impl IntoIterator<Item = &'a str>,
    ) -> (Self, Vec<RunWarning>) {
        let mut entries = BTreeMap::new();
        let mut warnings = Vec::new();

        for name in names {
            let Some(key) = keyspace.key_for(name) else {
                continue;
            };
            let (current, writable) = match store.load(key) {
                Ok(memo) => (memo, true),
                Err(e) => {
                    warn!(agent = %name, error = %e, "memo load failed; starting empty");
                    warnings.push(RunWarning::MemoLoadFailed {
                        agent: name.to_string(),
                        reason: e.to_string(),
                    });
                    (None, false)
                }
            };
            entries.insert(
                name.to_string(),
                Entry {
                    key: key.clone(),
                    current,
                    dirty: false,
                    writable,
                },
            );
        }

        (Self { entries }, warnings)
    }

    pub fn memo_for(&self, name: &str) -> Option<&Memo> {
        self.entries.get(name).and_then(|e| e.current.as_ref())
    }

    /// Owned copy of every non-empty memo, for handing to spawned tasks.
    pub fn snapshot(&self) -> HashMap<String, Memo> {
        self.entries
            .iter()
            .filter_map(|(name, e)| e.current.clone().map(|m| (name.clone(), m)))
            .collect()
    }

    /// Apply an update for `name`. Returns false for unknown agents.
    pub fn apply(&mut self, name: &str, update: &MemoUpdate) -> bool {
        let Some(entry) = self.entries.get_mut(name) else {
            return false;
        };
        let next = update.apply(entry.current.as_ref());
        if entry.current.as_ref() != Some(&next) {
            debug!(agent = %name, mode = ?update.mode, chars = next.as_str().len(), "memo updated");
            entry.current = Some(next);
            entry.dirty = true;
        }
        true
    }

    /// Names of agents whose memo changed during the run.
    pub fn dirty(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Write every changed memo. Returns the number saved and any failures.
    pub fn persist(&self, store: &dyn MemoStore) -> (usize, Vec<RunWarning>) {
        let mut saved = 0;
        let mut warnings = Vec::new();

        for (name, entry) in self.entries.iter().filter(|(_, e)| e.dirty) {
            let Some(memo) = entry.current.as_ref() else {
                continue;
            };
            if !entry.writable {
                warnings.push(RunWarning::MemoSaveFailed {
                    agent: name.clone(),
                    reason: "stored memo could not be read; not overwriting it".to_string(),
                });
                continue;
            }
            match store.save(&entry.key, memo) {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!(agent = %name, error = %e, "memo save failed");
                    warnings.push(RunWarning::MemoSaveFailed {
                        agent: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        (saved, warnings)
    }
}
