//! Memo persistence: key normalization, collision checks, durable file store.
//!
//! Layout on disk:
//!
//! ```text
//! <base>/<memo-key>/memo.txt
//! ```
//!
//! Saves write `memo.txt.tmp`, fsync it, then rename over `memo.txt`, so the
//! previous memo survives any failure before the rename.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::Memo;
use crate::error::{ReviewError, ReviewOutcome};
use crate::identity::AgentIdentity;

const MEMO_FILE: &str = "memo.txt";
const MEMO_TMP_FILE: &str = "memo.txt.tmp";

/// Memo store I/O failure, scoped to one identity's memo.
#[derive(Debug, Error)]
pub enum MemoStoreError {
    #[error("memo I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MemoStoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Slug-safe storage key derived from an identity name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoKey(String);

impl MemoKey {
    /// Lowercase, map runs of characters outside `[a-z0-9._]` to `-`, trim
    /// leading/trailing `-` and `.`. Empty results become `agent`.
    pub fn normalize(name: &str) -> Self {
        let mut slug = String::with_capacity(name.len());
        let mut pending_dash = false;
        for c in name.chars().flat_map(char::to_lowercase) {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c);
            } else {
                pending_dash = true;
            }
        }
        let trimmed = slug.trim_matches(|c| c == '-' || c == '.');
        if trimmed.is_empty() {
            Self("agent".to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity name → memo key mapping for one run, verified collision-free.
#[derive(Debug, Clone, Default)]
pub struct MemoKeyspace {
    keys: HashMap<String, MemoKey>,
}

impl MemoKeyspace {
    /// Build the keyspace, failing on duplicate names or key collisions.
    pub fn build<'a>(identities: impl IntoIterator<Item = &'a AgentIdentity>) -> ReviewOutcome<Self> {
        let mut keys: HashMap<String, MemoKey> = HashMap::new();
        let mut owners: HashMap<MemoKey, String> = HashMap::new();

        for identity in identities {
            if keys.contains_key(&identity.name) {
                return Err(ReviewError::DuplicateIdentity {
                    name: identity.name.clone(),
                });
            }
            let key = MemoKey::normalize(&identity.name);
            if let Some(owner) = owners.get(&key) {
                return Err(ReviewError::IdentityCollision {
                    first: owner.clone(),
                    second: identity.name.clone(),
                    key: key.to_string(),
                });
            }
            owners.insert(key.clone(), identity.name.clone());
            keys.insert(identity.name.clone(), key);
        }

        Ok(Self { keys })
    }

    pub fn key_for(&self, name: &str) -> Option<&MemoKey> {
        self.keys.get(name)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Durable key → memo storage.
pub trait MemoStore: Send + Sync {
    /// Load a memo. A memo that was never written is `Ok(None)`.
    fn load(&self, key: &MemoKey) -> Result<Option<Memo>, MemoStoreError>;

    /// Persist a memo, replacing any previous value atomically.
    fn save(&self, key: &MemoKey, memo: &Memo) -> Result<(), MemoStoreError>;
}

/// File-backed memo store rooted at an operator-chosen directory.
#[derive(Debug, Clone)]
pub struct FileMemoStore {
    root: PathBuf,
}

impl FileMemoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the memo file for `key`.
    pub fn memo_path(&self, key: &MemoKey) -> PathBuf {
        self.root.join(key.as_str()).join(MEMO_FILE)
    }
}

impl MemoStore for FileMemoStore {
    fn load(&self, key: &MemoKey) -> Result<Option<Memo>, MemoStoreError> {
        let path = self.memo_path(key);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(Memo::new(text))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MemoStoreError::io(&path, e)),
        }
    }

    fn save(&self, key: &MemoKey, memo: &Memo) -> Result<(), MemoStoreError> {
        let dir = self.root.join(key.as_str());
        fs::create_dir_all(&dir).map_err(|e| MemoStoreError::io(&dir, e))?;

        let temp_path = dir.join(MEMO_TMP_FILE);
        let final_path = dir.join(MEMO_FILE);

        // Write and sync the temp file first
        let write_temp = || -> io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(memo.as_str().as_bytes())?;
            file.sync_all()
        };
        if let Err(e) = write_temp() {
            let _ = fs::remove_file(&temp_path);
            return Err(MemoStoreError::io(&temp_path, e));
        }

        // Atomic rename
        fs::rename(&temp_path, &final_path).map_err(|e| MemoStoreError::io(&final_path, e))?;

        Ok(())
    }
}
