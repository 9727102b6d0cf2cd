use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in upstream history. Two infos are the same commit when their
/// hashes match, whatever timestamps they carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub date: DateTime<Utc>,
}

impl CommitInfo {
    pub fn new(hash: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            hash: hash.into(),
            date,
        }
    }

    /// First seven characters of the hash, for log lines
    pub fn short(&self) -> &str {
        short_hash(&self.hash)
    }
}

impl PartialEq for CommitInfo {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for CommitInfo {}

impl std::hash::Hash for CommitInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl std::fmt::Display for CommitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.hash, self.date.to_rfc3339())
    }
}

pub fn short_hash(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}
