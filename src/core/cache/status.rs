// src/core/cache/status.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome classification of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupStatus {
    /// The requested data was served entirely from cache.
    Hit,
    /// The key was absent, expired, or the cached extents did not overlap the request.
    KeyMiss,
    /// The key was present but only part of the requested extent was cached.
    RangeMiss,
    /// The client asked for the cached entry to be discarded and rebuilt.
    Purge,
}

impl LookupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStatus::Hit => "hit",
            LookupStatus::KeyMiss => "keymiss",
            LookupStatus::RangeMiss => "rangemiss",
            LookupStatus::Purge => "purge",
        }
    }
}

impl fmt::Display for LookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
