//! Hardlink detection by file identity.

use crate::types::FileIdentity;
use std::collections::HashMap;

/// Outcome of recording a path under its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// First time this identity was seen; the path is now its canonical name
    New,

    /// The identity was already archived under this path
    Seen(String),
}

/// Maps file identities to the first archive path they were written under.
///
/// Lives for one archive run. Entries are never removed.
#[derive(Debug, Default)]
pub struct IdentityTracker {
    first_seen: HashMap<FileIdentity, String>,
}

impl IdentityTracker {
    pub fn new() -> Self {
        IdentityTracker::default()
    }

    /// Look up `identity`, recording `path` for it if it is new.
    pub fn record_or_lookup(&mut self, identity: FileIdentity, path: &str) -> Recorded {
        match self.first_seen.get(&identity) {
            Some(first) => Recorded::Seen(first.clone()),
            None => {
                self.first_seen.insert(identity, path.to_string());
                Recorded::New
            }
        }
    }

    /// Number of distinct identities recorded
    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}
