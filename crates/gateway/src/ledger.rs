// Unique-identity ledger
//
// Every username that ever joined successfully, for the life of the process.
// Storage is case-sensitive: "Ana" and "ana" count as two identities even
// though they can never be online at the same time.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct IdentityLedger {
    names: HashSet<String>,
}

impl IdentityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `username`; returns true the first time it is seen
    pub fn record(&mut self, username: &str) -> bool {
        self.names.insert(username.to_string())
    }

    pub fn contains(&self, username: &str) -> bool {
        self.names.contains(username)
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }
}
