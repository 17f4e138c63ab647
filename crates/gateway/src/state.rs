// Presence state: the connection registry and the identity ledger, owned
// together so a join updates both in one step.

use crate::ledger::IdentityLedger;
use crate::presence::{ConnectionRegistry, JoinOutcome, PresenceRecord};
use crate::protocol::RosterSnapshot;
use chrono::{DateTime, Duration, Utc};

/// What a sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records removed for idling past the timeout
    pub evicted: Vec<PresenceRecord>,
    /// Roster size when the sweep started
    pub roster_before: usize,
}

impl SweepReport {
    /// A sweep over an empty roster stays silent
    pub fn should_broadcast(&self) -> bool {
        self.roster_before > 0
    }
}

#[derive(Debug, Default)]
pub struct PresenceState {
    registry: ConnectionRegistry,
    ledger: IdentityLedger,
}

impl PresenceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, session_id: &str, username: &str, now: DateTime<Utc>) -> JoinOutcome {
        let outcome = self.registry.join(session_id, username, now);
        if let JoinOutcome::Accepted(record) = &outcome {
            self.ledger.record(&record.username);
        }
        outcome
    }

    pub fn heartbeat(&mut self, session_id: &str, username: &str, now: DateTime<Utc>) -> bool {
        self.registry.heartbeat(session_id, username, now)
    }

    pub fn disconnect(&mut self, session_id: &str) -> Option<PresenceRecord> {
        self.registry.disconnect(session_id)
    }

    /// Evict sessions idle for strictly longer than `timeout`. The ledger is
    /// never touched.
    pub fn sweep(&mut self, now: DateTime<Utc>, timeout: Duration) -> SweepReport {
        let roster_before = self.registry.len();
        let evicted = self.registry.evict_idle(now, timeout);
        SweepReport {
            evicted,
            roster_before,
        }
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            online_users: self.registry.records(),
            total_users_count: self.registry.len(),
            unique_users_count: self.ledger.count(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &IdentityLedger {
        &self.ledger
    }
}
