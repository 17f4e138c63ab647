// Presence Management
//
// This module tracks which transport sessions currently hold a display name.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque transport-session identifier, assigned when the socket connects
pub type SessionId = String;

/// Presence record - one per joined session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Display name as announced
    pub username: String,

    /// Timestamp of the successful join
    pub joined_at: DateTime<Utc>,

    /// Owning session
    pub socket_id: SessionId,

    /// Timestamp of the last matching heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    /// Last moment the session proved it was alive
    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_seen.unwrap_or(self.joined_at)
    }

    pub fn idle_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_active()
    }
}

/// Why a join was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinRejection {
    #[error("username '{username}' is already online")]
    NameTaken { username: String },
}

/// Result of a join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Accepted(PresenceRecord),
    Rejected(JoinRejection),
}

impl JoinOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Connection registry: session id -> presence record
///
/// Invariant: no two records carry usernames that are equal ignoring case.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: HashMap<SessionId, PresenceRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any joined session holds `username`, ignoring case
    pub fn is_name_online(&self, username: &str) -> bool {
        let wanted = username.to_lowercase();
        self.records
            .values()
            .any(|r| r.username.to_lowercase() == wanted)
    }

    /// Try to claim `username` for `session_id`.
    ///
    /// A session that already holds a record and joins again replaces it,
    /// provided the new name is free (its own current name counts as taken).
    pub fn join(&mut self, session_id: &str, username: &str, now: DateTime<Utc>) -> JoinOutcome {
        if self.is_name_online(username) {
            return JoinOutcome::Rejected(JoinRejection::NameTaken {
                username: username.to_string(),
            });
        }

        let record = PresenceRecord {
            username: username.to_string(),
            joined_at: now,
            socket_id: session_id.to_string(),
            last_seen: None,
        };
        self.records.insert(session_id.to_string(), record.clone());
        JoinOutcome::Accepted(record)
    }

    /// Refresh `last_seen` when the session still holds exactly `username`.
    /// Returns whether anything changed.
    pub fn heartbeat(&mut self, session_id: &str, username: &str, now: DateTime<Utc>) -> bool {
        match self.records.get_mut(session_id) {
            Some(record) if record.username == username => {
                record.last_seen = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Remove the record owned by `session_id`, if any
    pub fn disconnect(&mut self, session_id: &str) -> Option<PresenceRecord> {
        self.records.remove(session_id)
    }

    /// Remove every record idle for strictly longer than `timeout`
    pub fn evict_idle(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<PresenceRecord> {
        let stale: Vec<SessionId> = self
            .records
            .iter()
            .filter(|(_, record)| record.idle_at(now) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.records.remove(&id))
            .collect()
    }

    pub fn get(&self, session_id: &str) -> Option<&PresenceRecord> {
        self.records.get(session_id)
    }

    pub fn records(&self) -> Vec<PresenceRecord> {
        self.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
