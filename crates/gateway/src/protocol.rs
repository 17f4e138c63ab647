// Chatroom WebSocket Protocol
//
// Every frame is a JSON text message of the form
// `{"event": "<name>", "payload": <value>}`.
//
// Protocol flow:
// 1. Client connects and announces a display name with "user-join"
// 2. Server answers the requester alone with "username-taken", or tells
//    everyone "user-joined" followed by "users-updated"
// 3. Client pushes "user-heartbeat" periodically to stay on the roster
// 4. Server pushes "user-left" / "users-updated" whenever the roster shrinks

use crate::presence::PresenceRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event frame from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    /// Announce a display name
    #[serde(rename = "user-join")]
    UserJoin(String),

    /// Keepalive carrying the name the client believes it holds
    #[serde(rename = "user-heartbeat")]
    UserHeartbeat(String),

    /// Ask for the current roster (answered to the requester only)
    #[serde(rename = "users-online")]
    UsersOnline,
}

/// Event frame from server to client(s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    /// Someone joined (broadcast)
    #[serde(rename = "user-joined")]
    UserJoined(PresenceChange),

    /// Someone left or was evicted (broadcast)
    #[serde(rename = "user-left")]
    UserLeft(PresenceChange),

    /// Fresh roster (broadcast)
    #[serde(rename = "users-updated")]
    UsersUpdated(RosterSnapshot),

    /// Join rejected (requester only)
    #[serde(rename = "username-taken")]
    UsernameTaken(UsernameTaken),

    /// Reply to "users-online" (requester only)
    #[serde(rename = "online-users")]
    OnlineUsers(OnlineUsers),
}

/// Full roster at the time of computation. Derived on demand, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSnapshot {
    /// Current records, in registry iteration order
    pub online_users: Vec<PresenceRecord>,

    /// Number of connected (joined) sessions
    pub total_users_count: usize,

    /// Number of distinct names ever joined
    pub unique_users_count: usize,
}

/// Payload of "user-joined" and "user-left"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    /// Name that joined or left
    pub username: String,

    /// When the change was applied
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub roster: RosterSnapshot,
}

/// Payload of "username-taken"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameTaken {
    /// Human-readable explanation
    pub message: String,

    /// The rejected name, as announced
    pub username: String,
}

impl UsernameTaken {
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            message: format!(
                "The name \"{}\" is already in use. Choose another name.",
                username
            ),
            username,
        }
    }
}

/// Payload of "online-users"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsers {
    pub online_users: Vec<PresenceRecord>,
    pub count: usize,
    pub unique_users_count: usize,
}

impl From<RosterSnapshot> for OnlineUsers {
    fn from(snapshot: RosterSnapshot) -> Self {
        Self {
            count: snapshot.online_users.len(),
            online_users: snapshot.online_users,
            unique_users_count: snapshot.unique_users_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn record() -> PresenceRecord {
        PresenceRecord {
            username: "Ana".to_string(),
            joined_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            socket_id: "sock-1".to_string(),
            last_seen: None,
        }
    }

    #[test]
    fn test_client_event_parsing() {
        let join: ClientEvent =
            serde_json::from_str(r#"{"event":"user-join","payload":"Ana"}"#).unwrap();
        assert_eq!(join, ClientEvent::UserJoin("Ana".to_string()));

        let beat: ClientEvent =
            serde_json::from_str(r#"{"event":"user-heartbeat","payload":"Ana"}"#).unwrap();
        assert_eq!(beat, ClientEvent::UserHeartbeat("Ana".to_string()));

        let query: ClientEvent = serde_json::from_str(r#"{"event":"users-online"}"#).unwrap();
        assert_eq!(query, ClientEvent::UsersOnline);
    }

    #[test]
    fn test_client_event_rejects_non_string_name() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"user-join","payload":42}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"typing","payload":"Ana"}"#).is_err());
    }

    #[test]
    fn test_user_joined_wire_shape() {
        let event = ServerEvent::UserJoined(PresenceChange {
            username: "Ana".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap(),
            roster: RosterSnapshot {
                online_users: vec![record()],
                total_users_count: 1,
                unique_users_count: 1,
            },
        });

        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "user-joined");
        let payload = &value["payload"];
        assert_eq!(payload["username"], "Ana");
        assert_eq!(payload["timestamp"], "2024-05-01T12:00:01Z");
        assert_eq!(payload["totalUsersCount"], 1);
        assert_eq!(payload["uniqueUsersCount"], 1);
        assert_eq!(
            payload["onlineUsers"][0],
            json!({
                "username": "Ana",
                "joinedAt": "2024-05-01T12:00:00Z",
                "socketId": "sock-1"
            })
        );
    }

    #[test]
    fn test_last_seen_serialized_once_set() {
        let mut rec = record();
        rec.last_seen = Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 40).unwrap());
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["lastSeen"], "2024-05-01T12:00:40Z");
    }

    #[test]
    fn test_username_taken_payload() {
        let value = serde_json::to_value(ServerEvent::UsernameTaken(UsernameTaken::new("ana"))).unwrap();
        assert_eq!(value["event"], "username-taken");
        assert_eq!(value["payload"]["username"], "ana");
        assert!(value["payload"]["message"]
            .as_str()
            .unwrap()
            .contains("\"ana\" is already in use"));
    }

    #[test]
    fn test_online_users_from_snapshot() {
        let reply = OnlineUsers::from(RosterSnapshot {
            online_users: vec![record()],
            total_users_count: 1,
            unique_users_count: 3,
        });
        assert_eq!(reply.count, 1);
        assert_eq!(reply.unique_users_count, 3);
    }
}
