//! Presence hub - a single task that owns the presence state and processes
//! commands one at a time from an mpsc queue.
//!
//! Every mutation (join, heartbeat, disconnect, sweep) is handled to completion
//! before the next command is read, so join's name check and insert can never
//! interleave with another join. Callers talk to the hub through a cloneable
//! [`PresenceHandle`].

use crate::broadcaster::{Broadcaster, Outbound};
use crate::presence::{JoinOutcome, JoinRejection, SessionId};
use crate::protocol::{OnlineUsers, PresenceChange, RosterSnapshot, ServerEvent, UsernameTaken};
use crate::state::{PresenceState, SweepReport};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use chatroom_core::PresenceConfig;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Commands sent to the presence hub
#[derive(Debug)]
pub enum PresenceCommand {
    Attach {
        session_id: SessionId,
        outbound: Outbound,
    },
    Join {
        session_id: SessionId,
        username: String,
    },
    Heartbeat {
        session_id: SessionId,
        username: String,
    },
    Disconnect {
        session_id: SessionId,
    },
    OnlineUsers {
        session_id: SessionId,
    },
    Sweep {
        now: DateTime<Utc>,
        resp: oneshot::Sender<SweepReport>,
    },
    Snapshot {
        resp: oneshot::Sender<RosterSnapshot>,
    },
}

/// Cloneable client of the presence hub
#[derive(Debug, Clone)]
pub struct PresenceHandle {
    tx: mpsc::UnboundedSender<PresenceCommand>,
}

impl PresenceHandle {
    fn send(&self, cmd: PresenceCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::warn!("Presence hub is gone, command dropped");
        }
    }

    /// Register the outbound queue of a freshly accepted session
    pub fn attach(&self, session_id: impl Into<SessionId>, outbound: Outbound) {
        self.send(PresenceCommand::Attach {
            session_id: session_id.into(),
            outbound,
        });
    }

    pub fn join(&self, session_id: impl Into<SessionId>, username: impl Into<String>) {
        self.send(PresenceCommand::Join {
            session_id: session_id.into(),
            username: username.into(),
        });
    }

    pub fn heartbeat(&self, session_id: impl Into<SessionId>, username: impl Into<String>) {
        self.send(PresenceCommand::Heartbeat {
            session_id: session_id.into(),
            username: username.into(),
        });
    }

    /// Transport closed: drop the record (if any) and the outbound queue
    pub fn disconnect(&self, session_id: impl Into<SessionId>) {
        self.send(PresenceCommand::Disconnect {
            session_id: session_id.into(),
        });
    }

    /// Ask for the roster to be sent to `session_id` alone
    pub fn request_online_users(&self, session_id: impl Into<SessionId>) {
        self.send(PresenceCommand::OnlineUsers {
            session_id: session_id.into(),
        });
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as if the clock read `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(PresenceCommand::Sweep { now, resp })
            .map_err(|_| anyhow!("presence hub stopped"))?;
        rx.await.map_err(|_| anyhow!("presence hub dropped sweep reply"))
    }

    pub async fn snapshot(&self) -> Result<RosterSnapshot> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(PresenceCommand::Snapshot { resp })
            .map_err(|_| anyhow!("presence hub stopped"))?;
        rx.await.map_err(|_| anyhow!("presence hub dropped snapshot reply"))
    }
}

/// The hub task's state
pub struct PresenceHub {
    state: PresenceState,
    broadcaster: Broadcaster,
    idle_timeout: Duration,
    max_username_len: usize,
    rx: mpsc::UnboundedReceiver<PresenceCommand>,
}

impl PresenceHub {
    /// Spawn the hub on the current runtime. The task ends once every
    /// [`PresenceHandle`] has been dropped.
    pub fn spawn(config: &PresenceConfig) -> (PresenceHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            state: PresenceState::new(),
            broadcaster: Broadcaster::new(),
            idle_timeout: Duration::from_std(config.idle_timeout()).unwrap_or(Duration::MAX),
            max_username_len: config.max_username_len,
            rx,
        };
        let task = tokio::spawn(hub.run());
        (PresenceHandle { tx }, task)
    }

    async fn run(mut self) {
        tracing::debug!("Presence hub started");
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd);
        }
        tracing::debug!("Presence hub stopped");
    }

    fn handle(&mut self, cmd: PresenceCommand) {
        match cmd {
            PresenceCommand::Attach {
                session_id,
                outbound,
            } => {
                self.broadcaster.attach(session_id, outbound);
            }
            PresenceCommand::Join {
                session_id,
                username,
            } => self.on_join(&session_id, &username),
            PresenceCommand::Heartbeat {
                session_id,
                username,
            } => {
                if !self.accepts_name(&username) {
                    return;
                }
                let refreshed = self.state.heartbeat(&session_id, &username, Utc::now());
                tracing::debug!(
                    "Heartbeat from {} as '{}' (refreshed: {})",
                    session_id,
                    username,
                    refreshed
                );
            }
            PresenceCommand::Disconnect { session_id } => self.on_disconnect(&session_id),
            PresenceCommand::OnlineUsers { session_id } => {
                let reply = OnlineUsers::from(self.state.snapshot());
                self.broadcaster
                    .send_to(&session_id, ServerEvent::OnlineUsers(reply));
            }
            PresenceCommand::Sweep { now, resp } => {
                let report = self.on_sweep(now);
                let _ = resp.send(report);
            }
            PresenceCommand::Snapshot { resp } => {
                let _ = resp.send(self.state.snapshot());
            }
        }
    }

    fn accepts_name(&self, username: &str) -> bool {
        if username.trim().is_empty() {
            tracing::debug!("Ignoring empty username");
            return false;
        }
        if username.chars().count() > self.max_username_len {
            tracing::debug!(
                "Ignoring username longer than {} characters",
                self.max_username_len
            );
            return false;
        }
        true
    }

    fn on_join(&mut self, session_id: &str, username: &str) {
        if !self.accepts_name(username) {
            return;
        }

        let now = Utc::now();
        match self.state.join(session_id, username, now) {
            JoinOutcome::Accepted(record) => {
                tracing::info!("'{}' joined (session {})", record.username, session_id);
                let roster = self.state.snapshot();
                self.broadcaster
                    .broadcast(&ServerEvent::UserJoined(PresenceChange {
                        username: record.username,
                        timestamp: now,
                        roster: roster.clone(),
                    }));
                self.broadcaster.broadcast(&ServerEvent::UsersUpdated(roster));
            }
            JoinOutcome::Rejected(JoinRejection::NameTaken { username }) => {
                tracing::info!("Rejected join as '{}': name taken", username);
                self.broadcaster.send_to(
                    session_id,
                    ServerEvent::UsernameTaken(UsernameTaken::new(username)),
                );
            }
        }
    }

    fn on_disconnect(&mut self, session_id: &str) {
        self.broadcaster.detach(session_id);

        let Some(record) = self.state.disconnect(session_id) else {
            tracing::debug!("Session {} closed without a presence record", session_id);
            return;
        };

        tracing::info!("'{}' left (session {})", record.username, session_id);
        self.broadcast_left(record.username, Utc::now());
        self.broadcaster
            .broadcast(&ServerEvent::UsersUpdated(self.state.snapshot()));
    }

    fn on_sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let report = self.state.sweep(now, self.idle_timeout);

        for record in &report.evicted {
            tracing::info!(
                "Evicted '{}' (session {}) after {}s idle",
                record.username,
                record.socket_id,
                record.idle_at(now).num_seconds()
            );
            // Dropping the queue ends the socket task, which closes the socket
            self.broadcaster.detach(&record.socket_id);
            self.broadcast_left(record.username.clone(), now);
        }

        if report.should_broadcast() {
            self.broadcaster
                .broadcast(&ServerEvent::UsersUpdated(self.state.snapshot()));
        }
        report
    }

    fn broadcast_left(&mut self, username: String, timestamp: DateTime<Utc>) {
        let roster = self.state.snapshot();
        self.broadcaster.broadcast(&ServerEvent::UserLeft(PresenceChange {
            username,
            timestamp,
            roster,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_hub() -> PresenceHandle {
        let (handle, _task) = PresenceHub::spawn(&PresenceConfig::default());
        handle
    }

    fn attach(handle: &PresenceHandle, id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.attach(id, tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_join_broadcasts_joined_then_updated() {
        let handle = spawn_hub();
        let mut ana = attach(&handle, "s1");
        let mut bob = attach(&handle, "s2");

        handle.join("s1", "Ana");
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.total_users_count, 1);

        for rx in [&mut ana, &mut bob] {
            let events = drain(rx);
            assert_eq!(events.len(), 2);
            match &events[0] {
                ServerEvent::UserJoined(change) => {
                    assert_eq!(change.username, "Ana");
                    assert_eq!(change.roster.total_users_count, 1);
                    assert_eq!(change.roster.unique_users_count, 1);
                }
                other => panic!("unexpected event: {:?}", other),
            }
            assert!(matches!(events[1], ServerEvent::UsersUpdated(_)));
        }
    }

    #[tokio::test]
    async fn test_name_taken_goes_to_requester_only() {
        let handle = spawn_hub();
        let mut ana = attach(&handle, "s1");
        let mut other = attach(&handle, "s2");

        handle.join("s1", "Ana");
        handle.snapshot().await.unwrap();
        drain(&mut ana);
        drain(&mut other);

        handle.join("s2", "ana");
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.total_users_count, 1);
        assert_eq!(snapshot.unique_users_count, 1);

        assert!(drain(&mut ana).is_empty());
        let events = drain(&mut other);
        assert_eq!(
            events,
            vec![ServerEvent::UsernameTaken(UsernameTaken::new("ana"))]
        );
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_left() {
        let handle = spawn_hub();
        let _ana = attach(&handle, "s1");
        let mut watcher = attach(&handle, "s2");

        handle.join("s1", "Ana");
        handle.snapshot().await.unwrap();
        drain(&mut watcher);

        handle.disconnect("s1");
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.total_users_count, 0);
        assert_eq!(snapshot.unique_users_count, 1);

        let events = drain(&mut watcher);
        assert_eq!(events.len(), 2);
        match &events[0] {
            ServerEvent::UserLeft(change) => {
                assert_eq!(change.username, "Ana");
                assert!(change.roster.online_users.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(events[1], ServerEvent::UsersUpdated(_)));
    }

    #[tokio::test]
    async fn test_disconnect_of_unjoined_session_is_silent() {
        let handle = spawn_hub();
        let _lurker = attach(&handle, "s1");
        let mut watcher = attach(&handle, "s2");

        handle.disconnect("s1");
        handle.disconnect("never-attached");
        handle.snapshot().await.unwrap();
        assert!(drain(&mut watcher).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_heartbeat_is_silent() {
        let handle = spawn_hub();
        let mut watcher = attach(&handle, "s1");

        handle.heartbeat("ghost", "Ana");
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.total_users_count, 0);
        assert!(drain(&mut watcher).is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_oversized_names_are_ignored() {
        let config = PresenceConfig {
            max_username_len: 4,
            ..PresenceConfig::default()
        };
        let (handle, _task) = PresenceHub::spawn(&config);
        let mut rx = attach(&handle, "s1");

        handle.join("s1", "   ");
        handle.join("s1", "Bartholomew");
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.total_users_count, 0);
        assert_eq!(snapshot.unique_users_count, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_evicts_silent_session() {
        let handle = spawn_hub();
        let _carl = attach(&handle, "carl");
        let mut watcher = attach(&handle, "watcher");

        handle.join("carl", "Carl");
        handle.snapshot().await.unwrap();
        drain(&mut watcher);

        let report = handle
            .sweep_at(Utc::now() + Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(report.evicted.len(), 1);

        let events = drain(&mut watcher);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ServerEvent::UserLeft(c) if c.username == "Carl"));
        match &events[1] {
            ServerEvent::UsersUpdated(roster) => {
                assert_eq!(roster.total_users_count, 0);
                assert_eq!(roster.unique_users_count, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Late frames from the evicted session change nothing.
        handle.heartbeat("carl", "Carl");
        handle.disconnect("carl");
        handle.snapshot().await.unwrap();
        assert!(drain(&mut watcher).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_closes_outbound_queue_of_evicted_session() {
        let handle = spawn_hub();
        let mut stale = attach(&handle, "stale");
        let mut watcher = attach(&handle, "watcher");

        handle.join("stale", "Dora");
        handle.snapshot().await.unwrap();

        let report = handle
            .sweep_at(Utc::now() + Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(report.evicted.len(), 1);

        // Only events queued before the eviction remain, then the queue ends
        let queued = drain(&mut stale);
        assert_eq!(queued.len(), 2);
        assert!(matches!(
            stale.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // Roster churn after the eviction does not reach the evicted session
        drain(&mut watcher);
        for i in 0..20 {
            let id = format!("churn-{}", i);
            let _rx = attach(&handle, &id);
            handle.join(id.as_str(), format!("User{}", i));
            handle.disconnect(id);
        }
        handle.snapshot().await.unwrap();
        assert_eq!(drain(&mut watcher).len(), 80);
        assert!(drain(&mut stale).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_sessions_and_reports_roster() {
        let handle = spawn_hub();
        let mut rx = attach(&handle, "s1");

        handle.join("s1", "Bob");
        handle.snapshot().await.unwrap();
        drain(&mut rx);

        let report = handle.sweep().await.unwrap();
        assert!(report.evicted.is_empty());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::UsersUpdated(r) if r.total_users_count == 1));
    }

    #[tokio::test]
    async fn test_sweep_over_empty_roster_sends_nothing() {
        let handle = spawn_hub();
        let mut rx = attach(&handle, "s1");

        let report = handle.sweep().await.unwrap();
        assert!(!report.should_broadcast());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_online_users_reply_is_unicast() {
        let handle = spawn_hub();
        let mut ana = attach(&handle, "s1");
        let mut asker = attach(&handle, "s2");

        handle.join("s1", "Ana");
        handle.snapshot().await.unwrap();
        drain(&mut ana);
        drain(&mut asker);

        handle.request_online_users("s2");
        handle.snapshot().await.unwrap();
        assert!(drain(&mut ana).is_empty());
        match drain(&mut asker).as_slice() {
            [ServerEvent::OnlineUsers(reply)] => {
                assert_eq!(reply.count, 1);
                assert_eq!(reply.online_users[0].username, "Ana");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }
}
