// Presence Broadcaster
//
// Fan-out over the outbound queues of every attached transport session. A
// session is attached from the moment its socket is accepted, whether or not
// it ever joins.

use crate::presence::SessionId;
use crate::protocol::ServerEvent;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Outbound queue of one session; drained by its socket task
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Default)]
pub struct Broadcaster {
    sessions: HashMap<SessionId, Outbound>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, session_id: SessionId, outbound: Outbound) {
        self.sessions.insert(session_id, outbound);
    }

    pub fn detach(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Send `event` to every attached session. Sessions whose socket task is
    /// gone are dropped from the table.
    pub fn broadcast(&mut self, event: &ServerEvent) {
        let mut closed = Vec::new();
        for (session_id, outbound) in &self.sessions {
            if outbound.send(event.clone()).is_err() {
                closed.push(session_id.clone());
            }
        }
        for session_id in closed {
            tracing::debug!("Dropping closed outbound queue for session {}", session_id);
            self.sessions.remove(&session_id);
        }
    }

    /// Send `event` to one session only
    pub fn send_to(&mut self, session_id: &str, event: ServerEvent) -> bool {
        let Some(outbound) = self.sessions.get(session_id) else {
            tracing::debug!("No outbound queue for session {}", session_id);
            return false;
        };
        if outbound.send(event).is_err() {
            self.sessions.remove(session_id);
            return false;
        }
        true
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}
