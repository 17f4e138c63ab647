// Chatroom Gateway - presence tracking over WebSocket
//
// This crate implements the connection registry, identity ledger, timeout
// sweeper and presence broadcaster behind a single-consumer hub, plus the
// WebSocket server that feeds it.

pub mod broadcaster;
pub mod hub;
pub mod ledger;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod state;
pub mod sweeper;

pub use broadcaster::Broadcaster;
pub use hub::{PresenceHandle, PresenceHub};
pub use ledger::IdentityLedger;
pub use presence::{ConnectionRegistry, JoinOutcome, JoinRejection, PresenceRecord, SessionId};
pub use protocol::*;
pub use server::{BoundGateway, GatewayServer};
pub use state::{PresenceState, SweepReport};
pub use sweeper::{Sweeper, SweeperHandle};
