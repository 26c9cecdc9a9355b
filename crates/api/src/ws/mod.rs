//! Real-time event broker over WebSocket.

pub mod broker;
pub mod handler;
pub mod heartbeat;
pub mod protocol;
pub mod relay;
pub mod snapshot;

pub use broker::{Broker, ChannelAccess, SubscribeError};
pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use protocol::{ClientMessage, ServerMessage, CLOSE_AUTH_FAILED};
pub use relay::start_relay;
pub use snapshot::{start_snapshot_loop, SnapshotSource};
