//! Stampede event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`. The scheduler publishes, the WebSocket broker
//!   relays.
//! - [`BusEvent`]: the envelope carried on the bus, already addressed to a
//!   broker channel and tagged with the server message type.
//! - [`channels`]: channel naming shared by publishers and the broker.

pub mod bus;
pub mod channels;

pub use bus::{BusEvent, EventBus};
