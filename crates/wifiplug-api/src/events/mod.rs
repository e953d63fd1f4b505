//! Real-time event stream over WebSocket.
//!
//! [`EventClient`] keeps one socket open to the event endpoint, tracks the
//! active [`EventSelector`]s, and publishes [`ClientEvent`]s through a
//! [`tokio::sync::broadcast`] channel. When the socket drops it reconnects
//! and replays every active subscription in the order it was made.

mod client;
mod event;
mod selector;

pub use client::{ClientEvent, DEFAULT_EVENT_URL, EventClient, EventClientConfig};
pub use event::{Event, EventDataRegistry};
pub use selector::{EventSelector, SelectorParseError};
