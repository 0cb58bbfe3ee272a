//! Events emitted by the supervisor for the embedding program to consume.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Transport connected; registration has started.
    Connected,

    /// The server welcomed us. `nick` is our confirmed nick.
    Registered { nick: String },

    /// A connection that had been established went away.
    Disconnected { reason: String },

    /// A connection attempt failed. `retry_in` is `None` when the supervisor
    /// gives up (no connection ever succeeded).
    ConnectFailed {
        reason: String,
        retry_in: Option<Duration>,
    },
}
