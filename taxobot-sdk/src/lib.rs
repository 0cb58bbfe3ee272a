//! IRC client core for taxobot.
//!
//! Keeps one connection to an IRC server alive, attributes replies on the
//! shared reply stream to whoever asked for them, and answers NickServ
//! TAXONOMY lookups for callers on other channels.
//!
//! # Modules
//!
//! - [`client`]: Connection supervisor, reconnection and the command handle
//! - [`session`]: Per-connection state machine (registration, keepalive, filtering)
//! - [`requests`]: Correlation of queries with multi-line replies
//! - [`taxonomy`]: NickServ TAXONOMY conversation parsing
//! - [`transcript`]: Timestamped log of unfiltered protocol lines
//! - [`event`]: Events emitted by the supervisor
//! - [`irc`]: IRC message parsing/formatting

pub mod client;
pub mod event;
pub mod irc;
pub mod requests;
pub mod session;
pub mod taxonomy;
pub mod transcript;
