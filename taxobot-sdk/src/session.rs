//! State of one live connection to the IRC server.
//!
//! The session is a plain state machine with no I/O of its own: the
//! supervisor feeds it inbound lines, timer expiries and commands, then
//! writes out whatever it queued with [`Session::take_outbox`]. Every
//! outbound line goes through [`Session::send`], which is also where the
//! reply-correlation bookkeeping happens.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::Instant;

use crate::client::ConnectConfig;
use crate::irc::{self, Message};
use crate::requests::{MultilineReplies, RequestTable, Requestor};
use crate::taxonomy::{is_valid_subject, Completion, QueryError, TaxonomyConversation};

/// What to do with an inbound line once the session has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Filtered: not written to the transcript.
    Consumed,
    /// Written to the transcript.
    Log,
}

/// The single liveness timer of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Keepalive {
    /// Waiting for RPL_WELCOME.
    Registering { deadline: Instant },
    /// Waiting for the PONG to our keepalive PING.
    AwaitingPong { token: String, deadline: Instant },
    /// Answered; the next PING is due at `next_ping`.
    Idle { next_ping: Instant },
    /// The session is shutting down.
    Stopped,
}

pub struct Session {
    config: Arc<ConnectConfig>,
    registered: bool,
    nick: String,
    user_host: Option<String>,
    server_prefix: Option<String>,
    channels: HashSet<String>,
    away: bool,
    away_message: Option<String>,
    nick_retries: u32,

    keepalive: Keepalive,
    ping_counter: u64,
    pending_pings: HashSet<String>,

    who: MultilineReplies,
    names: MultilineReplies,
    topics: RequestTable,
    modes: RequestTable,
    taxonomy: TaxonomyConversation,

    outbox: Vec<Message>,
    closing: Option<String>,
}

impl Session {
    /// Start a session on a freshly connected transport: queues the
    /// NICK/USER registration lines and arms the registration timeout.
    pub fn new(config: Arc<ConnectConfig>) -> Self {
        let deadline = Instant::now() + config.registration_timeout;
        let mut session = Self {
            nick: config.nick.clone(),
            config,
            registered: false,
            user_host: None,
            server_prefix: None,
            channels: HashSet::new(),
            away: false,
            away_message: None,
            nick_retries: 0,
            keepalive: Keepalive::Registering { deadline },
            ping_counter: 0,
            pending_pings: HashSet::new(),
            who: MultilineReplies::default(),
            names: MultilineReplies::default(),
            topics: RequestTable::default(),
            modes: RequestTable::default(),
            taxonomy: TaxonomyConversation::default(),
            outbox: Vec::new(),
            closing: None,
        };
        let nick = session.nick.clone();
        session.send(Message::new("NICK", vec![&nick]), None);
        let user = Message::new(
            "USER",
            vec![&session.config.user, "*", "*", &session.config.realname],
        );
        session.send(user, None);
        session
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Our current nick (the requested one until the server confirms it).
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn user_host(&self) -> Option<&str> {
        self.user_host.as_deref()
    }

    /// Prefix of the server that welcomed us.
    pub fn server_prefix(&self) -> Option<&str> {
        self.server_prefix.as_deref()
    }

    /// Our own `nick!user@host`, once known.
    pub fn client_prefix(&self) -> Option<String> {
        self.user_host
            .as_ref()
            .map(|user_host| format!("{}!{user_host}", self.nick))
    }

    pub fn channels(&self) -> &HashSet<String> {
        &self.channels
    }

    pub fn is_away(&self) -> bool {
        self.away
    }

    pub fn away_message(&self) -> Option<&str> {
        self.away_message.as_deref()
    }

    pub fn pending_lookups(&self) -> usize {
        self.taxonomy.pending()
    }

    /// Set once the session has decided to drop the connection.
    pub fn closing_reason(&self) -> Option<&str> {
        self.closing.as_deref()
    }

    /// Lines queued for the wire since the last call.
    pub fn take_outbox(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    /// When the keepalive timer next needs attention.
    pub fn deadline(&self) -> Option<Instant> {
        match self.keepalive {
            Keepalive::Registering { deadline } | Keepalive::AwaitingPong { deadline, .. } => {
                Some(deadline)
            }
            Keepalive::Idle { next_ping } => Some(next_ping),
            Keepalive::Stopped => None,
        }
    }

    /// The synthetic transcript line recorded when the link goes away.
    pub fn closing_link_line(&self, reason: &str) -> Message {
        let text = format!(
            "Closing Link: {}[{}] ({reason})",
            self.nick,
            self.user_host.as_deref().unwrap_or("*")
        );
        Message::new("ERROR", vec![&text])
    }

    // ── Outbound ───────────────────────────────────────────────────────

    /// Queue a line for the server, recording whatever reply it is expected
    /// to produce. A correlated query that is already in flight for the same
    /// subject is not sent again; `requestor` just joins the waiting list.
    pub fn send(&mut self, msg: Message, requestor: Option<Requestor>) {
        if !msg.is_sendable() {
            tracing::warn!(?msg, "Refusing to send a line that would not arrive intact");
            return;
        }
        let first = msg.param(0).map(str::to_string);
        match (msg.command.as_str(), first, requestor) {
            ("PING", Some(token), _) => {
                self.pending_pings.insert(token);
            }
            ("AWAY", Some(text), _) if !text.is_empty() => {
                self.away_message = Some(text);
            }
            ("WHO", Some(key), Some(requestor)) => {
                if !self.who.add(&key, requestor) {
                    return;
                }
            }
            ("NAMES", Some(key), Some(requestor)) => {
                if !self.names.add(&key, requestor) {
                    return;
                }
            }
            ("TOPIC", Some(key), Some(requestor)) if msg.params.len() == 1 => {
                if !self.topics.add(&key, requestor) {
                    return;
                }
            }
            ("MODE", Some(key), Some(requestor)) if msg.params.len() == 1 => {
                if !self.modes.add(&key, requestor) {
                    return;
                }
            }
            _ => {}
        }
        tracing::debug!("Sent to server: {msg}");
        self.outbox.push(msg);
    }

    /// Ask NickServ for the taxonomy of `nick`; `completion` fires when the
    /// reply burst ends.
    pub fn lookup_taxonomy(&mut self, nick: &str, completion: Completion) {
        if !is_valid_subject(nick) {
            let _ = completion.send(Err(QueryError::InvalidSubject(nick.to_string())));
            return;
        }
        if !self.registered || self.closing.is_some() {
            let _ = completion.send(Err(QueryError::NotConnected));
            return;
        }
        let text = format!("taxonomy {nick}");
        let service = self.config.service_nick.clone();
        self.send(Message::new("PRIVMSG", vec![&service, &text]), None);
        self.taxonomy.request(completion);
    }

    /// Say goodbye and mark the session as closing.
    pub fn close(&mut self, reason: &str) {
        if self.closing.is_some() {
            return;
        }
        tracing::info!(%reason, "Closing connection");
        self.send(Message::new("QUIT", vec![reason]), None);
        self.closing = Some(reason.to_string());
        self.keepalive = Keepalive::Stopped;
    }

    // ── Timers ─────────────────────────────────────────────────────────

    /// Called when the deadline from [`Session::deadline`] has passed.
    pub fn on_deadline(&mut self) {
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => {}
            _ => return,
        }
        match self.keepalive {
            Keepalive::Registering { .. } => self.close("Registration timeout"),
            Keepalive::AwaitingPong { .. } => self.close("Pong timeout"),
            Keepalive::Idle { .. } => self.ping(),
            Keepalive::Stopped => {}
        }
    }

    fn ping(&mut self) {
        self.ping_counter += 1;
        let token = format!("keepalive-{}", self.ping_counter);
        self.send(Message::new("PING", vec![&token]), None);
        self.keepalive = Keepalive::AwaitingPong {
            token,
            deadline: Instant::now() + self.config.pong_timeout,
        };
    }

    // ── Inbound ────────────────────────────────────────────────────────

    /// Interpret one line from the server.
    pub fn handle_line(&mut self, msg: &Message) -> Disposition {
        match msg.command.as_str() {
            irc::RPL_WELCOME => self.on_welcome(msg),
            irc::ERR_NICKNAMEINUSE => self.on_nick_rejected(msg),
            irc::ERR_UNAVAILRESOURCE => match msg.param(1) {
                Some(target) if !irc::is_channel(target) => self.on_nick_rejected(msg),
                _ => Disposition::Log,
            },
            "PING" => {
                let token = msg.param(0).unwrap_or_default().to_string();
                self.send(Message::new("PONG", vec![&token]), None);
                Disposition::Consumed
            }
            "PONG" => self.on_pong(msg),

            "NICK" => {
                if let (true, Some(nick)) = (self.is_me(msg), msg.param(0)) {
                    self.nick = nick.to_string();
                }
                Disposition::Log
            }
            "JOIN" => {
                if let (true, Some(channel)) = (self.is_me(msg), msg.param(0)) {
                    self.channels.insert(channel.to_string());
                }
                Disposition::Log
            }
            "PART" => {
                if let (true, Some(channel)) = (self.is_me(msg), msg.param(0)) {
                    self.channels.remove(channel);
                }
                Disposition::Log
            }
            "KICK" => {
                if let (Some(channel), Some(kicked)) = (msg.param(0), msg.param(1)) {
                    if kicked.eq_ignore_ascii_case(&self.nick) {
                        self.channels.remove(channel);
                    }
                }
                Disposition::Log
            }
            irc::RPL_UNAWAY => {
                self.away = false;
                Disposition::Log
            }
            irc::RPL_NOWAWAY => {
                self.away = true;
                Disposition::Log
            }

            irc::RPL_WHOREPLY => keyed(msg, 1, |key| self.who.data_line(key, msg)),
            irc::RPL_ENDOFWHO => keyed(msg, 1, |key| self.who.end_line(key, msg)),
            irc::RPL_NAMREPLY => keyed(msg, 2, |key| self.names.data_line(key, msg)),
            irc::RPL_ENDOFNAMES => keyed(msg, 1, |key| self.names.end_line(key, msg)),
            irc::RPL_TOPIC | irc::RPL_NOTOPIC => keyed(msg, 1, |key| self.topics.oneline(key, msg)),
            irc::RPL_CHANNELMODEIS => keyed(msg, 1, |key| self.modes.oneline(key, msg)),
            irc::RPL_UMODEIS => keyed(msg, 0, |key| self.modes.oneline(key, msg)),

            "NOTICE" => self.on_notice(msg),
            irc::ERR_NOSUCHNICK => match msg.param(1) {
                Some(target) if target.eq_ignore_ascii_case(&self.config.service_nick) => {
                    self.taxonomy.finish();
                    Disposition::Consumed
                }
                _ => Disposition::Log,
            },

            _ => Disposition::Log,
        }
    }

    fn is_me(&self, msg: &Message) -> bool {
        msg.source_nick()
            .is_some_and(|nick| nick.eq_ignore_ascii_case(&self.nick))
    }

    fn on_welcome(&mut self, msg: &Message) -> Disposition {
        self.registered = true;
        self.server_prefix = msg.prefix.clone();
        if let Some(nick) = msg.param(0) {
            self.nick = nick.to_string();
        }
        // The welcome text ends with our full nick!user@host.
        self.user_host = msg
            .params
            .last()
            .and_then(|text| text.split(' ').next_back())
            .and_then(|prefix| irc::split_prefix(prefix).1)
            .map(str::to_string);
        tracing::info!(nick = %self.nick, server = ?self.server_prefix, "Registered");

        self.ping();
        self.send(Message::new("CAPAB", vec!["IDENTIFY-MSG"]), None);
        let channels = self.config.channels.clone();
        for channel in &channels {
            self.send(Message::new("JOIN", vec![channel]), None);
        }
        Disposition::Log
    }

    fn on_nick_rejected(&mut self, msg: &Message) -> Disposition {
        if self.registered {
            return Disposition::Log;
        }
        let Some(rejected) = msg.param(1) else {
            return Disposition::Log;
        };
        self.nick_retries += 1;
        if self
            .config
            .max_nick_retries
            .is_some_and(|max| self.nick_retries > max)
        {
            self.close("Nickname retries exhausted");
            return Disposition::Log;
        }
        self.nick = format!("{rejected}_");
        tracing::warn!(%rejected, retry = %self.nick, "Nickname unavailable");
        let nick = self.nick.clone();
        self.send(Message::new("NICK", vec![&nick]), None);
        Disposition::Log
    }

    fn on_pong(&mut self, msg: &Message) -> Disposition {
        let Some(token) = msg.param(1).or_else(|| msg.param(0)) else {
            return Disposition::Log;
        };
        if !self.pending_pings.remove(token) {
            return Disposition::Log;
        }
        if matches!(&self.keepalive, Keepalive::AwaitingPong { token: expected, .. } if expected == token)
        {
            self.keepalive = Keepalive::Idle {
                next_ping: Instant::now() + self.config.ping_interval,
            };
        }
        Disposition::Consumed
    }

    fn on_notice(&mut self, msg: &Message) -> Disposition {
        let to_me = msg
            .param(0)
            .is_some_and(|target| target.eq_ignore_ascii_case(&self.nick));
        let from_service = msg
            .source_nick()
            .is_some_and(|nick| nick.eq_ignore_ascii_case(&self.config.service_nick));
        if !to_me || !from_service {
            return Disposition::Log;
        }
        self.taxonomy.handle_notice(msg.param(1).unwrap_or_default());
        Disposition::Consumed
    }
}

/// Route a correlated reply by the parameter at `index`; replies too short
/// to carry a key go to the transcript.
fn keyed(msg: &Message, index: usize, route: impl FnOnce(&str) -> Disposition) -> Disposition {
    match msg.param(index) {
        Some(key) => route(key),
        None => Disposition::Log,
    }
}
