//! Connection supervisor and the handle used to talk to it.
//!
//! One supervisor task owns the connection for the lifetime of the program.
//! It connects, drives a [`Session`] until the link drops, and reconnects:
//! immediately after losing a registered connection, then with doubling
//! delays while attempts keep failing. If the very first attempt fails there
//! is nothing to fall back on and [`Supervisor::run`] returns an error.
//!
//! Inbound lines, keepalive timers and [`Command`]s from [`ClientHandle`]s
//! are processed one at a time inside that task, so session state is never
//! touched concurrently.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::event::Event;
use crate::irc::Message;
use crate::requests::Requestor;
use crate::session::{Disposition, Session};
use crate::taxonomy::{is_valid_subject, Completion, Fact, QueryError};
use crate::transcript::Transcript;

/// Configuration for connecting to an IRC server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Desired nickname.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Real name.
    pub realname: String,
    /// Channels joined after every registration.
    pub channels: Vec<String>,
    /// Services account answering TAXONOMY queries.
    pub service_nick: String,
    /// How long the server has to welcome us.
    pub registration_timeout: Duration,
    /// Pause between an answered keepalive PING and the next one.
    pub ping_interval: Duration,
    /// How long to wait for the PONG to a keepalive PING.
    pub pong_timeout: Duration,
    /// Retry delay after losing a registered connection; doubles per failure.
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay. `None` keeps doubling.
    pub max_backoff: Option<Duration>,
    /// Give up on a connection after this many nickname collisions.
    /// `None` keeps appending underscores.
    pub max_nick_retries: Option<u32>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "taxbot".to_string(),
            user: "sioc".to_string(),
            realname: "Taxonomy bot".to_string(),
            channels: Vec::new(),
            service_nick: "NickServ".to_string(),
            registration_timeout: Duration::from_secs(120),
            ping_interval: Duration::from_secs(300),
            pong_timeout: Duration::from_secs(300),
            initial_backoff: Duration::from_secs(5),
            max_backoff: None,
            max_nick_retries: None,
        }
    }
}

// ── Transport ──────────────────────────────────────────────────────────

/// A connected line transport.
pub struct Transport {
    pub reader: Box<dyn AsyncBufRead + Unpin + Send>,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
}

/// Opens a new transport for each connection attempt.
pub trait Connector: Send {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<Transport>> + Send + '_>>;
}

/// Plain TCP.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<Transport>> + Send + '_>> {
        Box::pin(async move {
            let tcp = TcpStream::connect(&self.addr)
                .await
                .with_context(|| format!("TCP connect to {} failed", self.addr))?;
            let (reader, writer) = tcp.into_split();
            Ok(Transport {
                reader: Box::new(BufReader::new(reader)),
                writer: Box::new(writer),
            })
        })
    }
}

// ── Handle ─────────────────────────────────────────────────────────────

/// Commands the consumer can send to the supervisor.
#[derive(Debug)]
pub enum Command {
    /// Send a line; with a requestor, correlated replies are routed to it.
    Send {
        line: Message,
        requestor: Option<Requestor>,
    },
    Taxonomy {
        nick: String,
        completion: Completion,
    },
    Status(oneshot::Sender<Status>),
    Quit(Option<String>),
}

/// Snapshot of the supervisor and its session.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub connected: bool,
    pub registered: bool,
    pub nick: Option<String>,
    pub server: Option<String>,
    pub channels: Vec<String>,
    pub away: bool,
    pub backlog: usize,
    pub pending_lookups: usize,
}

/// A handle to the running supervisor.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    /// Send a line, or queue it until the next registration.
    pub async fn send(&self, line: Message) -> Result<()> {
        self.cmd_tx
            .send(Command::Send {
                line,
                requestor: None,
            })
            .await?;
        Ok(())
    }

    /// Send a query whose replies should go to `requestor` rather than the
    /// transcript.
    pub async fn request(&self, line: Message, requestor: Requestor) -> Result<()> {
        self.cmd_tx
            .send(Command::Send {
                line,
                requestor: Some(requestor),
            })
            .await?;
        Ok(())
    }

    /// Look up the NickServ taxonomy of `nick`.
    pub async fn taxonomy(&self, nick: &str) -> Result<Vec<Fact>, QueryError> {
        if !is_valid_subject(nick) {
            return Err(QueryError::InvalidSubject(nick.to_string()));
        }
        let (completion, reply) = oneshot::channel();
        let cmd = Command::Taxonomy {
            nick: nick.to_string(),
            completion,
        };
        if self.cmd_tx.send(cmd).await.is_err() {
            return Err(QueryError::NotConnected);
        }
        reply.await.unwrap_or(Err(QueryError::Abandoned))
    }

    pub async fn status(&self) -> Result<Status> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Status(tx)).await?;
        Ok(rx.await?)
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Quit(message.map(|s| s.to_string())))
            .await?;
        Ok(())
    }
}

// ── Supervisor ─────────────────────────────────────────────────────────

pub struct Supervisor {
    config: Arc<ConnectConfig>,
    connector: Box<dyn Connector>,
    transcript: Box<dyn Transcript>,
    cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<Event>,
    /// `None` until a registered connection has been lost: fail fast.
    backoff: Option<Duration>,
    /// Lines requested while no registered session existed.
    backlog: VecDeque<(Message, Option<Requestor>)>,
    quitting: bool,
}

impl Supervisor {
    pub fn new(
        config: ConnectConfig,
        connector: Box<dyn Connector>,
        transcript: Box<dyn Transcript>,
    ) -> (Self, ClientHandle, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let supervisor = Self {
            config: Arc::new(config),
            connector,
            transcript,
            cmd_rx,
            event_tx,
            backoff: None,
            backlog: VecDeque::new(),
            quitting: false,
        };
        (supervisor, ClientHandle { cmd_tx }, event_rx)
    }

    /// Keep a connection up until asked to quit. Returns an error only when
    /// the very first connection attempt fails.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tracing::info!(server = %self.config.server_addr, "Connecting");
            let attempt = self.connector.connect().await;
            let failure = match attempt {
                Ok(transport) => {
                    self.emit(Event::Connected);
                    let (registered, reason) = self.run_session(transport).await;
                    tracing::warn!(%reason, "Disconnected from server");
                    self.emit(Event::Disconnected {
                        reason: reason.clone(),
                    });
                    if self.quitting {
                        return Ok(());
                    }
                    if registered {
                        self.backoff = Some(self.config.initial_backoff);
                        continue;
                    }
                    reason
                }
                Err(e) => format!("{e:#}"),
            };

            let Some(delay) = self.backoff else {
                tracing::error!("Couldn't connect to server: {failure}");
                self.emit(Event::ConnectFailed {
                    reason: failure.clone(),
                    retry_in: None,
                });
                bail!("Couldn't connect to {}: {failure}", self.config.server_addr);
            };
            tracing::warn!(retry_secs = delay.as_secs(), "Couldn't connect to server: {failure}");
            self.emit(Event::ConnectFailed {
                reason: failure,
                retry_in: Some(delay),
            });
            self.backoff = Some(self.next_backoff(delay));
            if !self.wait(delay).await {
                return Ok(());
            }
        }
    }

    fn next_backoff(&self, delay: Duration) -> Duration {
        let next = delay.saturating_mul(2);
        match self.config.max_backoff {
            Some(max) => next.min(max),
            None => next,
        }
    }

    /// Sit out a retry delay while still serving commands. Returns `false`
    /// if a quit was requested meanwhile.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                Some(cmd) = self.cmd_rx.recv() => {
                    self.handle_command(None, cmd);
                    if self.quitting {
                        return false;
                    }
                }
            }
        }
    }

    /// Drive one connection to its end. Returns whether it ever registered
    /// and why it ended.
    async fn run_session(&mut self, transport: Transport) -> (bool, String) {
        let Transport {
            mut reader,
            mut writer,
        } = transport;
        let mut session = Session::new(Arc::clone(&self.config));
        let reason = match self.drive(&mut session, &mut *reader, &mut *writer).await {
            Ok(reason) => reason,
            Err(e) => format!("{e:#}"),
        };
        let _ = writer.shutdown().await;
        self.record(&session.closing_link_line(&reason));
        // Dropping the session abandons its pending lookups.
        (session.is_registered(), reason)
    }

    async fn drive(
        &mut self,
        session: &mut Session,
        reader: &mut (dyn AsyncBufRead + Unpin + Send),
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<String> {
        // `next_line` keeps a partial line buffered if another branch wins.
        let mut lines = reader.lines();
        loop {
            for line in session.take_outbox() {
                writer.write_all(format!("{line}\r\n").as_bytes()).await?;
            }
            writer.flush().await?;
            if let Some(reason) = session.closing_reason() {
                return Ok(reason.to_string());
            }

            let deadline = session.deadline();
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Ok("Connection closed by server".to_string());
                    };
                    if let Some(msg) = Message::parse(&line) {
                        self.handle_inbound(session, &msg);
                    }
                }
                Some(cmd) = self.cmd_rx.recv() => self.handle_command(Some(&mut *session), cmd),
                _ = sleep_until(deadline) => session.on_deadline(),
            }
        }
    }

    fn handle_inbound(&mut self, session: &mut Session, msg: &Message) {
        let was_registered = session.is_registered();
        if session.handle_line(msg) == Disposition::Log {
            self.record(msg);
        }
        if !was_registered && session.is_registered() {
            if !self.backlog.is_empty() {
                tracing::info!(lines = self.backlog.len(), "Flushing backlog");
            }
            for (line, requestor) in self.backlog.drain(..) {
                session.send(line, requestor);
            }
            self.emit(Event::Registered {
                nick: session.nick().to_string(),
            });
        }
    }

    fn handle_command(&mut self, session: Option<&mut Session>, cmd: Command) {
        match cmd {
            Command::Send { line, requestor } => match session {
                Some(session) if session.is_registered() => session.send(line, requestor),
                _ => {
                    tracing::debug!("Not registered, queueing: {line}");
                    self.backlog.push_back((line, requestor));
                }
            },
            Command::Taxonomy { nick, completion } => match session {
                Some(session) => session.lookup_taxonomy(&nick, completion),
                None => {
                    let _ = completion.send(Err(QueryError::NotConnected));
                }
            },
            Command::Status(reply) => {
                let _ = reply.send(self.status(session.as_deref()));
            }
            Command::Quit(message) => {
                self.quitting = true;
                if let Some(session) = session {
                    session.close(message.as_deref().unwrap_or("Leaving"));
                }
            }
        }
    }

    fn status(&self, session: Option<&Session>) -> Status {
        let mut channels: Vec<String> = session
            .map(|s| s.channels().iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        Status {
            connected: session.is_some(),
            registered: session.is_some_and(Session::is_registered),
            nick: session.map(|s| s.nick().to_string()),
            server: session.and_then(|s| s.server_prefix().map(str::to_string)),
            channels,
            away: session.is_some_and(Session::is_away),
            backlog: self.backlog.len(),
            pending_lookups: session.map_or(0, Session::pending_lookups),
        }
    }

    fn record(&mut self, line: &Message) {
        if let Err(e) = self.transcript.record(line) {
            tracing::error!("Transcript write failed: {e:#}");
        }
    }

    /// Never blocks: a receiver that stops reading loses events, not the link.
    fn emit(&self, event: Event) {
        match self.event_tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "Event receiver is not keeping up, dropping event");
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Connect to an IRC server over TCP and supervise the connection in a
/// spawned task.
///
/// Returns a handle for sending commands, a receiver for events and the
/// task's join handle; the task ends with an error if the first connection
/// attempt fails.
pub fn connect(
    config: ConnectConfig,
    transcript: Box<dyn Transcript>,
) -> (ClientHandle, mpsc::Receiver<Event>, JoinHandle<Result<()>>) {
    let connector = TcpConnector::new(&config.server_addr);
    let (supervisor, handle, events) = Supervisor::new(config, Box::new(connector), transcript);
    (handle, events, tokio::spawn(supervisor.run()))
}
