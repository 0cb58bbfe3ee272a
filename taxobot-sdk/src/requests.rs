//! Correlation of outbound queries with the server replies they cause.
//!
//! The server answers WHO/TOPIC/MODE/NAMES queries on the shared reply
//! stream with no request id, so replies are matched by their subject
//! (a channel or a nick). A reply nobody in particular asked for goes to
//! [`Recipients::All`], which means "let it through to the transcript".

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::irc::Message;
use crate::session::Disposition;

/// Someone waiting for a correlated reply. Replies are delivered on the
/// channel returned by [`Requestor::new`].
#[derive(Debug, Clone)]
pub struct Requestor {
    name: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl Requestor {
    pub fn new(name: &str) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.to_string(),
                tx,
            },
            rx,
        )
    }

    fn deliver(&self, msg: &Message) {
        if self.tx.send(msg.clone()).is_err() {
            tracing::debug!(requestor = %self.name, "Requestor gone, dropping reply");
        }
    }
}

/// Who a reply is routed to.
#[derive(Debug, Clone)]
pub enum Recipients {
    /// Nobody asked specifically: the line goes to the transcript.
    All,
    Requestors(Vec<Requestor>),
}

impl Recipients {
    /// Forward `msg` to the recipients. Lines forwarded to specific
    /// requestors are consumed; lines for everyone are logged.
    pub fn route(&self, msg: &Message) -> Disposition {
        match self {
            Recipients::All => Disposition::Log,
            Recipients::Requestors(requestors) => {
                for requestor in requestors {
                    requestor.deliver(msg);
                }
                Disposition::Consumed
            }
        }
    }
}

fn normalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

/// Pending requests for one reply type: subject → requestors.
#[derive(Debug, Default)]
pub struct RequestTable {
    pending: HashMap<String, Vec<Requestor>>,
}

impl RequestTable {
    /// Register `requestor` against `key`. Returns `true` if the request has
    /// to go on the wire, `false` if an identical request is already in
    /// flight and the requestor simply joins it.
    pub fn add(&mut self, key: &str, requestor: Requestor) -> bool {
        let waiting = self.pending.entry(normalize(key)).or_default();
        waiting.push(requestor);
        waiting.len() == 1
    }

    /// Remove and return whoever is waiting on `key`.
    pub fn take(&mut self, key: &str) -> Recipients {
        match self.pending.remove(&normalize(key)) {
            Some(requestors) => Recipients::Requestors(requestors),
            None => Recipients::All,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(&normalize(key))
    }

    /// Handle a single-line reply (TOPIC, MODE).
    pub fn oneline(&mut self, key: &str, msg: &Message) -> Disposition {
        self.take(key).route(msg)
    }
}

/// Requests answered by zero or more data lines and one end line
/// (WHO, NAMES).
#[derive(Debug, Default)]
pub struct MultilineReplies {
    requests: RequestTable,
    responses: HashMap<String, Recipients>,
}

impl MultilineReplies {
    /// See [`RequestTable::add`].
    pub fn add(&mut self, key: &str, requestor: Requestor) -> bool {
        self.requests.add(key, requestor)
    }

    /// A data line for `key`. The first one turns the pending requestors
    /// into the recipients of the whole reply.
    pub fn data_line(&mut self, key: &str, msg: &Message) -> Disposition {
        let recipients = self
            .responses
            .entry(normalize(key))
            .or_insert_with(|| self.requests.take(key));
        recipients.route(msg)
    }

    /// The end line for `key`. There may or may not have been data lines.
    pub fn end_line(&mut self, key: &str, msg: &Message) -> Disposition {
        let recipients = match self.responses.remove(&normalize(key)) {
            Some(recipients) => recipients,
            None => self.requests.take(key),
        };
        recipients.route(msg)
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.requests.is_pending(key)
    }

    pub fn is_in_progress(&self, key: &str) -> bool {
        self.responses.contains_key(&normalize(key))
    }
}
