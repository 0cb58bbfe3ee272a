//! NickServ TAXONOMY conversations.
//!
//! `PRIVMSG NickServ :taxonomy <nick>` makes NickServ answer with a burst of
//! NOTICEs:
//!
//! ```text
//! Taxonomy for \x02alice\x02:
//! webid                     : http://example.org/alice
//! End of \x02alice\x02's taxonomy.
//! ```
//!
//! The notices carry no request id, so lookups are answered strictly in the
//! order they were sent: the oldest pending completion always belongs to the
//! burst currently being parsed.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::oneshot;

/// One metadata entry attached to a registered nick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fact {
    pub subject: String,
    pub key: String,
    pub value: String,
}

impl Fact {
    pub fn new(subject: &str, key: &str, value: &str) -> Self {
        Self {
            subject: subject.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Why a lookup produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("not connected to the IRC server")]
    NotConnected,
    #[error("connection lost before the lookup completed")]
    Abandoned,
    #[error("not a nickname: {0:?}")]
    InvalidSubject(String),
}

/// A nick that can be put in a `taxonomy <nick>` request as one word.
pub fn is_valid_subject(nick: &str) -> bool {
    !nick.is_empty() && !nick.contains([' ', '\r', '\n', '\0'])
}

/// Receives the facts of one lookup. An unregistered nick yields an empty list.
pub type Completion = oneshot::Sender<Result<Vec<Fact>, QueryError>>;

const START_MARKER: &str = "Taxonomy for \x02";
const END_MARKER: &str = "End of \x02";
const NOT_REGISTERED: &str = "is not registered.";
const SYNTAX_MARKER: &str = "Syntax: TAXONOMY ";

/// What a NickServ notice means for the conversation.
#[derive(Debug, PartialEq, Eq)]
enum Notice<'a> {
    Start(&'a str),
    End,
    Body(&'a str),
}

fn classify(text: &str) -> Notice<'_> {
    // With IDENTIFY-MSG enabled every message carries a leading +/- marker.
    let text = text
        .strip_prefix('+')
        .or_else(|| text.strip_prefix('-'))
        .unwrap_or(text);

    if let Some(rest) = text.strip_prefix(START_MARKER) {
        let nick = rest.trim_end_matches(':');
        Notice::Start(nick.strip_suffix('\x02').unwrap_or(nick))
    } else if text.starts_with(END_MARKER)
        || text.ends_with(NOT_REGISTERED)
        || text.starts_with(SYNTAX_MARKER)
    {
        Notice::End
    } else {
        Notice::Body(text)
    }
}

/// Split a taxonomy body line into `(key, value)`.
///
/// The key is the last word before the first colon, the value everything
/// after it minus one leading padding space.
fn parse_entry(text: &str) -> Option<(&str, &str)> {
    let (head, value) = text.split_once(':')?;
    let key = head.split_whitespace().last()?;
    Some((key, value.strip_prefix(' ').unwrap_or(value)))
}

/// FIFO of outstanding lookups plus the burst being parsed.
#[derive(Debug, Default)]
pub struct TaxonomyConversation {
    pending: VecDeque<Completion>,
    subject: Option<String>,
    facts: Vec<Fact>,
}

impl TaxonomyConversation {
    /// Queue the completion for a lookup that has just been sent.
    pub fn request(&mut self, completion: Completion) {
        self.pending.push_back(completion);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Subject of the burst currently being parsed.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Feed one NickServ notice addressed to us.
    pub fn handle_notice(&mut self, text: &str) {
        match classify(text) {
            Notice::Start(nick) => {
                if let Some(ref previous) = self.subject {
                    tracing::warn!(%previous, next = %nick, "Taxonomy reply started before the previous one ended");
                }
                self.subject = Some(nick.to_string());
                self.facts.clear();
            }
            Notice::End => self.finish(),
            Notice::Body(body) => {
                let Some(ref subject) = self.subject else {
                    tracing::debug!(%body, "NickServ notice outside a taxonomy reply");
                    return;
                };
                match parse_entry(body) {
                    Some((key, value)) => self.facts.push(Fact::new(subject, key, value)),
                    None => tracing::debug!(%body, "Unparseable taxonomy line"),
                }
            }
        }
    }

    /// Complete the oldest lookup with whatever has been accumulated.
    pub fn finish(&mut self) {
        self.subject = None;
        let facts = std::mem::take(&mut self.facts);
        match self.pending.pop_front() {
            Some(completion) => {
                // The caller may have given up waiting.
                let _ = completion.send(Ok(facts));
            }
            None => tracing::warn!("Taxonomy reply with no lookup pending"),
        }
    }
}
