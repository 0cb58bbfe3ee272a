//! IRC protocol lines.
//! A minimal RFC 1459 parser/formatter: `[:prefix] COMMAND params [:trailing]`.
//!
//! IRCv3 message tags are accepted on input and discarded; the bot never
//! negotiates them.

use std::fmt;

/// A parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Origin of the line: `server.name` or `nick!user@host`.
    pub prefix: Option<String>,
    /// The IRC command (e.g. "NICK", "PRIVMSG", "001"), always uppercase.
    pub command: String,
    /// Command parameters; the trailing parameter may contain spaces.
    pub params: Vec<String>,
}

impl Message {
    /// Parse a raw IRC line. Returns `None` for blank or truncated lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        if rest.starts_with('@') {
            let (_, after) = rest.split_once(' ')?;
            rest = after;
        }

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (pfx, after) = stripped.split_once(' ')?;
                rest = after;
                Some(pfx.to_string())
            }
            None => None,
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((cmd, after)) => (cmd, after),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, after)) => {
                    if !param.is_empty() {
                        params.push(param.to_string());
                    }
                    rest = after;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Message {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    pub fn new(command: &str, params: Vec<&str>) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Create a line with a source prefix (used for synthetic and test lines).
    pub fn with_prefix(prefix: &str, command: &str, params: Vec<&str>) -> Self {
        Self {
            prefix: Some(prefix.to_string()),
            ..Self::new(command, params)
        }
    }

    /// Whether the line survives the trip onto the wire as one line with
    /// the same parameters. CR, LF and NUL would end the line early; a
    /// middle parameter that is empty, has a space or starts with `:`
    /// would be re-split by the server.
    pub fn is_sendable(&self) -> bool {
        let breaks_line = |s: &str| s.contains(['\r', '\n', '\0']);
        if self.command.is_empty() || self.command.contains(' ') || breaks_line(&self.command) {
            return false;
        }
        let last = self.params.len().saturating_sub(1);
        self.params.iter().enumerate().all(|(i, param)| {
            !breaks_line(param)
                && (i == last || !(param.is_empty() || param.contains(' ') || param.starts_with(':')))
        })
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Nick part of the prefix, if any.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_deref().map(|p| split_prefix(p).0)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// Split `nick!user@host` into the nick and the `user@host` part.
/// A bare server name has no user part.
pub fn split_prefix(prefix: &str) -> (&str, Option<&str>) {
    match prefix.split_once('!') {
        Some((nick, userhost)) => (nick, Some(userhost)),
        None => (prefix, None),
    }
}

/// True for `#channel` and `&channel` targets.
pub fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

// Numeric replies the session reacts to.
pub const RPL_WELCOME: &str = "001";
pub const RPL_UMODEIS: &str = "221";
pub const RPL_UNAWAY: &str = "305";
pub const RPL_NOWAWAY: &str = "306";
pub const RPL_ENDOFWHO: &str = "315";
pub const RPL_CHANNELMODEIS: &str = "324";
pub const RPL_NOTOPIC: &str = "331";
pub const RPL_TOPIC: &str = "332";
pub const RPL_WHOREPLY: &str = "352";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";

// Errors
pub const ERR_NOSUCHNICK: &str = "401";
pub const ERR_NICKNAMEINUSE: &str = "433";
pub const ERR_UNAVAILRESOURCE: &str = "437";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let msg = Message::parse("NICK alice").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice"]);
    }

    #[test]
    fn parse_with_prefix_and_trailing() {
        let msg = Message::parse(":irc.example 001 taxbot :Welcome to IRC taxbot!sioc@host\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("irc.example"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["taxbot", "Welcome to IRC taxbot!sioc@host"]);
    }

    #[test]
    fn parse_skips_tags() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z :alice!a@host privmsg #chan :hi there").unwrap();
        assert_eq!(msg.source_nick(), Some("alice"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan", "hi there"]);
    }

    #[test]
    fn line_breaks_are_not_sendable() {
        assert!(Message::new("PRIVMSG", vec!["#sioc", "hello world"]).is_sendable());
        assert!(Message::new("PRIVMSG", vec!["#sioc", ""]).is_sendable());
        assert!(!Message::new("PRIVMSG", vec!["#sioc", "hi\r\nQUIT :gone"]).is_sendable());
        assert!(!Message::new("PRIVMSG", vec!["#sioc", "nul\0byte"]).is_sendable());
        assert!(!Message::new("PRIVMSG", vec!["#a b", "text"]).is_sendable());
        assert!(!Message::new("PRIVMSG", vec![":#sioc", "text"]).is_sendable());
        assert!(!Message::new("QUIT\n", vec![]).is_sendable());
    }

    #[test]
    fn parse_rejects_blank_and_truncated() {
        assert!(Message::parse("\r\n").is_none());
        assert!(Message::parse(":only-a-prefix").is_none());
    }

    #[test]
    fn format_trailing() {
        let msg = Message::new("USER", vec!["sioc", "*", "*", "Taxonomy bot"]);
        assert_eq!(msg.to_string(), "USER sioc * * :Taxonomy bot");
        let msg = Message::new("AWAY", vec![""]);
        assert_eq!(msg.to_string(), "AWAY :");
    }

    #[test]
    fn format_with_prefix() {
        let msg = Message::with_prefix("srv", "PONG", vec!["srv", "keepalive-1"]);
        assert_eq!(msg.to_string(), ":srv PONG srv keepalive-1");
    }

    #[test]
    fn prefix_splitting() {
        assert_eq!(split_prefix("bob!b@example.org"), ("bob", Some("b@example.org")));
        assert_eq!(split_prefix("irc.example"), ("irc.example", None));
        assert!(is_channel("#rust"));
        assert!(!is_channel("NickServ"));
    }
}
