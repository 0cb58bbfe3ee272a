//! The protocol transcript: every inbound line the session did not filter,
//! one per line, prefixed with a W3C timestamp.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};

use crate::irc::Message;

/// Where logged protocol lines go.
pub trait Transcript: Send {
    fn record(&mut self, line: &Message) -> Result<()>;
}

/// `2009-07-22T14:03:59+03:00`: local time with a numeric UTC offset.
pub fn w3c_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Append-only transcript file, flushed after every line.
pub struct FileTranscript {
    file: File,
}

impl FileTranscript {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open transcript {}", path.display()))?;
        Ok(Self { file })
    }
}

impl Transcript for FileTranscript {
    fn record(&mut self, line: &Message) -> Result<()> {
        write!(self.file, "{} {line}\r\n", w3c_timestamp(&Local::now()))?;
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    #[test]
    fn timestamp_has_numeric_offset() {
        let helsinki = FixedOffset::east_opt(3 * 3600).unwrap();
        let at = helsinki.with_ymd_and_hms(2009, 7, 22, 14, 3, 59).unwrap();
        assert_eq!(w3c_timestamp(&at), "2009-07-22T14:03:59+03:00");

        let west = FixedOffset::west_opt(5 * 3600 + 1800).unwrap();
        let at = west.with_ymd_and_hms(2009, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(w3c_timestamp(&at), "2009-01-02T03:04:05-05:30");
    }

    #[test]
    fn file_transcript_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxbot.log");

        let mut transcript = FileTranscript::open(&path).unwrap();
        transcript
            .record(&Message::parse(":alice!a@host PRIVMSG #sioc :hello world").unwrap())
            .unwrap();
        drop(transcript);

        let mut transcript = FileTranscript::open(&path).unwrap();
        transcript
            .record(&Message::parse(":alice!a@host PART #sioc").unwrap())
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" :alice!a@host PRIVMSG #sioc :hello world"));
        assert!(lines[1].ends_with(" :alice!a@host PART #sioc"));
        // Timestamp: YYYY-MM-DDTHH:MM:SS±HH:MM
        let (stamp, _) = lines[0].split_once(' ').unwrap();
        assert_eq!(stamp.len(), 25);
        assert_eq!(&stamp[10..11], "T");
    }
}
