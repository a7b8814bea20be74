//! IRC line protocol: message parsing, serialization and a `tokio_util` codec.
//!
//! Lines on the wire are `[:prefix] COMMAND param... [:trailing]\r\n`. The
//! decoder is tolerant: bare `\n` terminators are accepted, blank lines are
//! skipped, bytes that are not valid UTF-8 are replaced with U+FFFD, and a
//! runaway line longer than [`MAX_LINE`] is discarded up to the next newline.
use bytes::{Buf, BufMut, BytesMut};
use log::warn;
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};

/// Longest inbound line accepted before the decoder starts discarding.
pub const MAX_LINE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params,
        }
    }

    pub fn nick(nick: &str) -> Self {
        Self::new("NICK", vec![nick.to_string()])
    }

    pub fn user(user: &str, realname: &str) -> Self {
        Self::new(
            "USER",
            vec![user.to_string(), "0".into(), "*".into(), realname.to_string()],
        )
    }

    pub fn join(channel: &str, key: Option<&str>) -> Self {
        let mut params = vec![channel.to_string()];
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            params.push(key.to_string());
        }
        Self::new("JOIN", params)
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", vec![target.to_string(), text.to_string()])
    }

    pub fn pong(token: &str) -> Self {
        Self::new("PONG", vec![token.to_string()])
    }

    pub fn quit(reason: &str) -> Self {
        Self::new("QUIT", vec![reason.to_string()])
    }

    /// Parse one line without its terminator. Returns `None` for blank lines
    /// and lines with no command.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start_matches(' ');
        if rest.is_empty() {
            return None;
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, tail) = stripped.split_once(' ')?;
            rest = tail.trim_start_matches(' ');
            Some(prefix.to_string())
        } else {
            None
        };

        let (command, mut tail) = match rest.split_once(' ') {
            Some((c, t)) => (c, t),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            tail = tail.trim_start_matches(' ');
            if tail.is_empty() {
                break;
            }
            if let Some(trailing) = tail.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match tail.split_once(' ') {
                Some((p, t)) => {
                    params.push(p.to_string());
                    tail = t;
                }
                None => {
                    params.push(tail.to_string());
                    break;
                }
            }
        }

        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nickname part of a `nick!user@host` prefix.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
        (!nick.is_empty()).then_some(nick)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

/// Parameters may not smuggle extra protocol lines onto the wire.
fn scrub(param: &str) -> String {
    param
        .chars()
        .map(|c| if matches!(c, '\r' | '\n' | '\0') { ' ' } else { c })
        .collect()
}

impl fmt::Display for IrcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let param = scrub(param);
            let needs_colon =
                i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

/// Decode raw bytes as text, replacing invalid sequences with U+FFFD.
pub fn sanitize_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Line codec for an IRC connection.
#[derive(Debug, Default)]
pub struct IrcCodec {
    /// Bytes already scanned for a newline.
    scanned: usize,
    /// Dropping an overlong line until its terminator arrives.
    discarding: bool,
}

impl IrcCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for IrcCodec {
    type Item = IrcMessage;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<IrcMessage>, Self::Error> {
        loop {
            let newline = buf[self.scanned..].iter().position(|b| *b == b'\n');
            match newline {
                Some(offset) => {
                    let end = self.scanned + offset;
                    let line = buf.split_to(end + 1);
                    self.scanned = 0;
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    let text = sanitize_text(&line[..end]);
                    if let Some(msg) = IrcMessage::parse(&text) {
                        return Ok(Some(msg));
                    }
                }
                None if buf.len() > MAX_LINE => {
                    if !self.discarding {
                        warn!("Discarding overlong IRC line ({} bytes so far)", buf.len());
                    }
                    self.discarding = true;
                    buf.advance(buf.len());
                    self.scanned = 0;
                    return Ok(None);
                }
                None => {
                    self.scanned = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<IrcMessage>, Self::Error> {
        if let Some(msg) = self.decode(buf)? {
            return Ok(Some(msg));
        }
        // Unterminated final line
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        let text = sanitize_text(buf);
        buf.clear();
        self.scanned = 0;
        Ok(IrcMessage::parse(&text))
    }
}

impl Encoder<IrcMessage> for IrcCodec {
    type Error = std::io::Error;

    fn encode(&mut self, msg: IrcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = msg.to_string();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_privmsg_with_prefix_and_trailing() {
        let msg = IrcMessage::parse(":dan!d@example.net PRIVMSG #bbs :hello there").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("dan!d@example.net"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#bbs", "hello there"]);
        assert_eq!(msg.source_nick(), Some("dan"));
    }

    #[test]
    fn parses_numeric_and_ping() {
        let welcome = IrcMessage::parse(":irc.example.net 001 bbsbot :Welcome to IRC").unwrap();
        assert_eq!(welcome.command, "001");
        assert_eq!(welcome.param(0), Some("bbsbot"));

        let ping = IrcMessage::parse("PING :abc123").unwrap();
        assert_eq!(ping.prefix, None);
        assert_eq!(ping.params, vec!["abc123"]);
    }

    #[test]
    fn parses_kick_with_extra_spaces() {
        let kick = IrcMessage::parse(":op!o@h  KICK   #bbs  bbsbot :flooding").unwrap();
        assert_eq!(kick.command, "KICK");
        assert_eq!(kick.params, vec!["#bbs", "bbsbot", "flooding"]);
    }

    #[test]
    fn blank_and_prefix_only_lines_are_ignored() {
        assert!(IrcMessage::parse("").is_none());
        assert!(IrcMessage::parse("   \r\n").is_none());
        assert!(IrcMessage::parse(":lonely-prefix").is_none());
    }

    #[test]
    fn serializes_trailing_parameter_when_needed() {
        assert_eq!(
            IrcMessage::privmsg("#bbs", "<alice> hi all").to_string(),
            "PRIVMSG #bbs :<alice> hi all"
        );
        assert_eq!(IrcMessage::join("#bbs", None).to_string(), "JOIN #bbs");
        assert_eq!(
            IrcMessage::join("#keyed", Some("s3cret")).to_string(),
            "JOIN #keyed s3cret"
        );
        assert_eq!(
            IrcMessage::user("bbsbot", "Relay BBS").to_string(),
            "USER bbsbot 0 * :Relay BBS"
        );
    }

    #[test]
    fn serialization_cannot_inject_lines() {
        let msg = IrcMessage::privmsg("#bbs", "hi\r\nQUIT :bye");
        assert_eq!(msg.to_string(), "PRIVMSG #bbs :hi  QUIT :bye");
    }

    #[test]
    fn decoder_handles_split_reads_and_invalid_utf8() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b":n!u@h PRIVMSG #c :caf");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\xe9 ok\r\nPING :x\n");
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.params[1], "caf\u{FFFD} ok");
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.command, "PING");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decoder_discards_overlong_lines() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'a'; MAX_LINE + 10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"still the same line\r\nPING :after\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["after"]);
    }

    #[test]
    fn encoder_terminates_with_crlf() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(IrcMessage::pong("abc"), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PONG abc\r\n");
    }
}
