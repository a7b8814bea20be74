//! Plain line-oriented TCP transport (telnet clients, netcat).
//!
//! The client does its own line editing and echo; the server only sees
//! complete lines. Telnet option negotiation bytes are stripped from input.
//! Masked reads ask the client to stop echoing with `IAC WILL ECHO`.
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::bbs::io::crlf;
use crate::bbs::{BbsContext, LineIo, Session};

/// Input beyond this many bytes without a newline is cut into a line.
pub const MAX_LINE_BYTES: usize = 4096;

const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;
const WILL: u8 = 251;
const WONT: u8 = 252;
const ECHO: u8 = 1;

pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    pending: Vec<u8>,
    prompt: String,
    needs_prompt: bool,
    eof: bool,
    /// We told the client we echo; it stays silent until we send WONT.
    echo_suppressed: bool,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            pending: Vec::new(),
            prompt: String::new(),
            needs_prompt: false,
            eof: false,
            echo_suppressed: false,
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        if self.needs_prompt {
            self.writer.write_all(self.prompt.as_bytes()).await?;
            self.writer.flush().await?;
            self.needs_prompt = false;
        }
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }
            let mut chunk = [0u8; 1024];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.pending.extend_from_slice(&chunk[..n]);
            }
        }
    }

    /// Hand echo back to the client and end the line it could not see.
    async fn restore_echo(&mut self) -> io::Result<()> {
        self.writer.write_all(&[IAC, WONT, ECHO, b'\r', b'\n']).await?;
        self.writer.flush().await?;
        self.echo_suppressed = false;
        Ok(())
    }

    fn take_line(&mut self) -> Option<String> {
        let end = match self.pending.iter().position(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None if self.pending.len() >= MAX_LINE_BYTES => MAX_LINE_BYTES,
            None if self.eof && !self.pending.is_empty() => self.pending.len(),
            None => return None,
        };
        let raw: Vec<u8> = self.pending.drain(..end).collect();
        Some(decode_line(&raw))
    }
}

/// Strip telnet commands and the line terminator, then decode lossily.
fn decode_line(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b == IAC {
            match raw.get(i + 1) {
                Some(&IAC) => {
                    out.push(IAC);
                    i += 2;
                }
                Some(&SB) => {
                    // Skip subnegotiation up to IAC SE
                    let mut j = i + 2;
                    while j + 1 < raw.len() && !(raw[j] == IAC && raw[j + 1] == SE) {
                        j += 1;
                    }
                    i = j + 2;
                }
                // WILL / WONT / DO / DONT carry one option byte
                Some(&cmd) if (251..=254).contains(&cmd) => i += 3,
                Some(_) => i += 2,
                None => i += 1,
            }
            continue;
        }
        if b != b'\r' && b != b'\n' && b != 0 {
            out.push(b);
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[async_trait]
impl<R, W> LineIo for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        // A cancelled masked read left the client silent
        if self.echo_suppressed {
            self.restore_echo().await?;
        }
        self.next_line().await
    }

    async fn read_masked(&mut self) -> io::Result<Option<String>> {
        if !self.echo_suppressed {
            self.writer.write_all(&[IAC, WILL, ECHO]).await?;
            self.writer.flush().await?;
            self.echo_suppressed = true;
        }
        let line = self.next_line().await?;
        if line.is_some() {
            self.restore_echo().await?;
        }
        Ok(line)
    }

    async fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(crlf(text).as_bytes()).await?;
        self.writer.flush().await
    }

    async fn write_async(&mut self, text: &str) -> io::Result<()> {
        let mut out = String::from("\r");
        out.push_str(&crlf(text));
        self.writer.write_all(out.as_bytes()).await?;
        self.writer.flush().await?;
        // The prompt was overwritten; show it again before the next read.
        self.needs_prompt = !self.prompt.is_empty();
        Ok(())
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
        self.needs_prompt = true;
    }
}

/// Accept loop for the line transport. Each connection runs its own session
/// task; accept errors are logged and the loop continues.
pub async fn serve(listener: TcpListener, ctx: Arc<BbsContext>) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Telnet accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", peer, e);
        }
        info!("Telnet connection from {}", peer);
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            let transport = LineTransport::new(reader, writer);
            let session = Session::new(ctx, transport, format!("telnet:{}", peer));
            if let Err(e) = session.run().await {
                debug!("Telnet session {} ended: {}", peer, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn prompt_then_line_across_partial_reads() {
        let mock = Builder::new()
            .write(b"Name: ")
            .read(b"ali")
            .read(b"ce\r\nbo")
            .read(b"b\n")
            .build();
        let (r, w) = tokio::io::split(mock);
        let mut io = LineTransport::new(r, w);
        io.set_prompt("Name: ");
        assert_eq!(io.read_line().await.unwrap().as_deref(), Some("alice"));
        // Prompt already shown; the buffered second line is returned directly
        assert_eq!(io.read_line().await.unwrap().as_deref(), Some("bob"));
        assert_eq!(io.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unterminated_last_line_is_returned_at_eof() {
        let mock = Builder::new().read(b"quit").build();
        let (r, w) = tokio::io::split(mock);
        let mut io = LineTransport::new(r, w);
        assert_eq!(io.read_line().await.unwrap().as_deref(), Some("quit"));
        assert_eq!(io.read_line().await.unwrap(), None);
    }

    #[test]
    fn telnet_negotiation_is_stripped() {
        let raw = [IAC, 251, 1, b'h', b'i', IAC, SB, 24, 0, b'x', IAC, SE, b'!', b'\r', b'\n'];
        assert_eq!(decode_line(&raw), "hi!");
        assert_eq!(decode_line(&[b'a', IAC, IAC, b'\n']), "a\u{FFFD}");
    }

    #[tokio::test]
    async fn masked_read_turns_client_echo_off_and_back_on() {
        let mock = Builder::new()
            .write(&[IAC, WILL, ECHO])
            .write(b"Password: ")
            .read(&[IAC, 253, ECHO])
            .read(b"secret\r\n")
            .write(&[IAC, WONT, ECHO, b'\r', b'\n'])
            .write(b"Choice: ")
            .read(b"1\n")
            .build();
        let (r, w) = tokio::io::split(mock);
        let mut io = LineTransport::new(r, w);
        io.set_prompt("Password: ");
        // The client's DO ECHO reply is stripped from the password
        assert_eq!(io.read_masked().await.unwrap().as_deref(), Some("secret"));
        io.set_prompt("Choice: ");
        assert_eq!(io.read_line().await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn cancelled_masked_read_restores_echo_before_next_line() {
        let mock = Builder::new()
            .write(&[IAC, WILL, ECHO])
            .write(b"Password: ")
            .write(&[IAC, WONT, ECHO, b'\r', b'\n'])
            .read(b"visible\n")
            .build();
        let (r, w) = tokio::io::split(mock);
        let mut io = LineTransport::new(r, w);
        io.set_prompt("Password: ");
        {
            let read = io.read_masked();
            tokio::pin!(read);
            assert!(futures_util::poll!(read.as_mut()).is_pending());
        }
        assert_eq!(io.read_line().await.unwrap().as_deref(), Some("visible"));
    }

    #[tokio::test]
    async fn async_output_redraws_prompt_on_next_read() {
        let mock = Builder::new()
            .write(b"> ")
            .write(b"\rnews\r\n")
            .write(b"> ")
            .read(b"hi\n")
            .build();
        let (r, w) = tokio::io::split(mock);
        let mut io = LineTransport::new(r, w);
        io.set_prompt("> ");
        // Simulate a read that was raced and lost after showing the prompt
        {
            let read = io.read_line();
            tokio::pin!(read);
            assert!(futures_util::poll!(read.as_mut()).is_pending());
        }
        io.write_async("news\n").await.unwrap();
        assert_eq!(io.read_line().await.unwrap().as_deref(), Some("hi"));
    }
}
