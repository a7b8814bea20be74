//! Server-side line editor for raw-mode terminals (SSH).
//!
//! An SSH client with a pty sends keystrokes one at a time and expects the
//! server to echo. [`TerminalTransport`] echoes printable input, handles
//! backspace and Ctrl-U, ignores cursor-key escape sequences and treats
//! Ctrl-C, or Ctrl-D on an empty line, as end of input. Masked reads echo
//! nothing.
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::bbs::io::crlf;
use crate::bbs::LineIo;

/// Longest line the editor accepts; further keystrokes are ignored.
pub const MAX_LINE_CHARS: usize = 1024;

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const CTRL_U: u8 = 0x15;
const ESC: u8 = 0x1b;
const DEL: u8 = 0x7f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    /// Saw ESC
    Start,
    /// Inside `ESC [` or `ESC O`, waiting for the final byte
    Sequence,
}

/// Outcome of feeding buffered bytes to the editor.
#[derive(Debug, PartialEq, Eq)]
enum Edit {
    Line(String),
    Eof,
    NeedMore,
}

/// Editing state, kept apart from the stream so it can be unit tested.
#[derive(Debug)]
struct Editor {
    line: Vec<char>,
    utf8: Vec<u8>,
    escape: Escape,
    /// A CR just ended a line; swallow a following LF or NUL.
    after_cr: bool,
}

impl Editor {
    fn new() -> Self {
        Self {
            line: Vec::new(),
            utf8: Vec::new(),
            escape: Escape::None,
            after_cr: false,
        }
    }

    /// Consume bytes until a line completes or the input runs out, appending
    /// any echo to `echo`.
    fn feed(&mut self, input: &mut VecDeque<u8>, masked: bool, echo: &mut Vec<u8>) -> Edit {
        while let Some(b) = input.pop_front() {
            let after_cr = std::mem::replace(&mut self.after_cr, false);
            match self.escape {
                Escape::Start => {
                    self.escape = if b == b'[' || b == b'O' {
                        Escape::Sequence
                    } else {
                        Escape::None
                    };
                    continue;
                }
                Escape::Sequence => {
                    if (0x40..=0x7e).contains(&b) {
                        self.escape = Escape::None;
                    }
                    continue;
                }
                Escape::None => {}
            }

            match b {
                b'\n' | 0 if after_cr => {}
                b'\r' | b'\n' => {
                    self.after_cr = b == b'\r';
                    self.utf8.clear();
                    echo.extend_from_slice(b"\r\n");
                    let line: String = self.line.drain(..).collect();
                    return Edit::Line(line);
                }
                CTRL_C => {
                    self.line.clear();
                    return Edit::Eof;
                }
                CTRL_D if self.line.is_empty() => return Edit::Eof,
                BACKSPACE | DEL => {
                    self.utf8.clear();
                    if self.line.pop().is_some() && !masked {
                        echo.extend_from_slice(b"\x08 \x08");
                    }
                }
                CTRL_U => {
                    if !masked {
                        for _ in 0..self.line.len() {
                            echo.extend_from_slice(b"\x08 \x08");
                        }
                    }
                    self.line.clear();
                }
                ESC => self.escape = Escape::Start,
                b if b < 0x20 => {}
                b => self.push_byte(b, masked, echo),
            }
        }
        Edit::NeedMore
    }

    fn push_byte(&mut self, b: u8, masked: bool, echo: &mut Vec<u8>) {
        self.utf8.push(b);
        match std::str::from_utf8(&self.utf8) {
            Ok(s) => {
                let text = s.to_string();
                self.utf8.clear();
                for c in text.chars() {
                    if self.line.len() >= MAX_LINE_CHARS {
                        break;
                    }
                    self.line.push(c);
                    if !masked {
                        let mut buf = [0u8; 4];
                        echo.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                }
            }
            // Incomplete multi-byte sequence; wait for the rest
            Err(e) if e.error_len().is_none() && self.utf8.len() < 4 => {}
            Err(_) => self.utf8.clear(),
        }
    }

    fn rendered(&self, masked: bool) -> String {
        if masked {
            String::new()
        } else {
            self.line.iter().collect()
        }
    }
}

pub struct TerminalTransport<R, W> {
    reader: R,
    writer: W,
    input: VecDeque<u8>,
    editor: Editor,
    prompt: String,
    needs_prompt: bool,
    /// Prompt and echo bytes not yet accepted by the writer.
    unsent: Vec<u8>,
    /// Result of a read that completed before its output was flushed.
    finished: Option<Option<String>>,
    /// A read is in progress with the prompt on screen.
    reading: bool,
    masked: bool,
    eof: bool,
}

impl<R, W> TerminalTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            input: VecDeque::new(),
            editor: Editor::new(),
            prompt: String::new(),
            needs_prompt: false,
            unsent: Vec::new(),
            finished: None,
            reading: false,
            masked: false,
            eof: false,
        }
    }

    /// Write out `unsent`. Progress survives cancellation: bytes leave the
    /// buffer only once the writer has taken them.
    async fn flush_unsent(&mut self) -> io::Result<()> {
        while !self.unsent.is_empty() {
            let n = self.writer.write(&self.unsent).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.unsent.drain(..n);
        }
        self.writer.flush().await
    }

    /// Cancel-safe: every state change happens before the next `.await`, and
    /// a completed line is parked in `finished` until it is returned.
    async fn read_with(&mut self, masked: bool) -> io::Result<Option<String>> {
        self.masked = masked;
        if self.needs_prompt {
            self.unsent.extend_from_slice(self.prompt.as_bytes());
            self.needs_prompt = false;
        }
        if self.finished.is_none() {
            self.reading = true;
        }

        loop {
            if self.finished.is_none() {
                match self.editor.feed(&mut self.input, masked, &mut self.unsent) {
                    Edit::Line(line) => self.finished = Some(Some(line)),
                    Edit::Eof => {
                        self.eof = true;
                        self.finished = Some(None);
                    }
                    Edit::NeedMore if self.eof => self.finished = Some(None),
                    Edit::NeedMore => {}
                }
                if self.finished.is_some() {
                    self.reading = false;
                }
            }
            self.flush_unsent().await?;
            if let Some(done) = self.finished.take() {
                return Ok(done);
            }

            let mut chunk = [0u8; 512];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.input.extend(&chunk[..n]);
            }
        }
    }
}

#[async_trait]
impl<R, W> LineIo for TerminalTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.read_with(false).await
    }

    async fn read_masked(&mut self) -> io::Result<Option<String>> {
        self.read_with(true).await
    }

    async fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.unsent.extend_from_slice(crlf(text).as_bytes());
        self.flush_unsent().await
    }

    async fn write_async(&mut self, text: &str) -> io::Result<()> {
        // Clear the input line, print, then restore prompt and partial input
        let mut out = String::from("\r\x1b[K");
        out.push_str(&crlf(text));
        if self.reading {
            out.push_str(&self.prompt);
            out.push_str(&self.editor.rendered(self.masked));
        }
        self.unsent.extend_from_slice(out.as_bytes());
        self.flush_unsent().await
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
        self.needs_prompt = true;
        self.reading = false;
    }
}
