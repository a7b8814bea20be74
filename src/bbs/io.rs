//! Transport capability used by the session engine.
//!
//! Every interactive transport (plain TCP lines, an SSH terminal) is wrapped
//! in a type implementing [`LineIo`]; the session engine never sees sockets.
use async_trait::async_trait;
use std::borrow::Cow;
use std::io;

/// Line-oriented terminal capability.
///
/// `read_line` and `read_masked` must be cancel-safe: a read dropped by
/// `tokio::select!` keeps any partial input for the next call. The engine
/// depends on this to race user input against relay events.
#[async_trait]
pub trait LineIo: Send {
    /// Next line without its terminator, `Ok(None)` at end of stream. The
    /// current prompt is written first if it has not been shown yet.
    async fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Like [`read_line`](LineIo::read_line) without echoing the input where
    /// the transport controls echo.
    async fn read_masked(&mut self) -> io::Result<Option<String>> {
        self.read_line().await
    }

    async fn write_text(&mut self, text: &str) -> io::Result<()>;

    /// Output arriving while a line may be half typed. Implementations keep
    /// the prompt and partial input intact around it.
    async fn write_async(&mut self, text: &str) -> io::Result<()>;

    /// Prompt for the next read.
    fn set_prompt(&mut self, prompt: &str);
}

/// Normalise bare `\n` to `\r\n` for network terminals.
pub fn crlf(text: &str) -> Cow<'_, str> {
    let bare = text
        .bytes()
        .enumerate()
        .any(|(i, b)| b == b'\n' && (i == 0 || text.as_bytes()[i - 1] != b'\r'));
    if !bare {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    let mut prev = '\0';
    for c in text.chars() {
        if c == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(c);
        prev = c;
    }
    Cow::Owned(out)
}
