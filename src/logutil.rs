//! Helpers for keeping client-supplied text on a single, bounded log line.

/// Longest preview of client text written to the log.
const MAX_PREVIEW: usize = 200;

/// Escape a string for single-line logging.
///
/// Line breaks, tabs, backslashes and ANSI escape bytes are made visible so a
/// hostile client cannot forge log lines or recolour a terminal tailing the
/// log. Strings longer than [`MAX_PREVIEW`] characters end in an ellipsis.
pub fn escape_log(s: &str) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
