use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

/// Log writer that masks provider API keys and Telegram bot tokens.
///
/// Output is redacted a full line at a time, so a secret split across two
/// `write` calls is still caught. A trailing partial line goes out on flush
/// or drop.
pub struct RedactingWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    fn emit(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(bytes);
        self.inner.write_all(redact_secrets(&text).as_bytes())
    }

    fn emit_complete_lines(&mut self) -> std::io::Result<()> {
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Ok(());
        };
        let lines: Vec<u8> = self.pending.drain(..=last_newline).collect();
        self.emit(&lines)
    }

    fn emit_pending(&mut self) -> std::io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rest = std::mem::take(&mut self.pending);
        self.emit(&rest)
    }
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.emit_complete_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.emit_pending()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::stderr()
    }
}

static SECRET_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          sk-ant-[A-Za-z0-9_\-]{10,}     # Anthropic API keys
        | sk-(?:proj-)?[A-Za-z0-9_\-]{20,}  # OpenAI keys
        | \d{8,10}:[A-Za-z0-9_\-]{35}    # Telegram bot tokens, also inside api.telegram.org/bot<token>
        ",
    )
    .expect("redaction regex should compile")
});

/// Replace known credential patterns with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    SECRET_PATTERNS.replace_all(input, "[REDACTED]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_anthropic_key() {
        assert_eq!(
            redact_secrets("x-api-key: sk-ant-api03-abcdefghijkl"),
            "x-api-key: [REDACTED]"
        );
    }

    #[test]
    fn redacts_openai_key() {
        assert_eq!(
            redact_secrets("Bearer sk-1234567890abcdefghijklmn"),
            "Bearer [REDACTED]"
        );
    }

    #[test]
    fn redacts_bot_token_in_url() {
        let token = format!("123456789:{}", "A".repeat(35));
        let line = format!("GET https://api.telegram.org/bot{token}/getUpdates failed");
        assert_eq!(
            redact_secrets(&line),
            "GET https://api.telegram.org/bot[REDACTED]/getUpdates failed"
        );
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        let line = "user 123456789 sent 42 chars at 12:30";
        assert_eq!(redact_secrets(line), line);
    }

    #[test]
    fn writer_redacts_before_forwarding() {
        let mut writer = RedactingWriter::new(Vec::new());
        writer.write_all(b"key=sk-ant-api03-abcdefghijkl\n").unwrap();
        assert_eq!(String::from_utf8_lossy(&writer.inner), "key=[REDACTED]\n");
    }

    #[test]
    fn secret_split_across_writes_is_masked() {
        let mut writer = RedactingWriter::new(Vec::new());
        writer.write_all(b"first line\nkey=sk-ant-api").unwrap();
        assert_eq!(String::from_utf8_lossy(&writer.inner), "first line\n");

        writer.write_all(b"03-abcdefghijkl done\n").unwrap();
        assert_eq!(
            String::from_utf8_lossy(&writer.inner),
            "first line\nkey=[REDACTED] done\n"
        );
    }

    #[test]
    fn flush_emits_partial_line_redacted() {
        let mut writer = RedactingWriter::new(Vec::new());
        writer.write_all(b"Bearer sk-1234567890abcdefghijklmn").unwrap();
        assert!(writer.inner.is_empty());

        writer.flush().unwrap();
        assert_eq!(String::from_utf8_lossy(&writer.inner), "Bearer [REDACTED]");
    }
}
