use crate::session::Outbox;
use bytes::BytesMut;
use thiserror::Error;
use tracing::trace;

const LINE_END_TRIM: &[char] = &['\u{b}', '\u{c}', '\r'];

#[derive(Debug, Error)]
#[error("log sink {source_tag}: session stream closed")]
pub struct SinkError {
    source_tag: String,
}

/// Turns raw process output into one log message per line
///
/// Output is buffered until a newline arrives. Trailing `\v`, `\f` and `\r`
/// are trimmed from every line and a run of trailing newlines never produces
/// empty messages.
pub struct LogSink {
    source: String,
    outbox: Outbox,
    pending: BytesMut,
}

impl LogSink {
    pub fn new(source: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            source: source.into(),
            outbox,
            pending: BytesMut::new(),
        }
    }

    /// Buffer `data` and send every completed line
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        self.pending.extend_from_slice(data);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Ok(data.len());
        };

        let complete = self.pending.split_to(last_newline + 1).freeze();
        self.send_lines(&complete).await?;
        Ok(data.len())
    }

    /// Send whatever is left in the buffer as a final line
    pub async fn flush(&mut self) -> Result<(), SinkError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rest = self.pending.split().freeze();
        self.send_lines(&rest).await
    }

    async fn send_lines(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        let mut chunk = chunk;
        while chunk.last() == Some(&b'\n') {
            chunk = &chunk[..chunk.len() - 1];
        }
        if chunk.is_empty() {
            return Ok(());
        }

        for line in chunk.split(|b| *b == b'\n') {
            trace!(source = %self.source, bytes = ?line, "log write");
            let text = String::from_utf8_lossy(line);
            self.outbox
                .send_log(self.source.clone(), text.trim_end_matches(LINE_END_TRIM))
                .await
                .map_err(|_| SinkError {
                    source_tag: self.source.clone(),
                })?;
        }
        Ok(())
    }

    /// Number of buffered bytes not yet terminated by a newline
    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
