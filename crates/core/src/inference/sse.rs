use super::InferenceError;

/// Largest single event, raw line bytes included, the decoder will hold.
pub const MAX_EVENT_BYTES: usize = 4 * 1024 * 1024;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes may be split anywhere, including inside a UTF-8 sequence or between
/// `\r` and `\n`. Only `data` fields are kept; each completed event yields its
/// data lines joined with `\n`. An event that grows past the limit is an error.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
    data_bytes: usize,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            data: Vec::new(),
            data_bytes: 0,
            limit,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, InferenceError> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.feed_line(&line) {
                events.push(event);
            }
            self.check_limit(0)?;
        }
        self.check_limit(self.buf.len())?;
        Ok(events)
    }

    /// Flush whatever is left once the body ends without a trailing blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buf.is_empty() {
            let mut line = std::mem::take(&mut self.buf);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.feed_line(&line);
        }
        self.take_event()
    }

    /// `tail` is the unterminated line still buffered for the current event.
    fn check_limit(&self, tail: usize) -> Result<(), InferenceError> {
        if self.data_bytes + tail > self.limit {
            return Err(InferenceError::Protocol(format!(
                "event exceeds {} bytes",
                self.limit
            )));
        }
        Ok(())
    }

    fn feed_line(&mut self, line: &[u8]) -> Option<String> {
        if line.is_empty() {
            return self.take_event();
        }

        let line = String::from_utf8_lossy(line);
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };
        if field == "data" {
            self.data_bytes += value.len() + 1;
            self.data.push(value.to_string());
        }
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let event = self.data.join("\n");
        self.data.clear();
        self.data_bytes = 0;
        Some(event)
    }
}
