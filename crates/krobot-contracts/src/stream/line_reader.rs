use std::io::{self, BufRead};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One non-blank line read off a streamed response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLine {
    /// The line as received, trimmed.
    pub raw: String,
    /// The line with any `data:` framing removed.
    pub payload: String,
    /// Whether the payload is the terminal `[DONE]` sentinel.
    pub done: bool,
}

impl StreamLine {
    pub fn parse(line: &str) -> Option<Self> {
        let raw = line.trim();
        if raw.is_empty() {
            return None;
        }
        let payload = raw
            .strip_prefix(DATA_PREFIX)
            .map(str::trim_start)
            .unwrap_or(raw);
        Some(Self {
            raw: raw.to_string(),
            payload: payload.to_string(),
            done: payload.eq_ignore_ascii_case(DONE_SENTINEL),
        })
    }
}

/// Lazily splits a byte stream into [`StreamLine`]s.
///
/// The iterator is finite and cannot be restarted. A read error ends the
/// sequence; the error is kept and can be inspected with
/// [`StreamLineReader::take_error`] once iteration stops. Bytes that were
/// already read before the failure are still yielded as a final line.
pub struct StreamLineReader<R> {
    reader: R,
    buf: Vec<u8>,
    finished: bool,
    error: Option<io::Error>,
}

impl<R: BufRead> StreamLineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            finished: false,
            error: None,
        }
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn next_raw(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        self.buf.clear();
        loop {
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.finished = true;
                    break;
                }
                Ok(_) => {
                    if self.buf.last() == Some(&b'\n') {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.error = Some(err);
                    self.finished = true;
                    break;
                }
            }
        }
        if self.buf.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.buf).into_owned())
    }
}

impl<R: BufRead> Iterator for StreamLineReader<R> {
    type Item = StreamLine;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.next_raw()?;
            if let Some(parsed) = StreamLine::parse(&line) {
                return Some(parsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor, Read};

    use pretty_assertions::assert_eq;

    use super::{StreamLine, StreamLineReader};

    #[test]
    fn skips_blank_lines_and_strips_data_prefix() {
        let body = "data: {\"a\":1}\n\n   \r\ndata:{\"b\":2}\nplain\n";
        let lines: Vec<StreamLine> = StreamLineReader::new(Cursor::new(body)).collect();
        let payloads: Vec<&str> = lines.iter().map(|line| line.payload.as_str()).collect();
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}", "plain"]);
        assert_eq!(lines[0].raw, "data: {\"a\":1}");
    }

    #[test]
    fn recognises_done_sentinel_in_any_case() {
        for raw in ["data: [DONE]", "data:[done]", "[Done]"] {
            let line = StreamLine::parse(raw).unwrap_or_else(|| panic!("line for {raw}"));
            assert!(line.done, "{raw} should be terminal");
        }
        let line = StreamLine::parse("data: {\"x\":\"[DONE]\"}").expect("line");
        assert!(!line.done);
    }

    #[test]
    fn final_line_without_newline_is_kept() {
        let lines: Vec<StreamLine> =
            StreamLineReader::new(Cursor::new("one\ntwo")).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].payload, "two");
    }

    struct FailingAfter {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailingAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let read = self.data.read(buf)?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ));
            }
            Ok(read)
        }
    }

    #[test]
    fn transport_failure_ends_sequence_without_losing_read_bytes() {
        let source = FailingAfter {
            data: Cursor::new(b"data: first\ndata: partial".to_vec()),
        };
        let mut reader = StreamLineReader::new(BufReader::new(source));
        let payloads: Vec<String> = reader.by_ref().map(|line| line.payload).collect();
        assert_eq!(payloads, vec!["first".to_string(), "partial".to_string()]);
        let err = reader.take_error().expect("error retained");
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
        assert!(reader.next().is_none());
    }
}
