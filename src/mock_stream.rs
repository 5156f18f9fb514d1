use std::cmp::min;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::sync::{Arc, Mutex};

/// A scripted server for tests: reads come from a canned byte buffer, writes land in a
/// [`Transcript`] that stays inspectable after the stream has been boxed away.
pub struct MockStream {
    read_buf: Vec<u8>,
    read_pos: usize,
    written: Transcript,
    err_on_read: bool,
    eof_on_read: bool,
    read_delay: usize,
}

/// Shared view of everything a [`MockStream`] has been sent.
#[derive(Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<u8>>>);

impl Transcript {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.bytes()).unwrap()
    }

    /// Client command lines with their tags stripped, e.g. `["SELECT \"INBOX\"", "EXPUNGE"]`.
    pub fn commands(&self) -> Vec<String> {
        self.text()
            .split("\r\n")
            .filter_map(|line| {
                let (tag, rest) = line.split_once(' ')?;
                if tag.starts_with('a') && tag[1..].chars().all(|c| c.is_ascii_digit()) {
                    Some(rest.to_string())
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Default for MockStream {
    fn default() -> Self {
        MockStream {
            read_buf: Vec::new(),
            read_pos: 0,
            written: Transcript::default(),
            err_on_read: false,
            eof_on_read: false,
            read_delay: 0,
        }
    }
}

impl MockStream {
    pub fn new(read_buf: impl Into<Vec<u8>>) -> MockStream {
        MockStream::default().with_buf(read_buf.into())
    }

    pub fn with_buf(mut self, read_buf: Vec<u8>) -> MockStream {
        self.read_buf = read_buf;
        self
    }

    pub fn with_eof(mut self) -> MockStream {
        self.eof_on_read = true;
        self
    }

    pub fn with_err(mut self) -> MockStream {
        self.err_on_read = true;
        self
    }

    pub fn with_delay(mut self) -> MockStream {
        self.read_delay = 1;
        self
    }

    pub fn transcript(&self) -> Transcript {
        self.written.clone()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.eof_on_read {
            return Ok(0);
        }
        if self.err_on_read {
            return Err(Error::new(ErrorKind::Other, "MockStream Error"));
        }
        if self.read_pos >= self.read_buf.len() {
            // script exhausted: behave like a peer that hung up
            return Ok(0);
        }
        let mut write_len = min(buf.len(), self.read_buf.len() - self.read_pos);
        if self.read_delay > 0 {
            self.read_delay -= 1;
            write_len = min(write_len, 1);
        }
        let max_pos = self.read_pos + write_len;
        buf[..write_len].copy_from_slice(&self.read_buf[self.read_pos..max_pos]);
        self.read_pos += write_len;
        Ok(write_len)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.written.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
