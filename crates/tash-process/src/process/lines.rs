//! Line-oriented reader over a child's output pipe.

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Sequence of newline-delimited lines from one pipe
///
/// Each line is handed out as soon as its newline arrives. Bytes that are not
/// valid UTF-8 are replaced rather than ending the stream.
pub struct LineStream {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    buf: Vec<u8>,
}

impl LineStream {
    /// Wrap a pipe
    pub fn new(pipe: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: BufReader::new(Box::new(pipe)),
            buf: Vec::new(),
        }
    }

    /// Next line without its line terminator, or `None` once the pipe closes
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream").finish_non_exhaustive()
    }
}
