//! Bounded capture of process output
//!
//! Each backend process gets two of these, fed by background pump tasks. The
//! buffer is capped so a process that logs in a tight loop cannot exhaust
//! host memory: past the cap, the oldest bytes are dropped and the newest
//! kept.

use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Hard cap before a trim is triggered
pub const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;
/// Size the buffer is trimmed down to on overflow
pub const TRIM_TO_BYTES: usize = 5 * 1024 * 1024;

/// Size-capped byte buffer, newest bytes win
#[derive(Debug)]
pub struct OutputBuffer {
    inner: Mutex<Vec<u8>>,
    max_bytes: usize,
    trim_to: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_caps(MAX_CAPTURE_BYTES, TRIM_TO_BYTES)
    }
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caps(max_bytes: usize, trim_to: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            max_bytes,
            trim_to,
        }
    }

    /// Append a chunk, trimming from the front on overflow
    pub fn push(&self, chunk: &[u8]) {
        let mut buf = self.inner.lock().expect("output buffer lock poisoned");
        buf.extend_from_slice(chunk);
        if buf.len() > self.max_bytes {
            let keep_from = buf.len() - self.trim_to;
            buf.drain(..keep_from);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("output buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full captured contents (lossy UTF-8)
    pub fn contents(&self) -> String {
        let buf = self.inner.lock().expect("output buffer lock poisoned");
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Last `max_lines` lines of the captured contents
    pub fn tail_lines(&self, max_lines: usize) -> String {
        let contents = self.contents();
        let lines: Vec<&str> = contents.split('\n').collect();
        if lines.len() <= max_lines {
            return contents;
        }
        lines[lines.len() - max_lines..].join("\n")
    }
}

/// Spawn a task pumping `reader` into `buf` until EOF or cancellation
pub fn spawn_pump<R>(
    mut reader: R,
    buf: std::sync::Arc<OutputBuffer>,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                read = reader.read(&mut chunk) => match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.push(&chunk[..n]),
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_small_writes_are_kept_verbatim() {
        let buf = OutputBuffer::new();
        buf.push(b"hello ");
        buf.push(b"world");
        assert_eq!(buf.contents(), "hello world");
    }

    #[test]
    fn test_overflow_trims_oldest_bytes() {
        let buf = OutputBuffer::with_caps(1000, 500);
        buf.push(&vec![b'a'; 900]);
        buf.push(&vec![b'b'; 200]);

        // Past the cap: trimmed down to the newest `trim_to` bytes
        assert_eq!(buf.len(), 500);
        let contents = buf.contents();
        assert!(contents.ends_with(&"b".repeat(200)));
        assert!(contents.starts_with("a"));
    }

    #[test]
    fn test_trim_preserves_suffix_not_prefix() {
        let buf = OutputBuffer::with_caps(10, 4);
        buf.push(b"0123456789AB");
        assert_eq!(buf.contents(), "89AB");
    }

    #[test]
    fn test_tail_lines() {
        let buf = OutputBuffer::new();
        buf.push(b"one\ntwo\nthree\nfour");
        assert_eq!(buf.tail_lines(2), "three\nfour");
        assert_eq!(buf.tail_lines(10), "one\ntwo\nthree\nfour");
    }

    #[tokio::test]
    async fn test_pump_reads_until_eof() {
        let buf = Arc::new(OutputBuffer::new());
        let stop = CancellationToken::new();
        let reader = std::io::Cursor::new(b"captured output".to_vec());

        spawn_pump(reader, Arc::clone(&buf), stop)
            .await
            .unwrap();
        assert_eq!(buf.contents(), "captured output");
    }

    #[tokio::test]
    async fn test_pump_stops_on_cancellation() {
        let buf = Arc::new(OutputBuffer::new());
        let stop = CancellationToken::new();
        // A duplex pipe that never reaches EOF on its own
        let (_tx, rx) = tokio::io::duplex(64);

        let handle = spawn_pump(rx, Arc::clone(&buf), stop.clone());
        stop.cancel();
        handle.await.unwrap();
    }
}
