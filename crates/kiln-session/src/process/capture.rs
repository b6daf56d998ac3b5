//! Bounded draining of child output pipes.
//!
//! Each pipe is drained on its own thread into a shared buffer. The
//! supervisor collects the buffer when the pipe closes, or takes whatever
//! arrived so far once its deadline passes and leaves the thread behind.

use std::borrow::Cow;
use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use super::TRUNCATION_MARKER;

const CHUNK_SIZE: usize = 8 * 1024;

/// Output pipe being drained in the background.
pub(super) struct CaptureHandle {
    buffer: Arc<Mutex<CapturedStream>>,
    finished: Receiver<io::Result<()>>,
}

/// What collecting a pipe yielded.
pub(super) enum Collected {
    /// The pipe reached end of file.
    Closed(CapturedStream),
    /// Something still held the pipe open at the deadline.
    StillOpen(CapturedStream),
    /// Reading the pipe failed.
    Failed(io::Error),
    /// The drain thread died without reporting.
    Lost,
}

impl CaptureHandle {
    /// Waits for the pipe to close, but no later than `deadline`.
    pub(super) fn collect(self, deadline: Instant) -> Collected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.finished.recv_timeout(remaining) {
            Ok(Ok(())) => Collected::Closed(self.snapshot()),
            Ok(Err(error)) => Collected::Failed(error),
            Err(RecvTimeoutError::Timeout) => Collected::StillOpen(self.snapshot()),
            Err(RecvTimeoutError::Disconnected) => Collected::Lost,
        }
    }

    fn snapshot(&self) -> CapturedStream {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Bytes captured from one output stream.
///
/// Once the cap is reached further bytes are read and discarded so the child
/// never blocks on a full pipe, and [`CapturedStream::truncated`] is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStream {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CapturedStream {
    /// Wraps already captured bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>, truncated: bool) -> Self {
        Self {
            bytes: bytes.into(),
            truncated,
        }
    }

    /// Raw captured bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` when nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether output beyond the cap was discarded.
    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.truncated
    }

    /// Lossy UTF-8 view of the bytes, without any marker.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Lossy UTF-8 text with the truncation marker appended when applicable.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = self.text().into_owned();
        if self.truncated {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

pub(super) fn spawn_capture<R>(pipe: Option<R>, cap: usize) -> Option<CaptureHandle>
where
    R: Read + Send + 'static,
{
    pipe.map(|reader| {
        let buffer = Arc::new(Mutex::new(CapturedStream::default()));
        let sink = Arc::clone(&buffer);
        let (done, finished) = mpsc::channel();
        thread::spawn(move || {
            // The supervisor may have stopped listening already.
            drop(done.send(drain_capped(reader, cap, &sink)));
        });
        CaptureHandle { buffer, finished }
    })
}

/// Reads `reader` to end of file, keeping at most `cap` bytes in `sink`.
pub(super) fn drain_capped(
    mut reader: impl Read,
    cap: usize,
    sink: &Mutex<CapturedStream>,
) -> io::Result<()> {
    let mut chunk = [0_u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        let mut stream = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = read.min(cap.saturating_sub(stream.bytes.len()));
        stream
            .bytes
            .extend_from_slice(chunk.get(..keep).unwrap_or_default());
        if keep < read {
            stream.truncated = true;
        }
    }
}
