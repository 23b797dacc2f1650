//! Progress-reporting callback interface.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};

/// The kind of transfer a [`ProgressEvent`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Upload,
    Download,
    List,
}

impl ProgressKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressKind::Upload => "upload",
            ProgressKind::Download => "download",
            ProgressKind::List => "list",
        }
    }
}

/// One progress notification, spelled out as a struct instead of a
/// tuple for readability at call sites.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub name: String,
    pub kind: ProgressKind,
    /// Bytes transferred since the last event for this handler.
    pub bytes: u64,
    /// Total bytes transferred since this handler was installed.
    pub bytes_overall: u64,
}

/// A progress callback. Boxed so it can be stored on the client and
/// swapped out (installing a new handler resets `bytes_overall`).
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Minimum interval between non-final progress callbacks during a
/// transfer, so a fast local disk or LAN transfer doesn't flood the
/// handler with a callback per chunk. The final callback at completion
/// always fires regardless of this interval.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Tracks `bytesOverall` for one transfer and decides when to emit.
pub struct ProgressTracker {
    name: String,
    kind: ProgressKind,
    callback: Option<ProgressCallback>,
    bytes_overall: u64,
    last_emit: Option<std::time::Instant>,
}

impl ProgressTracker {
    pub fn new(name: impl Into<String>, kind: ProgressKind, callback: Option<ProgressCallback>) -> Self {
        Self {
            name: name.into(),
            kind,
            callback,
            bytes_overall: 0,
            last_emit: None,
        }
    }

    /// Record `bytes` transferred and emit a callback if the bounded
    /// interval has elapsed since the last one.
    pub fn advance(&mut self, bytes: u64) {
        self.bytes_overall += bytes;
        let now = std::time::Instant::now();
        let due = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= PROGRESS_INTERVAL,
        };
        if due {
            self.emit(bytes);
            self.last_emit = Some(now);
        }
    }

    /// Emit the final callback unconditionally, with the total count.
    pub fn finish(&mut self) {
        self.emit(0);
    }

    fn emit(&self, bytes: u64) {
        if let Some(cb) = &self.callback {
            cb(ProgressEvent {
                name: self.name.clone(),
                kind: self.kind,
                bytes,
                bytes_overall: self.bytes_overall,
            });
        }
    }
}

/// Wraps an `AsyncRead` source and reports progress as bytes pass
/// through. Used where the copy itself happens inside another
/// function that takes ownership of the reader (the SOCKS5 upload
/// size-probe path in `resolver.rs`), so there's no call site left to
/// invoke `ProgressTracker::finish` explicitly — it fires on `Drop`
/// instead, once the reader has been fully consumed and released.
pub struct ProgressReader<R> {
    inner: R,
    tracker: ProgressTracker,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, tracker: ProgressTracker) -> Self {
        Self { inner, tracker }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &res {
            let n = buf.filled().len() - before;
            if n > 0 {
                this.tracker.advance(n as u64);
            }
        }
        res
    }
}

impl<R> Drop for ProgressReader<R> {
    fn drop(&mut self) {
        self.tracker.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn tracks_overall_bytes() {
        let total = Arc::new(AtomicU64::new(0));
        let total2 = total.clone();
        let cb: ProgressCallback = Arc::new(move |ev| {
            total2.store(ev.bytes_overall, Ordering::SeqCst);
        });
        let mut tracker = ProgressTracker::new("file.bin", ProgressKind::Upload, Some(cb));
        tracker.advance(100);
        tracker.finish();
        assert_eq!(total.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn no_callback_is_a_no_op() {
        let mut tracker = ProgressTracker::new("file.bin", ProgressKind::Download, None);
        tracker.advance(50);
        tracker.finish();
    }

    #[tokio::test]
    async fn progress_reader_reports_final_count_on_drop() {
        use tokio::io::AsyncReadExt;

        let seen_final = Arc::new(AtomicU64::new(0));
        let seen_final2 = seen_final.clone();
        let cb: ProgressCallback = Arc::new(move |ev| {
            seen_final2.store(ev.bytes_overall, Ordering::SeqCst);
        });
        let tracker = ProgressTracker::new("file.bin", ProgressKind::Upload, Some(cb));
        {
            let mut reader = ProgressReader::new(std::io::Cursor::new(vec![0u8; 256]), tracker);
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf.len(), 256);
        }
        assert_eq!(seen_final.load(Ordering::SeqCst), 256);
    }
}
