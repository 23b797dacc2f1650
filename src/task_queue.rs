//! Explicit command/task serialization over the control channel.
//!
//! The teacher's `FtpClient` never spawns concurrent command futures —
//! each instance owns its codec through a single `&mut self`, so "one
//! round-trip in flight at a time" holds by construction, implicitly,
//! via Rust's aliasing rules. `TaskQueue` makes that invariant explicit
//! and testable: an async mutex around the codec, with a `submit`
//! entry point any caller can use regardless of how many `Arc`-shared
//! handles to the client exist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::control::FtpCodec;
use crate::error::{FtpError, FtpErrorKind, FtpResult};
use crate::types::FtpResponse;

/// Serializes access to one [`FtpCodec`] so at most one command is ever
/// in flight on the control channel, and owns the idle-timeout clock
/// while the control channel — not a transfer's data channel — is the
/// active socket (spec §5: timeout ownership moves to the data channel
/// at `onDataStart` and back at `onDataDone`; `acquire()` is exactly
/// that handoff, since a held guard bypasses `submit`'s timeout).
///
/// A [`FtpErrorKind::Timeout`] (or a transport-level disconnect) is
/// fatal per spec §4.3/§7: once observed, the queue poisons itself and
/// every subsequent `submit`/`acquire` fails fast with
/// [`FtpErrorKind::Disconnected`] instead of trying the dead socket
/// again — the caller must reconnect.
#[derive(Clone)]
pub struct TaskQueue {
    codec: Arc<Mutex<FtpCodec>>,
    idle_timeout: Option<Duration>,
    poisoned: Arc<AtomicBool>,
}

impl TaskQueue {
    pub fn new(codec: FtpCodec, idle_timeout: Option<Duration>) -> Self {
        Self {
            codec: Arc::new(Mutex::new(codec)),
            idle_timeout,
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    fn poison_if_fatal(&self, result: &FtpResult<impl Sized>) {
        if let Err(e) = result {
            if matches!(
                e.kind,
                FtpErrorKind::Timeout | FtpErrorKind::Disconnected | FtpErrorKind::ConnectionFailed
            ) {
                self.poisoned.store(true, Ordering::SeqCst);
            }
        }
    }

    fn check_poisoned(&self) -> FtpResult<()> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(FtpError::disconnected(
                "control channel is unusable after a prior timeout/disconnect; reconnect required",
            ));
        }
        Ok(())
    }

    /// Run `task` with exclusive access to the control codec, subject
    /// to the configured idle timeout. Used for plain request/response
    /// commands.
    pub async fn submit<F, Fut, T>(&self, task: F) -> FtpResult<T>
    where
        F: FnOnce(&mut FtpCodec) -> Fut,
        Fut: std::future::Future<Output = FtpResult<T>>,
    {
        self.check_poisoned()?;
        let mut guard = self.codec.lock().await;
        let result = match self.idle_timeout {
            Some(dur) => match tokio::time::timeout(dur, task(&mut guard)).await {
                Ok(r) => r,
                Err(_) => Err(FtpError::timeout("idle timeout exceeded on the control channel")),
            },
            None => task(&mut guard).await,
        };
        self.poison_if_fatal(&result);
        result
    }

    /// Send one command and return its response, holding the lock for
    /// exactly the duration of the round-trip.
    pub async fn execute(&self, cmd: &str) -> FtpResult<FtpResponse> {
        self.submit(|codec| async move { codec.execute(cmd).await }).await
    }

    pub async fn expect_ok(&self, cmd: &str) -> FtpResult<FtpResponse> {
        self.submit(|codec| async move { codec.expect_ok(cmd).await }).await
    }

    /// Acquire the lock for a multi-response transfer command (the
    /// preliminary `150`/`125` then the eventual `226`/`426`): the
    /// guard is handed to the caller so it can be held across the data
    /// transfer and released only once the final control response has
    /// been read, without letting another task's command interleave.
    ///
    /// Deliberately bypasses `submit`'s idle timeout — spec §5's
    /// handoff gives the control channel `timeout=0` for the duration
    /// of a transfer, since it sits idle while the data channel (timed
    /// separately, see `resolver::drive_transfer`) does the work.
    pub async fn acquire(&self) -> FtpResult<tokio::sync::OwnedMutexGuard<FtpCodec>> {
        self.check_poisoned()?;
        Ok(self.codec.clone().lock_owned().await)
    }

    /// Mark the queue unusable after a fatal error observed outside
    /// `submit` (e.g. a data-channel idle timeout during a transfer,
    /// which is fatal to the whole session per spec §7, not just the
    /// data socket).
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::net::{TcpListener, TcpStream};

    async fn local_codec_pair() -> FtpCodec {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = TcpStream::connect(addr).await.unwrap();
        accept.await.unwrap();
        FtpCodec::from_tcp(client)
    }

    #[tokio::test]
    async fn serializes_concurrent_submits() {
        let queue = TaskQueue::new(local_codec_pair().await, None);
        let order = Arc::new(StdMutex::new(Vec::new()));

        let o1 = order.clone();
        let q1 = queue.clone();
        let first = tokio::spawn(async move {
            q1.submit(|_codec| async move {
                o1.lock().unwrap().push("first-start");
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                o1.lock().unwrap().push("first-end");
                Ok(())
            })
            .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let o2 = order.clone();
        let q2 = queue.clone();
        let second = tokio::spawn(async move {
            q2.submit(|_codec| async move {
                o2.lock().unwrap().push("second-start");
                Ok(())
            })
            .await
        });

        let _: FtpResult<()> = first.await.unwrap();
        let _: FtpResult<()> = second.await.unwrap();

        let log = order.lock().unwrap().clone();
        assert_eq!(log, vec!["first-start", "first-end", "second-start"]);
    }

    #[tokio::test]
    async fn idle_timeout_poisons_the_queue() {
        let queue = TaskQueue::new(local_codec_pair().await, Some(std::time::Duration::from_millis(10)));

        let err = queue
            .submit(|_codec| async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok::<(), crate::error::FtpError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::FtpErrorKind::Timeout);

        let err2 = queue.submit(|_codec| async move { Ok::<(), crate::error::FtpError>(()) }).await.unwrap_err();
        assert_eq!(err2.kind, crate::error::FtpErrorKind::Disconnected);
        assert!(queue.acquire().await.is_err());
    }

    #[tokio::test]
    async fn explicit_poison_fails_future_submits() {
        let queue = TaskQueue::new(local_codec_pair().await, None);
        queue.poison();
        let err = queue.submit(|_codec| async move { Ok::<(), crate::error::FtpError>(()) }).await.unwrap_err();
        assert_eq!(err.kind, crate::error::FtpErrorKind::Disconnected);
    }
}
