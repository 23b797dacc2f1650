//! Reconciles the data-channel and control-channel completion signals
//! into one outcome per transfer. This is the part the
//! teacher's `file_ops.rs` never needed: it always drove the data
//! stream to completion first, then read the `226` strictly
//! afterwards, because it never tunneled uploads through a proxy that
//! could ack bytes before they actually reached the server. Built from
//! scratch in the teacher's error/naming idiom, using `tokio::select!`
//! to drive both completion sources concurrently.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{FtpError, FtpResult};
use crate::types::FtpResponse;

/// Event-driven state machine mirroring the transfer's completion
/// inputs directly, independent of how the caller actually drives the two completion
/// sources. Useful both as documentation of the resolution predicate
/// and as something unit tests can poke at without standing up real
/// sockets.
#[derive(Debug, Default)]
pub struct TransferResolver {
    data_done: bool,
    response: Option<FtpResponse>,
    settled: Option<FtpError>,
}

impl TransferResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_data_done(&mut self) {
        if self.settled.is_some() {
            return;
        }
        self.data_done = true;
    }

    pub fn on_control_done(&mut self, response: FtpResponse) {
        if self.settled.is_some() {
            return;
        }
        self.response = Some(response);
    }

    /// A terminal fault. Settles the resolver once; any further events
    /// arriving afterward are ignored.
    pub fn on_error(&mut self, err: FtpError) {
        if self.settled.is_none() {
            self.settled = Some(err);
        }
    }

    /// A `3xx` the core has no follow-up command for: fatal.
    pub fn on_unexpected_request(&mut self, response: &FtpResponse) {
        self.on_error(FtpError::protocol_error(format!(
            "unexpected intermediate response {} during transfer: {}",
            response.code,
            response.text()
        )));
    }

    /// Resolution predicate: `dataDone ∧ response ≠ None`.
    pub fn is_resolved(&self) -> bool {
        self.settled.is_none() && self.data_done && self.response.is_some()
    }

    /// Take the outcome once resolved or settled with an error; `None`
    /// while still pending.
    pub fn try_take(&mut self) -> Option<FtpResult<FtpResponse>> {
        if let Some(err) = self.settled.take() {
            return Some(Err(err));
        }
        if self.data_done && self.response.is_some() {
            return Some(Ok(self.response.take().unwrap()));
        }
        None
    }
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Race a data-transfer future against the control channel's read for
/// the final response, in either order, and return both results once
/// both have arrived. `T` is whatever the data future produces — a
/// byte count for upload/download, the collected listing bytes for
/// LIST/MLSD.
///
/// `data_timeout` is the idle timeout the data channel owns for the
/// duration of the transfer (spec §5: ownership moves from control to
/// data at `onDataStart`, so `control_fut` here is never separately
/// timed — the control channel is idle by design while a transfer is
/// in flight). A timeout here is fatal to the whole session, not just
/// this transfer; callers should `TaskQueue::poison()` on a
/// `FtpErrorKind::Timeout` result.
pub async fn drive_transfer<T: Send + 'static>(
    data_fut: BoxFuture<FtpResult<T>>,
    mut control_fut: BoxFuture<FtpResult<FtpResponse>>,
    data_timeout: Option<Duration>,
) -> FtpResult<(T, FtpResponse)> {
    let mut data_fut: BoxFuture<FtpResult<T>> = match data_timeout {
        Some(dur) => Box::pin(async move {
            match tokio::time::timeout(dur, data_fut).await {
                Ok(r) => r,
                Err(_) => Err(FtpError::timeout("idle timeout exceeded on the data channel")),
            }
        }),
        None => data_fut,
    };

    let mut data: Option<T> = None;
    let mut response: Option<FtpResponse> = None;

    while data.is_none() || response.is_none() {
        tokio::select! {
            r = &mut data_fut, if data.is_none() => {
                data = Some(r?);
            }
            r = &mut control_fut, if response.is_none() => {
                let resp = r?;
                if resp.is_completion() {
                    response = Some(resp);
                } else if resp.is_intermediate() {
                    return Err(FtpError::protocol_error(format!(
                        "unexpected intermediate response {} during transfer",
                        resp.code
                    )));
                } else {
                    return Err(FtpError::from_reply(resp.code, &resp.text()));
                }
            }
        }
    }

    Ok((data.unwrap(), response.unwrap()))
}

fn is_connreset(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::ConnectionReset
}

/// Drive a SOCKS5-tunneled upload through the size-probe protocol:
/// copy `source` into `data_socket` while
/// counting bytes, then query the server's view of the file size via
/// `probe_remote_size` before closing the data socket, tolerating an
/// `ECONNRESET` on close iff the probe confirmed the byte counts
/// match.
pub async fn resolve_socks_upload<R, W>(
    mut source: R,
    mut data_socket: W,
    probe_remote_size: impl Future<Output = FtpResult<u64>>,
) -> FtpResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let translength = tokio::io::copy(&mut source, &mut data_socket)
        .await
        .map_err(FtpError::from)?;

    let probe_result = probe_remote_size.await;
    let remote_size_alright = matches!(&probe_result, Ok(server_size) if *server_size == translength);

    match data_socket.shutdown().await {
        Ok(()) => {}
        Err(e) if is_connreset(&e) && remote_size_alright => {
            log::debug!(
                "data socket reset on close after SOCKS5 upload, but the size probe already confirmed {} bytes landed",
                translength
            );
        }
        Err(e) if is_connreset(&e) => {
            return Err(FtpError::transfer_failed(format!(
                "upload connection reset before the size probe could confirm delivery: {}",
                e
            )));
        }
        Err(e) => return Err(FtpError::io_error(e.to_string())),
    }

    if !remote_size_alright {
        let detail = match probe_result {
            Ok(server_size) => format!("server reports {} bytes transferred, expected {}", server_size, translength),
            Err(e) => format!("size probe failed: {}", e),
        };
        return Err(FtpError::transfer_failed(format!(
            "SOCKS5 upload could not be verified complete: {}",
            detail
        )));
    }

    Ok(translength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FtpErrorKind;

    fn ok_response(code: u16) -> FtpResponse {
        FtpResponse {
            code,
            lines: vec!["done".to_string()],
            is_multiline: false,
        }
    }

    #[test]
    fn resolves_only_when_both_arrive() {
        let mut r = TransferResolver::new();
        assert!(!r.is_resolved());
        r.on_data_done();
        assert!(!r.is_resolved());
        r.on_control_done(ok_response(226));
        assert!(r.is_resolved());
    }

    #[test]
    fn order_does_not_matter() {
        let mut r = TransferResolver::new();
        r.on_control_done(ok_response(226));
        assert!(!r.is_resolved());
        r.on_data_done();
        assert!(r.is_resolved());
    }

    #[test]
    fn error_rejects_once_and_ignores_later_events() {
        let mut r = TransferResolver::new();
        r.on_error(FtpError::data_channel("boom"));
        r.on_data_done();
        r.on_control_done(ok_response(226));
        let outcome = r.try_take().unwrap();
        assert!(outcome.is_err());
        assert_eq!(outcome.unwrap_err().kind, FtpErrorKind::DataChannelFailed);
    }

    #[tokio::test]
    async fn drive_transfer_races_both_completions() {
        let data_fut: BoxFuture<FtpResult<u64>> = Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(1024)
        });
        let control_fut: BoxFuture<FtpResult<FtpResponse>> = Box::pin(async { Ok(ok_response(226)) });

        let (bytes, resp) = drive_transfer(data_fut, control_fut, None).await.unwrap();
        assert_eq!(bytes, 1024);
        assert_eq!(resp.code, 226);
    }

    #[tokio::test]
    async fn drive_transfer_times_out_a_stalled_data_channel() {
        let data_fut: BoxFuture<FtpResult<u64>> = Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(0)
        });
        let control_fut: BoxFuture<FtpResult<FtpResponse>> = Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(ok_response(226))
        });

        let err = drive_transfer(data_fut, control_fut, Some(std::time::Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::Timeout);
    }

    #[tokio::test]
    async fn socks_upload_succeeds_when_probe_confirms_size() {
        let source = std::io::Cursor::new(vec![0u8; 1024]);
        let mut sink = Vec::new();
        let bytes = resolve_socks_upload(source, &mut sink, async { Ok(1024u64) }).await.unwrap();
        assert_eq!(bytes, 1024);
        assert_eq!(sink.len(), 1024);
    }

    #[tokio::test]
    async fn socks_upload_rejects_on_size_mismatch() {
        let source = std::io::Cursor::new(vec![0u8; 1024]);
        let mut sink = Vec::new();
        let err = resolve_socks_upload(source, &mut sink, async { Ok(900u64) }).await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::TransferFailed);
    }

    #[tokio::test]
    async fn socks_upload_rejects_when_probe_fails() {
        let source = std::io::Cursor::new(vec![0u8; 16]);
        let mut sink = Vec::new();
        let err = resolve_socks_upload(source, &mut sink, async {
            Err(FtpError::transfer_failed("SIZE query failed"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::TransferFailed);
    }
}
