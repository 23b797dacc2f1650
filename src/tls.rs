//! TLS helpers for Explicit and Implicit FTPS (RFC 4217).
//!
//! Grounded on the teacher's `tls.rs` (`build_tls_connector`,
//! `upgrade_to_tls`). Extended for two things the teacher never needed:
//! SOCKS5-tunneled sockets as a connect target (`wrap_socks_stream`),
//! and a session-reuse hook for data channels (spec §4.5 step 4).
//!
//! Session reuse note: `native_tls` (and the `tokio_native_tls` wrapper
//! this crate uses, matching the rest of the workspace) does not expose
//! a portable session-ticket export/import API across its Schannel/
//! Security-Framework/OpenSSL backends. `TlsSessionReuse` below is the
//! seam where that would plug in on a backend that supports it; on this
//! stack it always falls back to a fresh handshake and logs a
//! downgrade notice, per the decision recorded in DESIGN.md.

use crate::error::{FtpError, FtpResult};
use crate::config::TlsOptions;
use crate::control::FtpCodec;
use crate::socks::SocksTunnel;
use tokio::net::TcpStream;
use tokio_native_tls::{TlsConnector, TlsStream};

/// Build a `TlsConnector` from the configured [`TlsOptions`].
pub fn build_tls_connector(opts: &TlsOptions) -> FtpResult<TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();
    if opts.danger_accept_invalid_certs {
        builder.danger_accept_invalid_certs(true);
    }
    if opts.danger_accept_invalid_hostnames {
        builder.danger_accept_invalid_hostnames(true);
    }
    for pem in &opts.ca_bundle_pem {
        let cert = native_tls::Certificate::from_pem(pem.as_bytes())?;
        builder.add_root_certificate(cert);
    }
    let connector = builder.build()?;
    Ok(TlsConnector::from(connector))
}

fn sni_host<'a>(opts: &'a TlsOptions, host: &'a str) -> &'a str {
    opts.sni_override.as_deref().unwrap_or(host)
}

/// Upgrade an existing **plain, direct** control connection to TLS.
/// Called after a successful `AUTH TLS` + `234` reply.
pub async fn upgrade_to_tls(codec: FtpCodec, host: &str, opts: &TlsOptions) -> FtpResult<(FtpCodec, TlsSessionReuse)> {
    let tcp = codec.into_plain_tcp()?;
    let connector = build_tls_connector(opts)?;
    let tls = connector
        .connect(sni_host(opts, host), tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("explicit TLS handshake: {}", e)))?;
    Ok((FtpCodec::from_tls(tls), TlsSessionReuse::unavailable()))
}

/// Upgrade an existing **plain, SOCKS5-tunneled** control connection to
/// TLS (Explicit FTPS routed through a proxy).
pub async fn upgrade_to_tls_over_socks(
    codec: FtpCodec,
    host: &str,
    opts: &TlsOptions,
) -> FtpResult<(FtpCodec, TlsSessionReuse)> {
    let tunnel = codec.into_plain_socks()?;
    let connector = build_tls_connector(opts)?;
    let tls = connector
        .connect(sni_host(opts, host), tunnel)
        .await
        .map_err(|e| FtpError::tls_failed(format!("explicit TLS handshake over SOCKS5: {}", e)))?;
    Ok((FtpCodec::from_tls_socks(tls), TlsSessionReuse::unavailable()))
}

/// Wrap a direct data-channel TCP socket in TLS.
pub async fn wrap_data_stream(
    tcp: TcpStream,
    host: &str,
    opts: &TlsOptions,
    reuse: &TlsSessionReuse,
) -> FtpResult<TlsStream<TcpStream>> {
    if reuse.is_available() {
        log::trace!("reusing control-channel TLS session for data channel");
    } else {
        log::trace!("no reusable TLS session; performing a fresh data-channel handshake");
    }
    let connector = build_tls_connector(opts)?;
    connector
        .connect(sni_host(opts, host), tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("data channel TLS: {}", e)))
}

/// Wrap a SOCKS5-tunneled data-channel socket in TLS.
pub async fn wrap_data_stream_socks(
    tunnel: SocksTunnel,
    host: &str,
    opts: &TlsOptions,
    reuse: &TlsSessionReuse,
) -> FtpResult<TlsStream<SocksTunnel>> {
    if reuse.is_available() {
        log::trace!("reusing control-channel TLS session for data channel");
    } else {
        log::trace!("no reusable TLS session; performing a fresh data-channel handshake");
    }
    let connector = build_tls_connector(opts)?;
    connector
        .connect(sni_host(opts, host), tunnel)
        .await
        .map_err(|e| FtpError::tls_failed(format!("data channel TLS over SOCKS5: {}", e)))
}

/// A session ticket exported from the control channel's TLS handshake,
/// intended to let the data channel resume rather than renegotiate
/// (spec §4.5 step 4: prevents data-port hijack by a racing attacker
/// who can't present the resumed session).
///
/// On this crate's TLS stack (`native_tls`) there is no portable export
/// hook, so this is always `Unavailable`; every data-channel TLS
/// upgrade performs a fresh handshake. The type still carries the
/// `is_available()` seam so a future backend swap (e.g. one built on
/// `rustls`, which does expose session storage) only has to fill in
/// `TlsSessionReuse::Ticket` without touching call sites.
pub enum TlsSessionReuse {
    Unavailable,
}

impl TlsSessionReuse {
    pub fn unavailable() -> Self {
        TlsSessionReuse::Unavailable
    }

    pub fn is_available(&self) -> bool {
        match self {
            TlsSessionReuse::Unavailable => false,
        }
    }
}
