//! Data-channel management for FTP transfers.
//!
//! Grounded on the teacher's `transfer.rs` (PASV/EPSV/PORT/EPRT
//! negotiation, kept close to verbatim) extended with the NAT-repair
//! step the teacher's version didn't need, and with an optional SOCKS5
//! tunnel in front of the data socket when a proxy is configured.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use regex::Regex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

use crate::config::{SocksProxyConfig, TlsOptions};
use crate::control::FtpCodec;
use crate::error::{FtpError, FtpResult};
use crate::socks::{SocksTarget, SocksTunnel};
use crate::tls::{self, TlsSessionReuse};
use crate::types::{DataChannelMode, FtpSecurityMode};
use tokio_native_tls::TlsStream;

/// A connected data channel, plain, TLS, SOCKS5-tunneled, or both.
pub enum DataStream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
    Socks(SocksTunnel),
    TlsSocks(TlsStream<SocksTunnel>),
}

impl AsyncRead for DataStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            DataStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
            DataStream::Socks(s) => Pin::new(s).poll_read(cx, buf),
            DataStream::TlsSocks(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DataStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::Socks(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::TlsSocks(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_flush(cx),
            DataStream::Tls(s) => Pin::new(s).poll_flush(cx),
            DataStream::Socks(s) => Pin::new(s).poll_flush(cx),
            DataStream::TlsSocks(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::Socks(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::TlsSocks(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Everything `DataChannelFactory::open` needs beyond the mode itself.
pub struct DataChannelParams<'a> {
    pub security: FtpSecurityMode,
    pub tls_options: &'a TlsOptions,
    pub tls_reuse: &'a TlsSessionReuse,
    pub control_peer_ip: Option<IpAddr>,
    pub socks_proxy: Option<&'a SocksProxyConfig>,
    pub data_timeout: Duration,
    pub active_bind: Option<&'a str>,
}

/// Open a data channel according to `mode`, applying NAT repair, SOCKS5
/// tunneling, and TLS upgrade as configured.
pub async fn open(codec: &mut FtpCodec, mode: DataChannelMode, params: &DataChannelParams<'_>) -> FtpResult<DataStream> {
    let target = match mode {
        DataChannelMode::Passive => open_pasv(codec, params.control_peer_ip).await?,
        DataChannelMode::ExtendedPassive => open_epsv(codec, params.control_peer_ip).await?,
        DataChannelMode::Active | DataChannelMode::ExtendedActive => {
            let tcp = match mode {
                DataChannelMode::Active => open_port(codec, params.active_bind, params.data_timeout).await?,
                _ => open_eprt(codec, params.active_bind, params.data_timeout).await?,
            };
            return finish(DataStream::Plain(tcp), params).await;
        }
    };

    let stream = connect_target(target, params).await?;
    finish(stream, params).await
}

async fn finish(stream: DataStream, params: &DataChannelParams<'_>) -> FtpResult<DataStream> {
    if params.security == FtpSecurityMode::None {
        return Ok(stream);
    }
    // Host used for SNI/hostname verification — the control channel's
    // peer IP if known, otherwise whatever the stream is already bound
    // to (PASV/EPSV resolved host).
    let host = params
        .control_peer_ip
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    match stream {
        DataStream::Plain(tcp) => {
            let tls = tls::wrap_data_stream(tcp, &host, params.tls_options, params.tls_reuse).await?;
            Ok(DataStream::Tls(tls))
        }
        DataStream::Socks(tunnel) => {
            let tls = tls::wrap_data_stream_socks(tunnel, &host, params.tls_options, params.tls_reuse).await?;
            Ok(DataStream::TlsSocks(tls))
        }
        already_tls @ (DataStream::Tls(_) | DataStream::TlsSocks(_)) => Ok(already_tls),
    }
}

/// The resolved `host:port` of a PASV/EPSV data endpoint, after NAT
/// repair.
struct DataTarget {
    host: IpAddr,
    port: u16,
}

async fn connect_target(target: DataTarget, params: &DataChannelParams<'_>) -> FtpResult<DataStream> {
    match params.socks_proxy {
        Some(proxy) => {
            let socks_target = SocksTarget::parse(&target.host.to_string());
            let tunnel = SocksTunnel::connect(&proxy.host, proxy.port, socks_target, target.port, Some(params.data_timeout))
                .await
                .map_err(|e| FtpError::data_channel(format!("SOCKS5 data tunnel: {}", e)))?;
            Ok(DataStream::Socks(tunnel))
        }
        None => {
            let addr = SocketAddr::new(target.host, target.port);
            let tcp = timeout(params.data_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| FtpError::data_channel("data connect timed out"))?
                .map_err(|e| FtpError::data_channel(format!("data connect: {}", e)))?;
            Ok(DataStream::Plain(tcp))
        }
    }
}

// ─── PASV ────────────────────────────────────────────────────────────

async fn open_pasv(codec: &mut FtpCodec, control_peer_ip: Option<IpAddr>) -> FtpResult<DataTarget> {
    let resp = codec.expect_ok("PASV").await?;
    let (ip, port) = parse_pasv_response(&resp.text())?;
    let ip = repair_nat(ip, control_peer_ip);
    Ok(DataTarget {
        host: IpAddr::V4(ip),
        port,
    })
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a `227` response.
fn parse_pasv_response(text: &str) -> FtpResult<(Ipv4Addr, u16)> {
    let re = Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").unwrap();
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("cannot parse PASV: {}", text)))?;

    let nums: Vec<u8> = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = (nums[4] as u16) * 256 + (nums[5] as u16);
    Ok((ip, port))
}

/// If the PASV host is RFC1918-private and the
/// control channel's peer is not, substitute the control peer's
/// address — the server is very likely behind a NAT that mangled its
/// own advertised address.
fn repair_nat(pasv_ip: Ipv4Addr, control_peer_ip: Option<IpAddr>) -> Ipv4Addr {
    if !is_rfc1918_private(pasv_ip) {
        return pasv_ip;
    }
    match control_peer_ip {
        Some(IpAddr::V4(peer)) if !is_rfc1918_private(peer) => {
            log::debug!(
                "PASV advertised private address {} behind NAT; using control peer {} instead",
                pasv_ip,
                peer
            );
            peer
        }
        _ => pasv_ip,
    }
}

fn is_rfc1918_private(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 10 || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
}

// ─── EPSV ────────────────────────────────────────────────────────────

async fn open_epsv(codec: &mut FtpCodec, control_peer_ip: Option<IpAddr>) -> FtpResult<DataTarget> {
    let resp = codec.expect_ok("EPSV").await?;
    let port = parse_epsv_response(&resp.text())?;
    // EPSV never advertises a host; the data channel is always on the
    // same host the control channel is connected to, so there's no NAT
    // repair to do — the control peer address already is correct.
    let host = control_peer_ip.ok_or_else(|| FtpError::protocol_error("EPSV used without a known control peer address"))?;
    Ok(DataTarget { host, port })
}

fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let re = Regex::new(r"\|\|\|(\d+)\|").unwrap();
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("cannot parse EPSV: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error("EPSV port out of range"))
}

// ─── PORT / EPRT (secondary, active-mode path) ──────────────────────

async fn open_port(codec: &mut FtpCodec, bind_addr: Option<&str>, data_timeout: Duration) -> FtpResult<TcpStream> {
    let bind = bind_addr.unwrap_or("0.0.0.0");
    let listener = TcpListener::bind(format!("{}:0", bind))
        .await
        .map_err(|e| FtpError::data_channel(format!("PORT bind: {}", e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| FtpError::data_channel(format!("PORT local_addr: {}", e)))?;

    let ip = match local.ip() {
        IpAddr::V4(v4) => v4,
        _ => return Err(FtpError::data_channel("PORT requires IPv4")),
    };
    let octets = ip.octets();
    let port = local.port();
    let p1 = port / 256;
    let p2 = port % 256;

    let cmd = format!("PORT {},{},{},{},{},{}", octets[0], octets[1], octets[2], octets[3], p1, p2);
    codec.expect_ok(&cmd).await?;

    let (tcp, _) = timeout(data_timeout, listener.accept())
        .await
        .map_err(|_| FtpError::data_channel("PORT accept timed out"))?
        .map_err(|e| FtpError::data_channel(format!("PORT accept: {}", e)))?;
    Ok(tcp)
}

async fn open_eprt(codec: &mut FtpCodec, bind_addr: Option<&str>, data_timeout: Duration) -> FtpResult<TcpStream> {
    let bind = bind_addr.unwrap_or("0.0.0.0");
    let listener = TcpListener::bind(format!("{}:0", bind))
        .await
        .map_err(|e| FtpError::data_channel(format!("EPRT bind: {}", e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| FtpError::data_channel(format!("EPRT local_addr: {}", e)))?;

    let af = match local.ip() {
        IpAddr::V4(_) => 1,
        IpAddr::V6(_) => 2,
    };
    let cmd = format!("EPRT |{}|{}|{}|", af, local.ip(), local.port());
    codec.expect_ok(&cmd).await?;

    let (tcp, _) = timeout(data_timeout, listener.accept())
        .await
        .map_err(|_| FtpError::data_channel("EPRT accept timed out"))?
        .map_err(|e| FtpError::data_channel(format!("EPRT accept: {}", e)))?;
    Ok(tcp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pasv_response() {
        let (ip, port) = parse_pasv_response("227 Entering Passive Mode (192,168,1,100,10,229)").unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(port, 10 * 256 + 229);
    }

    #[test]
    fn parses_epsv_response() {
        let port = parse_epsv_response("229 Entering Extended Passive Mode (|||31746|)").unwrap();
        assert_eq!(port, 31746);
    }

    #[test]
    fn repairs_private_pasv_address() {
        let pasv = Ipv4Addr::new(10, 0, 0, 5);
        let peer = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));
        assert_eq!(repair_nat(pasv, Some(peer)), Ipv4Addr::new(203, 0, 113, 9));
    }

    #[test]
    fn leaves_public_pasv_address_alone() {
        let pasv = Ipv4Addr::new(203, 0, 113, 9);
        let peer = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1));
        assert_eq!(repair_nat(pasv, Some(peer)), pasv);
    }

    #[test]
    fn leaves_private_pasv_alone_when_peer_is_also_private() {
        let pasv = Ipv4Addr::new(192, 168, 1, 100);
        let peer = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(repair_nat(pasv, Some(peer)), pasv);
    }

    #[test]
    fn rfc1918_ranges() {
        assert!(is_rfc1918_private(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(is_rfc1918_private(Ipv4Addr::new(172, 16, 0, 1)));
        assert!(is_rfc1918_private(Ipv4Addr::new(172, 31, 255, 255)));
        assert!(!is_rfc1918_private(Ipv4Addr::new(172, 32, 0, 1)));
        assert!(is_rfc1918_private(Ipv4Addr::new(192, 168, 0, 1)));
        assert!(!is_rfc1918_private(Ipv4Addr::new(8, 8, 8, 8)));
    }
}
