//! SOCKS5 tunneling socket (RFC 1928, unauthenticated CONNECT only).
//!
//! Grounded on this workspace's own SOCKS5 client code in the SSH crate
//! (`connect_through_socks5`), generalized in two ways that crate's
//! fixed-shape reply parsing didn't need: the CONNECT reply's bound
//! address is parsed ATYP-first instead of assumed to be a 4-byte IPv4
//! address, and writes issued before the tunnel reaches `Established`
//! are queued rather than attempted immediately, per the buffered-I/O
//! contract.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::error::{FtpError, FtpResult};

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// CONNECT target, addressed by IP or domain name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocksTarget {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl SocksTarget {
    /// Parse a host string, preferring a literal IP address over a
    /// domain-name encoding when one parses cleanly.
    pub fn parse(host: &str) -> Self {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            SocksTarget::Ipv4(ip)
        } else if let Ok(ip) = host.parse::<Ipv6Addr>() {
            SocksTarget::Ipv6(ip)
        } else {
            SocksTarget::Domain(host.to_string())
        }
    }
}

/// Stage of the SOCKS5 handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksStage {
    Greeting,
    ConnectReply,
    Established,
}

/// A byte-stream endpoint that negotiates a SOCKS5 CONNECT before
/// forwarding, so callers can use it anywhere a plain `TcpStream`
/// would go.
pub struct SocksTunnel {
    inner: TcpStream,
    stage: SocksStage,
    /// Writes accepted before `Established`; flushed in order on the
    /// transition, per the buffered-I/O contract.
    pending_writes: Vec<u8>,
}

impl SocksTunnel {
    fn new(inner: TcpStream) -> Self {
        Self {
            inner,
            stage: SocksStage::Greeting,
            pending_writes: Vec::new(),
        }
    }

    pub fn stage(&self) -> SocksStage {
        self.stage
    }

    /// Connect to the proxy and negotiate a tunnel to `target:port`.
    pub async fn connect(
        proxy_host: &str,
        proxy_port: u16,
        target: SocksTarget,
        target_port: u16,
        connect_timeout: Option<Duration>,
    ) -> FtpResult<Self> {
        let proxy_addr = format!("{}:{}", proxy_host, proxy_port);
        let stream = match connect_timeout {
            Some(dur) => tokio::time::timeout(dur, TcpStream::connect(&proxy_addr))
                .await
                .map_err(|_| FtpError::timeout(format!("SOCKS5 proxy connect to {} timed out", proxy_addr)))?
                .map_err(|e| FtpError::socks_error(format!("failed to connect to proxy {}: {}", proxy_addr, e)))?,
            None => TcpStream::connect(&proxy_addr)
                .await
                .map_err(|e| FtpError::socks_error(format!("failed to connect to proxy {}: {}", proxy_addr, e)))?,
        };
        stream.set_nodelay(true).ok();

        let mut tunnel = Self::new(stream);
        tunnel.handshake(&target, target_port).await?;
        Ok(tunnel)
    }

    async fn handshake(&mut self, target: &SocksTarget, port: u16) -> FtpResult<()> {
        self.greet().await?;
        self.stage = SocksStage::ConnectReply;
        self.connect_request(target, port).await?;
        self.stage = SocksStage::Established;

        if !self.pending_writes.is_empty() {
            let queued = std::mem::take(&mut self.pending_writes);
            self.inner
                .write_all(&queued)
                .await
                .map_err(|e| FtpError::socks_error(format!("flushing buffered writes: {}", e)))?;
        }
        Ok(())
    }

    async fn greet(&mut self) -> FtpResult<()> {
        self.inner
            .write_all(&[SOCKS_VERSION, 0x01, METHOD_NO_AUTH])
            .await
            .map_err(|e| FtpError::socks_error(format!("sending greeting: {}", e)))?;

        let mut reply = [0u8; 2];
        self.inner
            .read_exact(&mut reply)
            .await
            .map_err(|e| FtpError::socks_error(format!("reading greeting reply: {}", e)))?;

        if reply[0] != SOCKS_VERSION {
            return Err(FtpError::socks_error(format!(
                "unexpected SOCKS version {} in greeting reply",
                reply[0]
            )));
        }
        if reply[1] != METHOD_NO_AUTH {
            return Err(FtpError::socks_error(
                "proxy requires an authentication method we don't support (unauthenticated CONNECT only)",
            ));
        }
        Ok(())
    }

    async fn connect_request(&mut self, target: &SocksTarget, port: u16) -> FtpResult<()> {
        let request = encode_connect_request(target, port);
        self.inner
            .write_all(&request)
            .await
            .map_err(|e| FtpError::socks_error(format!("sending CONNECT request: {}", e)))?;

        let mut header = [0u8; 4];
        self.inner
            .read_exact(&mut header)
            .await
            .map_err(|e| FtpError::socks_error(format!("reading CONNECT reply header: {}", e)))?;

        if header[0] != SOCKS_VERSION {
            return Err(FtpError::socks_error(format!(
                "unexpected SOCKS version {} in CONNECT reply",
                header[0]
            )));
        }
        if header[2] != 0x00 {
            return Err(FtpError::socks_error("reserved byte in CONNECT reply must be 0x00"));
        }
        if header[1] != 0x00 {
            return Err(FtpError::socks_error(reply_code_message(header[1])));
        }

        let addr_len = match header[3] {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            ATYP_DOMAIN => {
                let mut len_byte = [0u8; 1];
                self.inner
                    .read_exact(&mut len_byte)
                    .await
                    .map_err(|e| FtpError::socks_error(format!("reading domain length: {}", e)))?;
                len_byte[0] as usize
            }
            other => {
                return Err(FtpError::socks_error(format!(
                    "unsupported address type {} in CONNECT reply",
                    other
                )))
            }
        };

        // Bound address + 2-byte port; we don't need the value, only
        // to consume exactly as many bytes as the wire format demands.
        let mut trailer = vec![0u8; addr_len + 2];
        self.inner
            .read_exact(&mut trailer)
            .await
            .map_err(|e| FtpError::socks_error(format!("reading bound address: {}", e)))?;

        Ok(())
    }
}

/// Encode a CONNECT request for `target:port`.
pub fn encode_connect_request(target: &SocksTarget, port: u16) -> Vec<u8> {
    let mut req = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    match target {
        SocksTarget::Ipv4(ip) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&ip.octets());
        }
        SocksTarget::Ipv6(ip) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&ip.octets());
        }
        SocksTarget::Domain(name) => {
            req.push(ATYP_DOMAIN);
            req.push(name.len() as u8);
            req.extend_from_slice(name.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    req
}

/// Map a SOCKS5 CONNECT reply code to its standard reason string.
fn reply_code_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS5 error",
    }
}

impl AsyncRead for SocksTunnel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.stage != SocksStage::Established {
            // Reads before the handshake settles return nothing.
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SocksTunnel {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.stage != SocksStage::Established {
            this.pending_writes.extend_from_slice(buf);
            return Poll::Ready(Ok(buf.len()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.stage != SocksStage::Established {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn domain_connect_request_is_byte_exact() {
        let req = encode_connect_request(&SocksTarget::parse("example.org"), 21);
        let mut expected = vec![0x05, 0x01, 0x00, 0x03, 0x0b];
        expected.extend_from_slice(b"example.org");
        expected.extend_from_slice(&21u16.to_be_bytes());
        assert_eq!(req, expected);
    }

    #[test]
    fn ipv4_connect_request() {
        let req = encode_connect_request(&SocksTarget::parse("192.168.1.1"), 80);
        assert_eq!(req, vec![0x05, 0x01, 0x00, 0x01, 192, 168, 1, 1, 0, 80]);
    }

    #[tokio::test]
    async fn full_handshake_against_a_minimal_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        let proxy = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            sock.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            sock.write_all(&[0x05, 0x00]).await.unwrap();

            let mut header = [0u8; 4];
            sock.read_exact(&mut header).await.unwrap();
            assert_eq!(&header[..3], &[0x05, 0x01, 0x00]);
            let mut rest = vec![0u8; header[3] as usize + 2 + if header[3] == 3 { 1 } else { 0 }];
            // domain: one length byte then name then port
            if header[3] == 0x03 {
                let mut len_byte = [0u8; 1];
                sock.read_exact(&mut len_byte).await.unwrap();
                let mut name = vec![0u8; len_byte[0] as usize];
                sock.read_exact(&mut name).await.unwrap();
                let mut port = [0u8; 2];
                sock.read_exact(&mut port).await.unwrap();
                let _ = rest;
            }
            sock.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();

            let mut payload = [0u8; 5];
            sock.read_exact(&mut payload).await.unwrap();
            assert_eq!(&payload, b"hello");
        });

        let mut tunnel = SocksTunnel::connect(
            &proxy_addr.ip().to_string(),
            proxy_addr.port(),
            SocksTarget::Domain("example.org".to_string()),
            21,
            None,
        )
        .await
        .unwrap();

        assert_eq!(tunnel.stage(), SocksStage::Established);
        tunnel.write_all(b"hello").await.unwrap();
        tunnel.flush().await.unwrap();

        proxy.await.unwrap();
    }

    #[test]
    fn reply_codes_map_to_distinct_messages() {
        assert_eq!(reply_code_message(0x04), "host unreachable");
        assert_eq!(reply_code_message(0xff), "unknown SOCKS5 error");
    }
}
