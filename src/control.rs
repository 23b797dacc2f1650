//! Control channel: command/response codec plus connection setup.
//!
//! Grounded on the teacher's `protocol.rs` (`FtpCodec`, the
//! `Plain`/`Tls` read/write half enums) and `connection.rs` (TCP
//! connect + implicit-TLS wrap), merged into one module and extended
//! with two `Socks`/`TlsSocks` variants so the control channel can be
//! routed through a [`crate::socks::SocksTunnel`] exactly like a plain
//! socket, so enabling a proxy routes both the control and data
//! channels through it. Multi-line framing itself is delegated to
//! [`crate::response::ResponseParser`] rather than duplicated here.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsStream;

use crate::config::FtpConfig;
use crate::error::{FtpError, FtpResult};
use crate::response::ResponseParser;
use crate::socks::{SocksTarget, SocksTunnel};
use crate::tls::build_tls_connector;
use crate::types::{FtpResponse, FtpSecurityMode};

/// Abstraction over the control channel's read half, plain, TLS,
/// SOCKS5-tunneled, or both.
pub enum ReadHalf {
    Plain(BufReader<OwnedReadHalf>),
    Tls(BufReader<tokio::io::ReadHalf<TlsStream<TcpStream>>>),
    Socks(BufReader<tokio::io::ReadHalf<SocksTunnel>>),
    TlsSocks(BufReader<tokio::io::ReadHalf<TlsStream<SocksTunnel>>>),
}

/// Abstraction over the control channel's write half.
pub enum WriteHalf {
    Plain(OwnedWriteHalf),
    Tls(tokio::io::WriteHalf<TlsStream<TcpStream>>),
    Socks(tokio::io::WriteHalf<SocksTunnel>),
    TlsSocks(tokio::io::WriteHalf<TlsStream<SocksTunnel>>),
}

/// The FTP command/response codec.
pub struct FtpCodec {
    reader: ReadHalf,
    writer: WriteHalf,
    parser: ResponseParser,
    encoding: &'static encoding_rs::Encoding,
}

impl FtpCodec {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: ReadHalf::Plain(BufReader::new(rd)),
            writer: WriteHalf::Plain(wr),
            parser: ResponseParser::new(),
            encoding: encoding_rs::UTF_8,
        }
    }

    pub fn from_tls(stream: TlsStream<TcpStream>) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: ReadHalf::Tls(BufReader::new(rd)),
            writer: WriteHalf::Tls(wr),
            parser: ResponseParser::new(),
            encoding: encoding_rs::UTF_8,
        }
    }

    pub fn from_socks(stream: SocksTunnel) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: ReadHalf::Socks(BufReader::new(rd)),
            writer: WriteHalf::Socks(wr),
            parser: ResponseParser::new(),
            encoding: encoding_rs::UTF_8,
        }
    }

    pub fn from_tls_socks(stream: TlsStream<SocksTunnel>) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: ReadHalf::TlsSocks(BufReader::new(rd)),
            writer: WriteHalf::TlsSocks(wr),
            parser: ResponseParser::new(),
            encoding: encoding_rs::UTF_8,
        }
    }

    /// Set the charset outgoing commands are encoded in (spec: "sends
    /// commands encoded in the configured charset, default UTF-8").
    /// Response parsing itself stays ASCII-prefix-only regardless, per
    /// the control channel's own invariant that reply codes are ASCII.
    pub fn set_encoding(&mut self, encoding: &'static encoding_rs::Encoding) {
        self.encoding = encoding;
    }

    pub fn encoding(&self) -> &'static encoding_rs::Encoding {
        self.encoding
    }

    /// Send a raw FTP command (without trailing CRLF — we add it),
    /// encoded in the codec's configured charset.
    /// Redacts the argument of `PASS` in the trace log.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let line = format!("{}\r\n", cmd);
        let (bytes, _, _) = self.encoding.encode(&line);
        match &mut self.writer {
            WriteHalf::Plain(w) => w.write_all(&bytes).await?,
            WriteHalf::Tls(w) => w.write_all(&bytes).await?,
            WriteHalf::Socks(w) => w.write_all(&bytes).await?,
            WriteHalf::TlsSocks(w) => w.write_all(&bytes).await?,
        }
        log::trace!(">>> {}", redact(cmd));
        Ok(())
    }

    async fn read_chunk(&mut self) -> FtpResult<Vec<u8>> {
        let mut raw = Vec::new();
        let n = match &mut self.reader {
            ReadHalf::Plain(r) => r.read_until(b'\n', &mut raw).await?,
            ReadHalf::Tls(r) => r.read_until(b'\n', &mut raw).await?,
            ReadHalf::Socks(r) => r.read_until(b'\n', &mut raw).await?,
            ReadHalf::TlsSocks(r) => r.read_until(b'\n', &mut raw).await?,
        };
        if n == 0 {
            return Err(FtpError::disconnected("server closed the control connection"));
        }
        Ok(raw)
    }

    /// Read one complete FTP response, possibly spanning several lines.
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        loop {
            let raw = self.read_chunk().await?;
            let mut responses = self.parser.feed(&raw)?;
            if let Some(resp) = responses.drain(..).next() {
                log::trace!(
                    "<<< {} {}",
                    resp.code,
                    resp.lines.last().map(String::as_str).unwrap_or("")
                );
                return Ok(resp);
            }
        }
    }

    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    pub async fn expect(&mut self, cmd: &str, expected_first_digit: u16) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        if resp.code / 100 != expected_first_digit {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }

    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.expect(cmd, 2).await
    }

    /// Reunite a **plain, non-proxied** codec back into its `TcpStream`,
    /// for the Explicit-FTPS `AUTH TLS` upgrade.
    pub fn into_plain_tcp(self) -> FtpResult<TcpStream> {
        let rd = match self.reader {
            ReadHalf::Plain(br) => br.into_inner(),
            _ => return Err(FtpError::protocol_error("cannot upgrade: connection is not plain TCP")),
        };
        let wr = match self.writer {
            WriteHalf::Plain(w) => w,
            _ => return Err(FtpError::protocol_error("cannot upgrade: connection is not plain TCP")),
        };
        rd.reunite(wr)
            .map_err(|e| FtpError::protocol_error(format!("reunite failed: {}", e)))
    }

    /// Reunite a **plain, SOCKS5-tunneled** codec back into its
    /// [`SocksTunnel`], for the Explicit-FTPS upgrade over a proxy.
    pub fn into_plain_socks(self) -> FtpResult<SocksTunnel> {
        let rd = match self.reader {
            ReadHalf::Socks(br) => br.into_inner(),
            _ => return Err(FtpError::protocol_error("cannot upgrade: connection is not a plain SOCKS5 tunnel")),
        };
        let wr = match self.writer {
            WriteHalf::Socks(w) => w,
            _ => return Err(FtpError::protocol_error("cannot upgrade: connection is not a plain SOCKS5 tunnel")),
        };
        rd.unsplit(wr)
            .map_err(|_| FtpError::protocol_error("reunite failed: mismatched halves"))
    }
}

fn redact(cmd: &str) -> String {
    if cmd.starts_with("PASS ") {
        "PASS ***".to_string()
    } else {
        cmd.to_string()
    }
}

/// Open the control connection for `config`, returning a ready-to-use
/// codec, the server's welcome banner, and (when connected directly,
/// not through a SOCKS5 proxy) the control channel's peer IP — used by
/// `data_channel.rs` for NAT repair and as the EPSV connect target.
/// For Explicit FTPS the caller still has to issue `AUTH TLS` (see
/// `client.rs`).
pub async fn connect(config: &FtpConfig) -> FtpResult<(FtpCodec, FtpResponse, Option<std::net::IpAddr>)> {
    let dur = config.timeout().unwrap_or(Duration::from_secs(30));
    let mut peer_ip = None;

    let mut codec = match config.socks_proxy()? {
        Some(proxy) => {
            let target = SocksTarget::parse(&config.host);
            let tunnel = SocksTunnel::connect(&proxy.host, proxy.port, target, config.port, Some(dur)).await?;
            match config.security_mode() {
                FtpSecurityMode::Implicit => {
                    let connector = build_tls_connector(&config.secure_options)?;
                    let tls = connector
                        .connect(&config.host, tunnel)
                        .await
                        .map_err(|e| FtpError::tls_failed(format!("implicit TLS handshake over SOCKS5: {}", e)))?;
                    FtpCodec::from_tls_socks(tls)
                }
                _ => FtpCodec::from_socks(tunnel),
            }
        }
        None => {
            let addr = format!("{}:{}", config.host, config.port);
            let tcp = timeout(dur, TcpStream::connect(&addr))
                .await
                .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out", addr)))?
                .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;
            tcp.set_nodelay(true).ok();
            peer_ip = tcp.peer_addr().ok().map(|a| a.ip());

            match config.security_mode() {
                FtpSecurityMode::Implicit => {
                    let connector = build_tls_connector(&config.secure_options)?;
                    let tls = connector
                        .connect(&config.host, tcp)
                        .await
                        .map_err(|e| FtpError::tls_failed(format!("implicit TLS handshake: {}", e)))?;
                    FtpCodec::from_tls(tls)
                }
                _ => FtpCodec::from_tcp(tcp),
            }
        }
    };

    codec.set_encoding(config.encoding.resolve());

    let banner = codec.read_response().await?;
    Ok((codec, banner, peer_ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream as TokioTcpStream};

    #[test]
    fn redacts_password() {
        assert_eq!(redact("PASS hunter2"), "PASS ***");
        assert_eq!(redact("USER anonymous"), "USER anonymous");
        assert_eq!(redact("PASS"), "PASS");
    }

    #[tokio::test]
    async fn send_command_defaults_to_utf8() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = TokioTcpStream::connect(addr).await.unwrap();
        let mut server = accept.await.unwrap();

        let mut codec = FtpCodec::from_tcp(client);
        codec.send_command("CWD caf\u{e9}").await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], "CWD caf\u{e9}\r\n".as_bytes());
    }

    #[tokio::test]
    async fn send_command_honors_configured_charset() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = TokioTcpStream::connect(addr).await.unwrap();
        let mut server = accept.await.unwrap();

        let mut codec = FtpCodec::from_tcp(client);
        codec.set_encoding(encoding_rs::WINDOWS_1252);
        codec.send_command("CWD caf\u{e9}").await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        // "é" is 0xE9 in windows-1252/iso-8859-1, one byte, not the
        // two-byte UTF-8 encoding 0xC3 0xA9.
        assert_eq!(&buf[..n], b"CWD caf\xe9\r\n");
    }
}
