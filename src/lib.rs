//! # ftp-tunnel-client — FTP/FTPS client with SOCKS5 tunneling
//!
//! Full implementation of the FTP protocol (RFC 959) with extensions:
//! - **RFC 2228 / 4217** — AUTH TLS / FTPS (Explicit & Implicit)
//! - **RFC 3659** — MLSD/MLST, SIZE, MDTM, REST STREAM
//! - **RFC 2389** — FEAT negotiation
//! - **RFC 2428** — EPSV / EPRT (IPv6-ready)
//! - **RFC 1928** — SOCKS5 CONNECT tunneling of both channels
//!
//! The hard core is the dual-connection transfer engine: [`response`]
//! parses wire replies, [`task_queue`] serializes the control channel,
//! [`data_channel`] negotiates passive-mode data sockets (with NAT
//! repair and optional SOCKS5/TLS), and [`resolver`] reconciles the two
//! asynchronous completion signals — data-channel EOF and the
//! control channel's final response — into one outcome per transfer,
//! including the SOCKS5 upload size-probe special case. [`client`]
//! assembles these into the public [`FtpClient`] facade; [`directory`]
//! and [`file_ops`] layer convenience tree/filesystem operations on top.
//!
//! ```no_run
//! use ftp_tunnel_client::{FtpClient, FtpConfig};
//!
//! # async fn example() -> ftp_tunnel_client::error::FtpResult<()> {
//! let config = FtpConfig::builder()
//!     .host("ftp.example.com")
//!     .user("alice")
//!     .password("s3cret")
//!     .build()?;
//!
//! let mut client = FtpClient::connect(config).await?;
//! let entries = client.list(None).await?;
//! for entry in entries {
//!     println!("{}", entry.name);
//! }
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod control;
pub mod data_channel;
pub mod directory;
pub mod error;
pub mod file_ops;
pub mod parser;
pub mod progress;
pub mod resolver;
pub mod response;
pub mod socks;
pub mod task_queue;
pub mod tls;
pub mod types;

pub use client::FtpClient;
pub use config::{FtpConfig, FtpConfigBuilder, SecureMode, SocksProxyConfig, TlsOptions};
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use progress::{ProgressCallback, ProgressEvent, ProgressKind};
pub use response::ResponseParser;
pub use types::*;
