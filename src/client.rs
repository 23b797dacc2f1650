//! The FTP client facade — connection setup, session commands, and the
//! LIST/MLSD/RETR/STOR transfer operations built on top of
//! `task_queue`, `data_channel`, and `resolver`.
//!
//! Grounded on the teacher's `client.rs` (the login sequence, `FEAT`
//! probing, `PWD` parsing) and `service.rs` (the glob-filter/sort logic
//! in `list_with_options`), rebuilt around a dual-connection transfer
//! engine that reconciles data-channel and control-channel completion.

use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::config::{FtpConfig, SocksProxyConfig};
use crate::control::{self, FtpCodec};
use crate::data_channel::{self, DataChannelParams};
use crate::error::{FtpError, FtpResult};
use crate::parser;
use crate::progress::{ProgressCallback, ProgressKind, ProgressReader, ProgressTracker};
use crate::resolver::{self, BoxFuture};
use crate::task_queue::TaskQueue;
use crate::tls::{self, TlsSessionReuse};
use crate::types::*;

/// One connected FTP/FTPS session.
pub struct FtpClient {
    pub id: String,
    pub(crate) queue: TaskQueue,
    pub(crate) config: FtpConfig,
    pub(crate) socks_proxy: Option<SocksProxyConfig>,
    pub(crate) control_peer_ip: Option<IpAddr>,
    pub(crate) tls_reuse: TlsSessionReuse,
    pub info: FtpSessionInfo,
    pub features: ServerFeatures,
    pub(crate) progress_callback: Option<ProgressCallback>,
}

impl FtpClient {
    /// Run the full connect sequence: open the socket, upgrade
    /// to TLS where configured, authenticate, probe server features,
    /// and land in binary/file-structure mode in the server's initial
    /// working directory.
    pub async fn connect(config: FtpConfig) -> FtpResult<Self> {
        config.validate()?;
        let session_id = Uuid::new_v4().to_string();
        let socks_proxy = config.socks_proxy()?;

        let (mut codec, banner, mut peer_ip) = control::connect(&config).await?;
        let banner_text = banner.text();
        let mut tls_reuse = TlsSessionReuse::unavailable();

        if config.security_mode() == FtpSecurityMode::Explicit {
            let resp = codec.execute("AUTH TLS").await?;
            if !resp.is_success() {
                return Err(FtpError::tls_failed(format!("AUTH TLS rejected: {}", resp.text())));
            }
            let (upgraded, reuse) = if socks_proxy.is_some() {
                tls::upgrade_to_tls_over_socks(codec, &config.host, &config.secure_options).await?
            } else {
                tls::upgrade_to_tls(codec, &config.host, &config.secure_options).await?
            };
            codec = upgraded;
            tls_reuse = reuse;
        }

        if peer_ip.is_none() {
            peer_ip = resolve_host_ip(&config.host).await;
        }

        let user_resp = codec.execute(&format!("USER {}", config.user)).await?;
        if user_resp.code == 331 {
            let pass_resp = codec.execute(&format!("PASS {}", config.password)).await?;
            if !pass_resp.is_success() {
                return Err(FtpError::auth_failed(format!("login failed: {}", pass_resp.text())));
            }
        } else if !user_resp.is_success() && user_resp.code != 230 {
            return Err(FtpError::auth_failed(format!("USER rejected: {}", user_resp.text())));
        }

        let features = probe_features(&mut codec).await;
        if features.utf8 {
            let _ = codec.execute("OPTS UTF8 ON").await;
        }

        let system_type = match codec.execute("SYST").await {
            Ok(r) if r.is_success() => Some(r.text().trim_start_matches("215").trim().to_string()),
            _ => None,
        };

        codec.expect_ok("TYPE I").await?;
        codec.expect_ok("STRU F").await?;

        if config.security_mode().is_tls() {
            codec.expect_ok("PBSZ 0").await?;
            codec.expect_ok("PROT P").await?;
        }

        let cwd = get_pwd(&mut codec).await.unwrap_or_else(|_| "/".to_string());

        let now = Utc::now();
        let info = FtpSessionInfo {
            id: session_id.clone(),
            host: config.host.clone(),
            port: config.port,
            username: config.user.clone(),
            security: config.security_mode(),
            connected: true,
            current_directory: cwd,
            server_banner: Some(banner_text),
            system_type,
            features: features.raw_features.clone(),
            connected_at: now,
            last_activity: now,
            transfer_type: TransferType::Binary,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
        };

        let idle_timeout = config.timeout();
        Ok(Self {
            id: session_id,
            queue: TaskQueue::new(codec, idle_timeout),
            config,
            socks_proxy,
            control_peer_ip: peer_ip,
            tls_reuse,
            info,
            features,
            progress_callback: None,
        })
    }

    /// Install (or clear) the progress callback. Swapping
    /// the handler is a fresh start for `bytes_overall` on the next
    /// transfer — each call to `download`/`upload`/`list` creates its
    /// own [`ProgressTracker`].
    pub fn set_progress_callback(&mut self, callback: Option<ProgressCallback>) {
        self.progress_callback = callback;
    }

    pub fn is_connected(&self) -> bool {
        self.info.connected
    }

    pub fn pwd(&self) -> &str {
        &self.info.current_directory
    }

    pub fn diagnostics(&self) -> FtpDiagnostics {
        FtpDiagnostics {
            session_id: self.id.clone(),
            host: self.info.host.clone(),
            security: self.info.security,
            features: self.features.clone(),
            current_directory: self.info.current_directory.clone(),
            system_type: self.info.system_type.clone(),
            last_response_code: None,
        }
    }

    // ─── Simple round-trip commands ─────────────────────────────

    pub async fn noop(&mut self) -> FtpResult<()> {
        self.queue.expect_ok("NOOP").await?;
        self.touch();
        Ok(())
    }

    pub async fn cwd(&mut self, path: &str) -> FtpResult<String> {
        self.queue.expect_ok(&format!("CWD {}", path)).await?;
        let new_pwd = self.queue.submit(|codec| async move { get_pwd(codec).await }).await?;
        self.info.current_directory = new_pwd.clone();
        self.touch();
        Ok(new_pwd)
    }

    pub async fn cdup(&mut self) -> FtpResult<String> {
        self.queue.expect_ok("CDUP").await?;
        let new_pwd = self.queue.submit(|codec| async move { get_pwd(codec).await }).await?;
        self.info.current_directory = new_pwd.clone();
        self.touch();
        Ok(new_pwd)
    }

    pub async fn size(&mut self, path: &str) -> FtpResult<u64> {
        let resp = self.queue.expect_ok(&format!("SIZE {}", path)).await?;
        let text = resp.text();
        text.split_whitespace()
            .last()
            .unwrap_or("")
            .trim()
            .parse::<u64>()
            .map_err(|_| FtpError::protocol_error(format!("cannot parse SIZE reply: {}", text)))
    }

    pub async fn mdtm(&mut self, path: &str) -> FtpResult<String> {
        let resp = self.queue.expect_ok(&format!("MDTM {}", path)).await?;
        Ok(resp.text().split_whitespace().last().unwrap_or("").trim().to_string())
    }

    pub async fn site(&mut self, args: &str) -> FtpResult<FtpResponse> {
        let resp = self.queue.execute(&format!("SITE {}", args)).await?;
        self.touch();
        Ok(resp)
    }

    pub async fn quit(&mut self) -> FtpResult<()> {
        let _ = self.queue.execute("QUIT").await;
        self.info.connected = false;
        Ok(())
    }

    pub async fn abort(&mut self) -> FtpResult<()> {
        let _ = self.queue.execute("ABOR").await;
        self.touch();
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.info.last_activity = Utc::now();
    }

    // ─── Listing ─────────────────────────────────────────────────

    /// List a directory with the default options (MLSD preferred,
    /// hidden entries shown, unsorted).
    pub async fn list(&mut self, path: Option<&str>) -> FtpResult<Vec<FtpEntry>> {
        self.list_with_options(path, ListOptions::default()).await
    }

    /// List a directory, then apply the glob filter / hidden-file /
    /// sort options locally, the way the teacher's `service.rs`
    /// post-processes a raw listing.
    pub async fn list_with_options(&mut self, path: Option<&str>, options: ListOptions) -> FtpResult<Vec<FtpEntry>> {
        let use_mlsd = options.prefer_mlsd && self.features.mlsd;
        let data = self.retrieve_listing_bytes(path, use_mlsd).await?;
        let (text, _, _) = self.config.encoding.resolve().decode(&data);
        let mut entries = parser::parse_listing(&text);

        if let Some(filter) = &options.filter {
            let pattern = glob::Pattern::new(filter).map_err(|e| FtpError::invalid_config(e.to_string()))?;
            entries.retain(|e| pattern.matches(&e.name));
        }
        if !options.show_hidden {
            entries.retain(|e| !e.name.starts_with('.'));
        }
        if let Some(sort_by) = &options.sort_by {
            match sort_by {
                FtpSortField::Name => entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase())),
                FtpSortField::Size => entries.sort_by(|a, b| a.size.cmp(&b.size)),
                FtpSortField::Modified => entries.sort_by(|a, b| a.modified.cmp(&b.modified)),
                FtpSortField::Kind => entries.sort_by(|a, b| format!("{:?}", a.kind).cmp(&format!("{:?}", b.kind))),
            }
        }
        if options.sort_order == Some(FtpSortOrder::Desc) {
            entries.reverse();
        }

        self.touch();
        Ok(entries)
    }

    async fn retrieve_listing_bytes(&mut self, path: Option<&str>, use_mlsd: bool) -> FtpResult<Vec<u8>> {
        let cmd_name = if use_mlsd { "MLSD" } else { "LIST" };
        let cmd = match path {
            Some(p) => format!("{} {}", cmd_name, p),
            None => cmd_name.to_string(),
        };

        let mode = self.data_channel_mode();
        let mut guard = self.queue.acquire().await?;
        let params = self.data_channel_params();
        let stream = data_channel::open(&mut guard, mode, &params).await?;

        let resp = guard.execute(&cmd).await?;
        if !resp.is_preliminary() && !resp.is_success() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }

        let tracker = ProgressTracker::new(cmd.clone(), ProgressKind::List, self.progress_callback.clone());
        let reader = ProgressReader::new(stream, tracker);
        let data_fut: BoxFuture<FtpResult<Vec<u8>>> = Box::pin(async move {
            let mut r = reader;
            let mut buf = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut r, &mut buf)
                .await
                .map_err(FtpError::from)?;
            Ok(buf)
        });
        let control_fut: BoxFuture<FtpResult<FtpResponse>> = Box::pin(async move { guard.read_response().await });

        let (data, _resp) = self.drive_timed(data_fut, control_fut, self.config.timeout()).await?;
        Ok(data)
    }

    // ─── Transfers ───────────────────────────────────────────────

    /// Download `remote_path` into `sink`, starting at byte offset
    /// `start_at` (0 for a full download). Races the data copy against
    /// the control channel's final response.
    pub async fn download<W>(&mut self, remote_path: &str, mut sink: W, start_at: u64) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mode = self.data_channel_mode();
        let mut guard = self.queue.acquire().await?;
        let params = self.data_channel_params();
        let stream = data_channel::open(&mut guard, mode, &params).await?;

        if start_at > 0 {
            if !self.features.rest_stream {
                return Err(FtpError::unsupported("server does not advertise REST STREAM; cannot resume"));
            }
            guard.expect(&format!("REST {}", start_at), 3).await?;
        }

        let resp = guard.execute(&format!("RETR {}", remote_path)).await?;
        if !resp.is_preliminary() && !resp.is_success() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }

        let tracker = ProgressTracker::new(remote_path, ProgressKind::Download, self.progress_callback.clone());
        let reader = ProgressReader::new(stream, tracker);
        let data_fut: BoxFuture<FtpResult<u64>> = Box::pin(async move {
            let mut r = reader;
            tokio::io::copy(&mut r, &mut sink).await.map_err(FtpError::from)
        });
        let control_fut: BoxFuture<FtpResult<FtpResponse>> = Box::pin(async move { guard.read_response().await });

        let (bytes, _resp) = self.drive_timed(data_fut, control_fut, self.config.timeout()).await?;
        self.info.bytes_downloaded += bytes;
        self.touch();
        Ok(bytes)
    }

    /// Upload `source` to `remote_path`, starting at byte offset
    /// `resume_offset` (0 for a full upload) and using `APPE` instead
    /// of `STOR` when `append` is set.
    ///
    /// When the client is configured to tunnel through a SOCKS5 proxy,
    /// this routes through [`resolver::resolve_socks_upload`]'s
    /// size-probe protocol instead of trusting a bare
    /// `226` — a proxy can ack bytes into its own buffer well before
    /// they land on the server.
    pub async fn upload<R>(&mut self, source: R, remote_path: &str, resume_offset: u64, append: bool) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mode = self.data_channel_mode();
        let mut guard = self.queue.acquire().await?;
        let params = self.data_channel_params();
        let stream = data_channel::open(&mut guard, mode, &params).await?;

        if resume_offset > 0 {
            if !self.features.rest_stream {
                return Err(FtpError::unsupported("server does not advertise REST STREAM; cannot resume"));
            }
            guard.expect(&format!("REST {}", resume_offset), 3).await?;
        }

        let cmd_name = if append { "APPE" } else { "STOR" };
        let resp = guard.execute(&format!("{} {}", cmd_name, remote_path)).await?;
        if !resp.is_preliminary() && !resp.is_success() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }

        let tracker = ProgressTracker::new(remote_path, ProgressKind::Upload, self.progress_callback.clone());
        let reader = ProgressReader::new(source, tracker);

        let bytes = if self.socks_proxy.is_some() {
            let remote_path_owned = remote_path.to_string();
            let probe_config = self.config.clone();
            let data_fut: BoxFuture<FtpResult<u64>> = Box::pin(async move {
                resolver::resolve_socks_upload(reader, stream, async move {
                    let mut probe = FtpClient::connect(probe_config).await?;
                    let result = probe.size(&remote_path_owned).await;
                    let _ = probe.quit().await;
                    result
                })
                .await
            });
            let control_fut: BoxFuture<FtpResult<FtpResponse>> = Box::pin(async move { guard.read_response().await });
            self.drive_timed(data_fut, control_fut, self.config.timeout()).await?.0
        } else {
            let data_fut: BoxFuture<FtpResult<u64>> = Box::pin(async move {
                let mut r = reader;
                let mut s = stream;
                let n = tokio::io::copy(&mut r, &mut s).await.map_err(FtpError::from)?;
                s.shutdown().await.map_err(FtpError::from)?;
                Ok(n)
            });
            let control_fut: BoxFuture<FtpResult<FtpResponse>> = Box::pin(async move { guard.read_response().await });
            self.drive_timed(data_fut, control_fut, self.config.timeout()).await?.0
        };

        self.info.bytes_uploaded += bytes;
        self.touch();
        Ok(bytes)
    }

    /// Race `data_fut` against `control_fut` via [`resolver::drive_transfer`],
    /// poisoning the task queue when the data channel's idle timeout
    /// fires — a timeout is fatal to the whole session (spec §7), not
    /// just this one transfer, so the next operation must fail fast
    /// rather than retry a control channel whose peer state we no
    /// longer trust.
    async fn drive_timed<T: Send + 'static>(
        &self,
        data_fut: BoxFuture<FtpResult<T>>,
        control_fut: BoxFuture<FtpResult<FtpResponse>>,
        data_timeout: Option<Duration>,
    ) -> FtpResult<(T, FtpResponse)> {
        let result = resolver::drive_transfer(data_fut, control_fut, data_timeout).await;
        if let Err(e) = &result {
            if e.kind == crate::error::FtpErrorKind::Timeout {
                self.queue.poison();
            }
        }
        result
    }

    /// PASV for IPv4 control peers, EPSV for IPv6.
    fn data_channel_mode(&self) -> DataChannelMode {
        match self.control_peer_ip {
            Some(IpAddr::V6(_)) => DataChannelMode::ExtendedPassive,
            _ => DataChannelMode::Passive,
        }
    }

    fn data_channel_params(&self) -> DataChannelParams<'_> {
        DataChannelParams {
            security: self.config.security_mode(),
            tls_options: &self.config.secure_options,
            tls_reuse: &self.tls_reuse,
            control_peer_ip: self.control_peer_ip,
            socks_proxy: self.socks_proxy.as_ref(),
            data_timeout: self.config.timeout().unwrap_or(Duration::from_secs(30)),
            active_bind: None,
        }
    }
}

/// Resolve `host` to an `IpAddr` for use as the EPSV/NAT-repair
/// reference point when the control connection went through a SOCKS5
/// proxy and never exposed a local `peer_addr()`.
async fn resolve_host_ip(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    tokio::net::lookup_host((host, 0)).await.ok()?.next().map(|addr| addr.ip())
}

async fn get_pwd(codec: &mut FtpCodec) -> FtpResult<String> {
    let resp = codec.expect_ok("PWD").await?;
    parse_pwd(&resp.text())
}

/// Parse `/foo/bar` out of a `257 "/foo/bar" created/is current directory`
/// reply (RFC 959 quoted-path convention, doubled quotes unescaped).
fn parse_pwd(text: &str) -> FtpResult<String> {
    if let Some(start) = text.find('"') {
        if let Some(end) = text[start + 1..].find('"') {
            return Ok(text[start + 1..start + 1 + end].replace("\"\"", "\""));
        }
    }
    Err(FtpError::protocol_error(format!("cannot parse PWD reply: {}", text)))
}

/// Probe server capabilities via `FEAT` (RFC 2389). Never fails the
/// connect sequence — servers that don't support FEAT just yield an
/// all-`false` [`ServerFeatures`].
async fn probe_features(codec: &mut FtpCodec) -> ServerFeatures {
    let resp = match codec.execute("FEAT").await {
        Ok(r) => r,
        Err(_) => return ServerFeatures::default(),
    };
    if !resp.is_success() {
        return ServerFeatures::default();
    }

    let raw: Vec<String> = resp
        .lines
        .iter()
        .filter(|l| l.starts_with(' ') || !l.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
        .map(|l| l.trim().to_uppercase())
        .filter(|l| !l.is_empty())
        .collect();

    let has = |feat: &str| raw.iter().any(|l| l == feat || l.starts_with(&format!("{} ", feat)));

    ServerFeatures {
        mlsd: has("MLSD"),
        mlst: has("MLST"),
        size: has("SIZE"),
        mdtm: has("MDTM"),
        rest_stream: raw.iter().any(|l| l == "REST STREAM"),
        utf8: has("UTF8"),
        epsv: has("EPSV"),
        eprt: has("EPRT"),
        auth_tls: has("AUTH TLS") || has("AUTH SSL"),
        pbsz: has("PBSZ"),
        prot: has("PROT"),
        tvfs: has("TVFS"),
        clnt: has("CLNT"),
        mfmt: has("MFMT"),
        raw_features: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pwd_with_escaped_quotes() {
        let pwd = parse_pwd("257 \"/home/\"\"weird\"\" dir\" is current directory").unwrap();
        assert_eq!(pwd, "/home/\"weird\" dir");
    }

    #[test]
    fn rejects_pwd_without_quotes() {
        assert!(parse_pwd("257 no quotes here").is_err());
    }
}
