//! Client configuration surface.

use serde::{Deserialize, Serialize};

use crate::error::{FtpError, FtpResult};
use crate::types::{CharsetName, FtpSecurityMode};

/// Opaque TLS tuning knobs (CA bundle, SNI override, verification flags).
///
/// Kept separate from [`FtpConfig`] since these are passed straight
/// through to the TLS connector builder in `tls.rs` rather than read by
/// the core itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    /// PEM-encoded CA certificates to trust in addition to the platform
    /// store. Empty means "platform store only".
    #[serde(default)]
    pub ca_bundle_pem: Vec<String>,
    /// SNI hostname override, if it differs from `host`.
    pub sni_override: Option<String>,
    /// Skip certificate verification entirely. Dangerous; intended for
    /// talking to servers with self-signed certificates in test
    /// environments only.
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
    /// Skip hostname verification while still validating the chain.
    #[serde(default)]
    pub danger_accept_invalid_hostnames: bool,
}

/// SOCKS5 proxy endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocksProxyConfig {
    pub host: String,
    pub port: u16,
}

/// Full configuration surface for [`crate::client::FtpClient`].
///
/// Every field has a sensible default so `FtpConfig::default()` is
/// immediately usable (`host` = `localhost`, `port` = `21`, `user` =
/// `anonymous`, `password` = `guest`, `secure` = `false`, no proxy,
/// `timeout` = 30s).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default)]
    pub secure: SecureMode,
    #[serde(default)]
    pub secure_options: TlsOptions,
    #[serde(default)]
    pub use_socks_proxy: bool,
    pub socks_proxy_host: Option<String>,
    pub socks_proxy_port: Option<u16>,
    /// Idle timeout in milliseconds; `0` disables it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Charset outgoing control commands are encoded in, and listing
    /// bytes are decoded with. Defaults to UTF-8.
    #[serde(default)]
    pub encoding: CharsetName,
}

/// The three-state `secure` key: off, explicit AUTH TLS, or
/// implicit TLS-from-byte-zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SecureMode {
    False,
    True,
    Implicit,
}

impl Default for SecureMode {
    fn default() -> Self {
        SecureMode::False
    }
}

impl From<SecureMode> for FtpSecurityMode {
    fn from(mode: SecureMode) -> Self {
        match mode {
            SecureMode::False => FtpSecurityMode::None,
            SecureMode::True => FtpSecurityMode::Explicit,
            SecureMode::Implicit => FtpSecurityMode::Implicit,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    21
}

fn default_user() -> String {
    "anonymous".to_string()
}

fn default_password() -> String {
    "guest".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
            secure: SecureMode::default(),
            secure_options: TlsOptions::default(),
            use_socks_proxy: false,
            socks_proxy_host: None,
            socks_proxy_port: None,
            timeout_ms: default_timeout_ms(),
            encoding: CharsetName::default(),
        }
    }
}

impl FtpConfig {
    pub fn builder() -> FtpConfigBuilder {
        FtpConfigBuilder::default()
    }

    pub fn security_mode(&self) -> FtpSecurityMode {
        self.secure.into()
    }

    pub fn socks_proxy(&self) -> FtpResult<Option<SocksProxyConfig>> {
        if !self.use_socks_proxy {
            return Ok(None);
        }
        let host = self
            .socks_proxy_host
            .clone()
            .ok_or_else(|| FtpError::invalid_config("useSocksProxy is set but socksProxyHost is missing"))?;
        let port = self
            .socks_proxy_port
            .ok_or_else(|| FtpError::invalid_config("useSocksProxy is set but socksProxyPort is missing"))?;
        Ok(Some(SocksProxyConfig { host, port }))
    }

    /// `None` means the idle timeout is disabled (`timeout: 0`).
    pub fn timeout(&self) -> Option<std::time::Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(std::time::Duration::from_millis(self.timeout_ms))
        }
    }

    pub fn validate(&self) -> FtpResult<()> {
        if self.host.is_empty() {
            return Err(FtpError::invalid_config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(FtpError::invalid_config("port must be nonzero"));
        }
        self.socks_proxy()?;
        Ok(())
    }
}

/// Builder-style construction, matching the teacher's config-struct
/// conventions elsewhere in the workspace.
#[derive(Debug, Clone, Default)]
pub struct FtpConfigBuilder {
    inner: FtpConfigBuilderInner,
}

#[derive(Debug, Clone)]
struct FtpConfigBuilderInner {
    config: FtpConfig,
}

impl Default for FtpConfigBuilderInner {
    fn default() -> Self {
        Self {
            config: FtpConfig::default(),
        }
    }
}

impl FtpConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.inner.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.inner.config.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.inner.config.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.inner.config.password = password.into();
        self
    }

    pub fn secure(mut self, mode: SecureMode) -> Self {
        self.inner.config.secure = mode;
        self
    }

    pub fn secure_options(mut self, options: TlsOptions) -> Self {
        self.inner.config.secure_options = options;
        self
    }

    pub fn socks_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.inner.config.use_socks_proxy = true;
        self.inner.config.socks_proxy_host = Some(host.into());
        self.inner.config.socks_proxy_port = Some(port);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.inner.config.timeout_ms = timeout_ms;
        self
    }

    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.inner.config.encoding = CharsetName(label.into());
        self
    }

    pub fn build(self) -> FtpResult<FtpConfig> {
        self.inner.config.validate()?;
        Ok(self.inner.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = FtpConfig::default();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 21);
        assert_eq!(cfg.user, "anonymous");
        assert_eq!(cfg.password, "guest");
        assert_eq!(cfg.secure, SecureMode::False);
        assert!(!cfg.use_socks_proxy);
        assert_eq!(cfg.timeout_ms, 30_000);
    }

    #[test]
    fn default_encoding_is_utf8() {
        let cfg = FtpConfig::default();
        assert_eq!(cfg.encoding, CharsetName::utf8());
    }

    #[test]
    fn unrecognized_encoding_label_falls_back_to_utf8() {
        let cfg = FtpConfigBuilder::default().encoding("not-a-real-charset").build().unwrap();
        assert_eq!(cfg.encoding.resolve(), encoding_rs::UTF_8);
    }

    #[test]
    fn recognized_encoding_label_resolves() {
        let cfg = FtpConfigBuilder::default().encoding("iso-8859-1").build().unwrap();
        assert_eq!(cfg.encoding.resolve(), encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn zero_timeout_disables_it() {
        let cfg = FtpConfigBuilder::default().timeout_ms(0).build().unwrap();
        assert_eq!(cfg.timeout(), None);
    }

    #[test]
    fn proxy_requires_host_and_port() {
        let mut cfg = FtpConfig::default();
        cfg.use_socks_proxy = true;
        assert!(cfg.socks_proxy().is_err());
        cfg.socks_proxy_host = Some("127.0.0.1".into());
        cfg.socks_proxy_port = Some(1080);
        let proxy = cfg.socks_proxy().unwrap().unwrap();
        assert_eq!(proxy.host, "127.0.0.1");
        assert_eq!(proxy.port, 1080);
    }

    #[test]
    fn builder_roundtrip() {
        let cfg = FtpConfig::builder()
            .host("ftp.example.com")
            .port(2121)
            .user("alice")
            .password("s3cret")
            .secure(SecureMode::Implicit)
            .socks_proxy("127.0.0.1", 1080)
            .build()
            .unwrap();
        assert_eq!(cfg.host, "ftp.example.com");
        assert_eq!(cfg.security_mode(), FtpSecurityMode::Implicit);
        assert!(cfg.use_socks_proxy);
    }
}
