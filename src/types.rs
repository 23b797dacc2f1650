//! Shared data types for the FTP client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Connection / Session ────────────────────────────────────────────

/// Security mode for the control channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpSecurityMode {
    /// Plain-text FTP (port 21).
    None,
    /// Explicit FTPS — starts plain then upgrades via AUTH TLS (port 21).
    Explicit,
    /// Implicit FTPS — TLS from the first byte (port 990).
    Implicit,
}

impl Default for FtpSecurityMode {
    fn default() -> Self {
        Self::None
    }
}

impl FtpSecurityMode {
    /// Whether the control channel ends up TLS-protected either way.
    pub fn is_tls(self) -> bool {
        !matches!(self, FtpSecurityMode::None)
    }
}

/// The charset the control channel encodes outgoing commands in and
/// decodes listing bytes with. Holds a WHATWG encoding label
/// (`"utf-8"`, `"iso-8859-1"`, `"shift_jis"`, ...); unrecognized labels
/// fall back to UTF-8 rather than rejecting the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CharsetName(pub String);

impl CharsetName {
    pub fn utf8() -> Self {
        Self("utf-8".to_string())
    }

    /// Resolve to the underlying `encoding_rs` encoding, defaulting to
    /// UTF-8 for an unrecognized label.
    pub fn resolve(&self) -> &'static encoding_rs::Encoding {
        encoding_rs::Encoding::for_label(self.0.as_bytes()).unwrap_or(encoding_rs::UTF_8)
    }
}

impl Default for CharsetName {
    fn default() -> Self {
        Self::utf8()
    }
}

impl From<&str> for CharsetName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transfer type (RFC 959 TYPE command).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferType {
    Ascii,
    Binary,
}

impl Default for TransferType {
    fn default() -> Self {
        Self::Binary
    }
}

/// Transfer mode selected for the data channel.
///
/// Only `Passive`/`ExtendedPassive` carry the core's NAT-repair and
/// TLS-session-reuse guarantees. `Active`/`ExtendedActive`
/// are kept as a secondary path with no such guarantees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    Passive,
    ExtendedPassive,
    Active,
    ExtendedActive,
}

impl Default for DataChannelMode {
    fn default() -> Self {
        Self::Passive
    }
}

/// Direction of a file transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    Upload,
    Download,
    List,
}

impl TransferDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
            TransferDirection::List => "list",
        }
    }
}

/// Information about the active FTP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub security: FtpSecurityMode,
    pub connected: bool,
    pub current_directory: String,
    pub server_banner: Option<String>,
    pub system_type: Option<String>,
    pub features: Vec<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub transfer_type: TransferType,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

// ─── Directory Listing ───────────────────────────────────────────────

/// Type of a remote filesystem entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpEntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One entry from a directory listing (parsed from LIST or MLSD output).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpEntry {
    pub name: String,
    pub kind: FtpEntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub link_target: Option<String>,
    /// Raw line from the server (for debugging).
    pub raw: Option<String>,
    /// MLSD fact map (e.g. "type" → "file", "size" → "1234").
    #[serde(default)]
    pub facts: HashMap<String, String>,
}

/// Sorting field for directory listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpSortField {
    Name,
    Size,
    Modified,
    Kind,
}

/// Sort order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpSortOrder {
    Asc,
    Desc,
}

/// Options for listing a directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    /// Filter by glob pattern (e.g. "*.txt").
    pub filter: Option<String>,
    pub sort_by: Option<FtpSortField>,
    pub sort_order: Option<FtpSortOrder>,
    /// Show hidden ("dot") files.
    #[serde(default = "default_true")]
    pub show_hidden: bool,
    /// Prefer MLSD over LIST when the server supports it.
    #[serde(default = "default_true")]
    pub prefer_mlsd: bool,
}

fn default_true() -> bool {
    true
}

// ─── FTP Response ────────────────────────────────────────────────────

/// A single FTP response (may be multi-line).
///
/// Invariant: `code` matches `^[1-5][0-5][0-9]$` — enforced
/// by [`crate::response::ResponseParser`], never constructed directly
/// with an out-of-range code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
    pub is_multiline: bool,
}

impl FtpResponse {
    /// Full response text — all lines joined with newlines preserved.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Whether the response code indicates success (1xx–3xx).
    pub fn is_success(&self) -> bool {
        self.code < 400
    }

    /// Whether this is a positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Whether this is a positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is a positive-intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

// ─── Server Capabilities ─────────────────────────────────────────────

/// Parsed FEAT response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFeatures {
    pub mlsd: bool,
    pub mlst: bool,
    pub size: bool,
    pub mdtm: bool,
    pub rest_stream: bool,
    pub utf8: bool,
    pub epsv: bool,
    pub eprt: bool,
    pub auth_tls: bool,
    pub pbsz: bool,
    pub prot: bool,
    pub tvfs: bool,
    pub clnt: bool,
    pub mfmt: bool,
    pub raw_features: Vec<String>,
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpDiagnostics {
    pub session_id: String,
    pub host: String,
    pub security: FtpSecurityMode,
    pub features: ServerFeatures,
    pub current_directory: String,
    pub system_type: Option<String>,
    pub last_response_code: Option<u16>,
}
