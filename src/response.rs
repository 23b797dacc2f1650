//! Pure, total FTP response parser (RFC 959 §4 framing).
//!
//! [`ResponseParser`] never performs I/O and never blocks: it is fed
//! whatever bytes the transport happened to read in one go and returns
//! the (possibly empty) batch of complete [`FtpResponse`] values those
//! bytes produced, buffering anything left over as residual state for
//! the next `feed()` call. This keeps the round-trip from parsed reply
//! back to parsed reply working regardless of how the caller chooses
//! to chunk reads.
//!
//! Framing rules:
//! - a line is bytes up to and including `\r\n` (a bare `\n` is
//!   tolerated too);
//! - outside a multi-line block, `^\d{3}[ ](.*)` closes immediately as
//!   a single-line reply; `^\d{3}-(.*)` opens a multi-line block;
//! - inside a block, every line is accumulated verbatim (leading
//!   whitespace preserved) until a line matching `^<code>[ ](.*)` with
//!   the *same* code terminates it — a line whose three-digit prefix
//!   differs from the opening code does not terminate the block, even
//!   if otherwise shaped like a terminator.

use crate::error::{FtpError, FtpResult};
use crate::types::FtpResponse;

struct MultilineState {
    code: u16,
    lines: Vec<String>,
}

/// Incremental response parser with line-buffering residual state.
#[derive(Default)]
pub struct ResponseParser {
    residual: Vec<u8>,
    multiline: Option<MultilineState>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of freshly-read bytes, returning every [`FtpResponse`]
    /// those bytes completed, in wire order. Incomplete trailing data is
    /// retained internally and combined with the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> FtpResult<Vec<FtpResponse>> {
        self.residual.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            let Some(nl) = self.residual.iter().position(|&b| b == b'\n') else {
                break;
            };
            let raw_line = self.residual.drain(..=nl).collect::<Vec<u8>>();
            let line = strip_eol(&raw_line);
            if let Some(resp) = self.consume_line(&line)? {
                out.push(resp);
            }
        }

        Ok(out)
    }

    /// True if no partial line or open multi-line block remains buffered.
    pub fn is_idle(&self) -> bool {
        self.residual.is_empty() && self.multiline.is_none()
    }

    fn consume_line(&mut self, line: &str) -> FtpResult<Option<FtpResponse>> {
        if let Some(state) = self.multiline.as_mut() {
            let terminator = format!("{} ", state.code);
            if line.len() >= 4 && line.starts_with(&terminator) {
                state.lines.push(line[3..].to_string());
                let state = self.multiline.take().unwrap();
                return Ok(Some(FtpResponse {
                    code: state.code,
                    lines: state.lines,
                    is_multiline: true,
                }));
            }
            // Also accept the bare "<code> " with nothing after — still a
            // valid terminator per the grammar (`(.*)` may be empty).
            if line == state.code.to_string() {
                state.lines.push(String::new());
                let state = self.multiline.take().unwrap();
                return Ok(Some(FtpResponse {
                    code: state.code,
                    lines: state.lines,
                    is_multiline: true,
                }));
            }
            state.lines.push(line.to_string());
            return Ok(None);
        }

        if line.len() < 3 {
            return Err(FtpError::protocol_error(format!(
                "response line too short: '{}'",
                line
            )));
        }
        let code = parse_code(&line[..3])?;

        match line.as_bytes().get(3) {
            Some(b'-') => {
                self.multiline = Some(MultilineState {
                    code,
                    lines: vec![line[4..].to_string()],
                });
                Ok(None)
            }
            Some(b' ') => Ok(Some(FtpResponse {
                code,
                lines: vec![line[4..].to_string()],
                is_multiline: false,
            })),
            None => {
                // Bare "NNN" with nothing following — treat as an empty
                // single-line reply (grammar's `(.*)` may be empty).
                Ok(Some(FtpResponse {
                    code,
                    lines: vec![String::new()],
                    is_multiline: false,
                }))
            }
            _ => Err(FtpError::protocol_error(format!(
                "malformed response line: '{}'",
                line
            ))),
        }
    }
}

/// Validate and parse a 3-digit reply code against `^[1-5][0-5][0-9]$`
/// (spec §3's code invariant).
fn parse_code(digits: &str) -> FtpResult<u16> {
    let bytes = digits.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(FtpError::protocol_error(format!(
            "invalid reply code: '{}'",
            digits
        )));
    }
    if !(b'1'..=b'5').contains(&bytes[0]) || !(b'0'..=b'5').contains(&bytes[1]) {
        return Err(FtpError::protocol_error(format!(
            "reply code out of range: '{}'",
            digits
        )));
    }
    Ok(digits.parse().expect("validated 3 ascii digits"))
}

fn strip_eol(raw_line: &[u8]) -> String {
    let mut end = raw_line.len();
    if end > 0 && raw_line[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw_line[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw_line[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line() {
        let mut p = ResponseParser::new();
        let out = p.feed(b"200 OK\r\n").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, 200);
        assert_eq!(out[0].text(), "OK");
        assert!(!out[0].is_multiline);
        assert!(p.is_idle());
    }

    #[test]
    fn multiline_welcome() {
        let mut p = ResponseParser::new();
        let out = p.feed(b"220-Welcome\r\n220 Ready\r\n").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, 220);
        assert_eq!(out[0].text(), "Welcome\n Ready");
        assert!(out[0].is_multiline);
    }

    #[test]
    fn pasv_example() {
        let mut p = ResponseParser::new();
        let out = p
            .feed(b"227 Entering Passive Mode (192,168,1,100,10,229)\r\n")
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, 227);
    }

    #[test]
    fn mismatched_code_does_not_terminate_block() {
        let mut p = ResponseParser::new();
        let out = p
            .feed(b"150-Here comes\r\n226 not a match for 150's lines\r\n150 Done\r\n")
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, 150);
        assert!(out[0].text().contains("226 not a match"));
    }

    #[test]
    fn split_at_arbitrary_boundaries() {
        let full = b"220-Welcome\r\n220 Ready\r\n230 Logged in\r\n";
        for split in 0..full.len() {
            let mut p = ResponseParser::new();
            let mut out = p.feed(&full[..split]).unwrap();
            out.extend(p.feed(&full[split..]).unwrap());
            assert_eq!(out.len(), 2, "split at {split}");
            assert_eq!(out[0].code, 220);
            assert_eq!(out[1].code, 230);
            assert!(p.is_idle());
        }
    }

    #[test]
    fn invalid_code_is_protocol_error() {
        let mut p = ResponseParser::new();
        let err = p.feed(b"999 broken\r\n").unwrap_err();
        assert_eq!(err.kind, crate::error::FtpErrorKind::ProtocolError);
    }

    #[test]
    fn bare_lf_tolerated() {
        let mut p = ResponseParser::new();
        let out = p.feed(b"200 OK\n").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, 200);
    }
}
