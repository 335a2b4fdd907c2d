//! RTSP responses: building/serializing on the server side, parsing on the
//! client side (RFC 2326 §7).

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::status::reason_phrase;

/// User agent advertised by the push client.
pub const USER_AGENT: &str = "rtcam/0.1";

/// An outbound RTSP response.
///
/// Builder-style: chain [`add_header`](Self::add_header) /
/// [`with_body`](Self::with_body), then [`serialize`](Self::serialize).
/// `Content-Length` is appended automatically when a body is present.
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: Vec::new(),
            body: None,
        }
    }

    /// 200 OK (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Append the `Date:` header (RFC 2326 §12.18), formatted the way the
    /// C heritage did: `Date: Tue, Aug 06 2026 12:00:00 GMT`.
    pub fn with_date(self) -> Self {
        let now = chrono::Utc::now().format("%a, %b %d %Y %H:%M:%S GMT");
        self.add_header("Date", &now.to_string())
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut out = format!(
            "RTSP/1.0 {} {}\r\n",
            self.status_code,
            reason_phrase(self.status_code)
        );
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some(body) = &self.body {
            out.push_str(&format!("Content-Length: {}\r\n", body.len()));
            out.push_str("\r\n");
            out.push_str(body);
        } else {
            out.push_str("\r\n");
        }
        out
    }
}

/// A parsed inbound response (client push side).
#[derive(Debug)]
pub struct ResponseMessage {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseMessage {
    /// Parse status line plus headers. The body, if any, is the caller's to
    /// drain via `Content-Length`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();
        let status_line = lines.next().filter(|l| !l.is_empty()).ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let mut parts = status_line.split_whitespace();
        let version = parts.next().unwrap_or("");
        let code = parts.next().and_then(|c| c.parse::<u16>().ok());
        let status_code = match code {
            Some(code) if version.starts_with("RTSP/") => code,
            _ => {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::InvalidStatusLine,
                });
            }
        };
        if version != "RTSP/1.0" {
            tracing::warn!(version, "unexpected RTSP version in response");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }

        Ok(Self {
            status_code,
            headers,
        })
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.parse().ok())
    }

    /// `Session` header value with any `;timeout=` suffix stripped.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_no_body() {
        let s = RtspResponse::ok()
            .add_header("CSeq", "1")
            .add_header("Public", "DESCRIBE, SETUP, TEARDOWN, PLAY, PAUSE")
            .serialize();
        assert_eq!(
            s,
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: DESCRIBE, SETUP, TEARDOWN, PLAY, PAUSE\r\n\r\n"
        );
    }

    #[test]
    fn serialize_with_body() {
        let s = RtspResponse::ok()
            .add_header("CSeq", "2")
            .add_header("Content-Type", "application/sdp")
            .with_body("v=0\r\n".to_string())
            .serialize();
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nv=0\r\n"));
    }

    #[test]
    fn reason_phrase_from_table() {
        let s = RtspResponse::new(455).serialize();
        assert!(s.starts_with("RTSP/1.0 455 Method Not Valid in This State\r\n"));
    }

    #[test]
    fn date_header_present() {
        let s = RtspResponse::ok().with_date().serialize();
        assert!(s.contains("Date: "));
        assert!(s.contains("GMT\r\n"));
    }

    #[test]
    fn parse_response() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: 4F2A10BC;timeout=60\r\n\r\n";
        let resp = ResponseMessage::parse(raw).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.cseq(), Some(3));
        assert_eq!(resp.session_id(), Some("4F2A10BC"));
    }

    #[test]
    fn parse_rejects_garbage_status_line() {
        assert!(ResponseMessage::parse("HTTP/1.1 200 OK\r\n\r\n").is_err());
        assert!(ResponseMessage::parse("RTSP/1.0 abc OK\r\n\r\n").is_err());
        assert!(ResponseMessage::parse("").is_err());
    }
}
