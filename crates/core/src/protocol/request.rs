//! RTSP request parsing (RFC 2326 §6).

use crate::error::{ParseErrorKind, Result, RtspError};

/// Default RTSP port when the URL carries none.
pub const RTSP_DEFAULT_PORT: u16 = 554;

/// RTSP methods (RFC 2326 §10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspMethod {
    Options,
    Describe,
    Setup,
    Play,
    Record,
    Pause,
    Announce,
    Teardown,
    GetParameter,
    SetParameter,
}

impl RtspMethod {
    pub const ALL: [RtspMethod; 10] = [
        Self::Options,
        Self::Describe,
        Self::Setup,
        Self::Play,
        Self::Record,
        Self::Pause,
        Self::Announce,
        Self::Teardown,
        Self::GetParameter,
        Self::SetParameter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Record => "RECORD",
            Self::Pause => "PAUSE",
            Self::Announce => "ANNOUNCE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::SetParameter => "SET_PARAMETER",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == token)
    }
}

/// Decomposed `rtsp://host[:port]/suffix` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspUrl {
    pub host: String,
    pub port: u16,
    /// Path after the first `/`, without the leading slash. May end in a
    /// `/trackID=<n>` control segment.
    pub suffix: String,
}

impl RtspUrl {
    /// Parse an RTSP URL. The port defaults to 554; a trailing `/` on the
    /// suffix is dropped.
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("rtsp://")
            .ok_or_else(|| RtspError::InvalidUrl(url.to_string()))?;
        let (host_port, suffix) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash + 1..]),
            None => (rest, ""),
        };
        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .map_err(|_| RtspError::InvalidUrl(url.to_string()))?,
            ),
            None => (host_port, RTSP_DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(RtspError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            suffix: suffix.trim_end_matches('/').to_string(),
        })
    }

    /// The suffix with any `/trackID=<n>` control segment removed.
    pub fn resource_path(&self) -> &str {
        match self.suffix.rfind("/trackID=") {
            Some(pos) => &self.suffix[..pos],
            None => match self.suffix.strip_prefix("trackID=") {
                Some(_) => "",
                None => &self.suffix,
            },
        }
    }

    /// The track id named by a `trackID=<n>` control segment, if any.
    pub fn track_id(&self) -> Option<usize> {
        let pos = self.suffix.rfind("trackID=")?;
        self.suffix[pos + "trackID=".len()..].parse().ok()
    }
}

/// A parsed RTSP request.
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. A malformed request
/// line fails the parse without touching any session state; the dispatcher
/// records CSeq 0 in that case.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: RtspMethod,
    pub uri: String,
    pub url: RtspUrl,
    pub version: String,
    pub cseq: u32,
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.starts_with('$') {
            // interleaved RTP/RTCP record sharing the RTSP socket
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InterleavedData,
            });
        }
        let mut lines = raw.lines();
        let request_line = lines.next().filter(|l| !l.is_empty()).ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = RtspMethod::from_token(parts[0]).ok_or(RtspError::Parse {
            kind: ParseErrorKind::UnknownMethod,
        })?;
        let uri = parts[1].to_string();
        let url = RtspUrl::parse(&uri)?;
        let version = parts[2].to_string();
        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
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

        let cseq = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("CSeq"))
            .and_then(|(_, value)| value.parse().ok())
            .unwrap_or(0);

        Ok(Self {
            method,
            uri,
            url,
            version,
            cseq,
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive, RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://192.168.1.5:8554/live RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, RtspMethod::Options);
        assert_eq!(req.cseq, 1);
        assert_eq!(req.url.host, "192.168.1.5");
        assert_eq!(req.url.port, 8554);
        assert_eq!(req.url.suffix, "live");
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://host/live/trackID=1 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, RtspMethod::Setup);
        assert_eq!(req.url.port, 554); // defaulted
        assert_eq!(req.url.track_id(), Some(1));
        assert_eq!(req.url.resource_path(), "live");
        assert_eq!(
            req.get_header("transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn three_token_rule() {
        assert!(matches!(
            RtspRequest::parse("PLAY rtsp://host/live\r\n\r\n"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine
            })
        ));
        assert!(RtspRequest::parse("").is_err());
    }

    #[test]
    fn unknown_method_not_dispatched() {
        assert!(matches!(
            RtspRequest::parse("BREW rtsp://host/live RTSP/1.0\r\n\r\n"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::UnknownMethod
            })
        ));
    }

    #[test]
    fn interleaved_magic_is_not_text() {
        assert!(matches!(
            RtspRequest::parse("$\x00\x00\x04abcd"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InterleavedData
            })
        ));
    }

    #[test]
    fn missing_cseq_records_zero() {
        let req = RtspRequest::parse("OPTIONS rtsp://host/live RTSP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.cseq, 0);
    }

    #[test]
    fn url_requires_scheme_and_host() {
        assert!(RtspUrl::parse("http://host/live").is_err());
        assert!(RtspUrl::parse("rtsp:///live").is_err());
        assert!(RtspUrl::parse("rtsp://host:notaport/live").is_err());
    }

    #[test]
    fn url_trailing_slash_dropped() {
        let url = RtspUrl::parse("rtsp://host/live/").unwrap();
        assert_eq!(url.suffix, "live");
    }
}
