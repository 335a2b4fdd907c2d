//! Error types for the RTSP/RTP stack.

use std::fmt;

/// Errors that can occur across the stack.
///
/// Variants map to specific failure modes:
///
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Transport**: [`Io`](Self::Io), [`PortRangeExhausted`](Self::PortRangeExhausted),
///   [`PeerClosed`](Self::PeerClosed).
/// - **Session**: [`TrackNotFound`](Self::TrackNotFound),
///   [`TransportNotConfigured`](Self::TransportNotConfigured).
/// - **Client push**: [`UnexpectedStatus`](Self::UnexpectedStatus).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The 6970–6999 UDP probe range had no free RTP/RTCP port pair.
    #[error("no free UDP port pair in 6970-6999")]
    PortRangeExhausted,

    /// No track with the given id is registered on this session.
    #[error("track not found: {0}")]
    TrackNotFound(usize),

    /// SETUP has not completed for this track (no RTP session bound).
    #[error("transport not configured for track {0}")]
    TransportNotConfigured(usize),

    /// The peer closed the RTSP TCP connection (zero-byte read).
    #[error("peer closed connection")]
    PeerClosed,

    /// A push-sequence step received a non-200 response.
    #[error("{method} rejected with status {code}")]
    UnexpectedStatus { method: &'static str, code: u16 },

    /// The RTSP URL did not match `rtsp://host[:port]/path`.
    #[error("invalid RTSP url: {0}")]
    InvalidUrl(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request or status line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// A `Transport` header could not be resolved to a transport mode.
    InvalidTransport,
    /// The method token is not an RTSP method; the request is not dispatched.
    UnknownMethod,
    /// The buffer starts with `$`: interleaved binary data, not RTSP text.
    InterleavedData,
    /// An RTCP packet was shorter than its header-declared length.
    TruncatedRtcp,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidTransport => write!(f, "invalid transport header"),
            Self::UnknownMethod => write!(f, "unknown method"),
            Self::InterleavedData => write!(f, "interleaved data, not an RTSP message"),
            Self::TruncatedRtcp => write!(f, "truncated RTCP packet"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
