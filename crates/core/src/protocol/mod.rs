//! RTSP protocol implementation (RFC 2326).
//!
//! Text-based signaling: request parsing, response building, method
//! dispatch, status codes, and SDP generation.
//!
//! ## Message format (RFC 2326 §4)
//!
//! ```text
//! DESCRIBE rtsp://device/live RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! RTSP is stateful HTTP-lookalike signaling: the `Session` header carries a
//! server-assigned id across requests, and transport for the media itself is
//! negotiated per track via SETUP. A datagram beginning with `$` on the same
//! socket is interleaved RTP/RTCP, not an RTSP message.
//!
//! | Method | RFC 2326 | Purpose |
//! |--------|----------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP description |
//! | ANNOUNCE | §10.3 | Push an SDP description (client push) |
//! | SETUP | §10.4 | Negotiate transport per track |
//! | PLAY / RECORD | §10.5, §10.11 | Start delivery / start recording |
//! | PAUSE | §10.6 | Suspend delivery |
//! | TEARDOWN | §10.7 | Destroy the session |
//! | GET_PARAMETER / SET_PARAMETER | §10.8, §10.9 | Keepalive / tweaks |

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;
pub mod status;

pub use handler::MethodHandler;
pub use request::{RtspMethod, RtspRequest, RtspUrl};
pub use response::{ResponseMessage, RtspResponse};
