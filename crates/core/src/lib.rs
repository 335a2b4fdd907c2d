//! Embedded-style RTSP session control (RFC 2326) with RTP/RTCP media
//! delivery (RFC 3550/3551) for a single peer connection.
//!
//! Serves or pushes MJPEG video and G.711a/L16 audio over UDP,
//! TCP-interleaved, or multicast transport.

pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod rtcp;
pub mod rtp;
pub mod server;
pub mod session;

pub use client::RtspClient;
pub use error::{Result, RtspError};
pub use media::{G711aStream, L16Stream, MediaStream, MjpegStream};
pub use rtp::TransportMode;
pub use server::{RtspServer, ServerConfig};
