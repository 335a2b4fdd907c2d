//! Media stream adapters: codec-specific RTP packetization.
//!
//! Each payload type implements [`MediaStream`], contributing its SDP lines
//! and a per-frame packetizer. Fragmentation itself is one shared routine,
//! [`send_fragments`], parameterized by a per-variant sub-header builder —
//! MJPEG prepends the RFC 2435 header, the PCM variants prepend nothing.
//!
//! | Codec | Payload type | Clock | RFC |
//! |-------|-------------|-------|-----|
//! | MJPEG | 26 | 90000 | [RFC 2435](https://tools.ietf.org/html/rfc2435) |
//! | G.711a | 8 | 8000 | RFC 3551 §4.5.14 |
//! | L16 | 11 | sample rate | RFC 3551 §4.5.11 |

pub mod g711a;
pub mod l16;
pub mod mjpeg;

pub use g711a::G711aStream;
pub use l16::L16Stream;
pub use mjpeg::MjpegStream;

use crate::error::Result;
use crate::rtp::RtpSession;

/// Static payload types used here (RFC 3551 tables 4 and 5).
pub const RTP_PT_PCMA: u8 = 8;
pub const RTP_PT_L16_CH1: u8 = 11;
pub const RTP_PT_JPEG: u8 = 26;

/// Codec-specific packetizer behind each track.
///
/// The RTSP layer uses the SDP accessors for DESCRIBE/ANNOUNCE; the media
/// push path hands complete frames to [`handle_frame`](Self::handle_frame),
/// which fragments them into the track's [`RtpSession`].
pub trait MediaStream: Send {
    /// SDP `m=` line for this stream (port 0 for RTSP-negotiated transport).
    fn media_description(&self, port: u16) -> String;

    /// SDP `a=` attribute lines (`a=rtpmap:...` and friends).
    fn sdp_attributes(&self) -> Vec<String>;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// Packetize one complete frame into the session.
    ///
    /// The caller has already advanced the session's media clock for this
    /// frame; every fragment carries the same timestamp.
    fn handle_frame(&mut self, rtp: &mut RtpSession, data: &[u8]) -> Result<()>;
}

/// Split one frame into RTP packets, at most
/// `MAX_RTP_PAYLOAD_SIZE − RTP header − interleave framing − sub-header`
/// media bytes each.
///
/// `sub_header` is invoked with the fragment's byte offset into the frame
/// and returns the payload-type-specific prefix for that fragment. The
/// marker bit is set only on the packet carrying the final byte; remaining
/// length strictly decreases every iteration, so the loop terminates.
pub(crate) fn send_fragments(
    rtp: &mut RtpSession,
    payload: &[u8],
    mut sub_header: impl FnMut(usize) -> Vec<u8>,
) -> Result<()> {
    let mut offset = 0usize;
    loop {
        let header = sub_header(offset);
        let max_media = rtp.max_fragment_payload().saturating_sub(header.len());
        let remaining = payload.len() - offset;
        let take = remaining.min(max_media);
        let is_last = offset + take == payload.len();

        let mut packet = Vec::with_capacity(header.len() + take);
        packet.extend_from_slice(&header);
        packet.extend_from_slice(&payload[offset..offset + take]);
        rtp.send_packet(&packet, is_last)?;

        offset += take;
        if is_last {
            return Ok(());
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::{IpAddr, Ipv4Addr, UdpSocket};
    use std::time::Duration;

    use crate::rtp::packet::RtpHeader;
    use crate::rtp::{RtpSession, RtpSessionConfig, TransportMode};

    /// A UDP-mode session pointed at a local capture socket.
    pub fn capture_session(payload_type: u8, clock_rate: u32) -> (RtpSession, UdpSocket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind capture socket");
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set timeout");
        let session = RtpSession::new(RtpSessionConfig {
            mode: TransportMode::Udp,
            peer_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            peer_rtp_port: receiver.local_addr().expect("local addr").port(),
            tcp: None,
            rtp_channel: 0,
            payload_type,
            clock_rate,
            bandwidth: 1000,
            cname: "test@local".into(),
        })
        .expect("create session");
        (session, receiver)
    }

    /// Receive `count` packets and return (header, payload) pairs.
    pub fn drain(receiver: &UdpSocket, count: usize) -> Vec<(RtpHeader, Vec<u8>)> {
        let mut packets = Vec::with_capacity(count);
        let mut buf = [0u8; 2048];
        for _ in 0..count {
            let (len, _) = receiver.recv_from(&mut buf).expect("receive fragment");
            let header = RtpHeader::parse(&buf[..len]).expect("parse header");
            packets.push((header, buf[12..len].to_vec()));
        }
        packets
    }
}
