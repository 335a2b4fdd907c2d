//! RTP transport layer (RFC 3550).
//!
//! [`session::RtpSession`] owns the per-track transport state: mode, bound
//! port pair (or interleaved channel pair), sequence counter, SSRC, and the
//! media timestamp clock. [`packet::RtpHeader`] handles wire encoding.

use std::net::Ipv4Addr;

pub mod packet;
pub mod session;

pub use packet::RtpHeader;
pub use session::{RtpSession, RtpSessionConfig, SharedTcpStream};

/// Size of the fixed RTP header (RFC 3550 §5.1).
pub const RTP_HEADER_SIZE: usize = 12;
/// Largest RTP packet we emit: 1500 MTU − 20 IP − 12 RTP − 8 UDP headroom.
pub const MAX_RTP_PAYLOAD_SIZE: usize = 1420;
/// Interleaved framing: `$`, channel id, 16-bit big-endian length.
pub const RTP_TCP_HEAD_SIZE: usize = 4;
/// Fixed multicast group used when no peer address is negotiated.
pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 11);

/// How RTP/RTCP packets reach the peer (RFC 2326 §12.39).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Dedicated UDP socket pair bound from the 6970–6999 probe range.
    Udp,
    /// 4-byte `$`-framed records multiplexed onto the RTSP TCP connection.
    TcpInterleaved,
    /// UDP to the fixed group address, no peer lookup.
    Multicast,
}

/// Milliseconds since the Unix epoch, truncated to the 32-bit tick width
/// used by the media clock (wraps every ~49.7 days).
pub(crate) fn now_ms() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// Media timestamp clock shared by all payload types.
///
/// The first frame only records the wall-clock baseline. Every later frame
/// advances the RTP timestamp by `clock_rate * delta_ms / 1000`, exactly once
/// per frame regardless of how many fragments the frame produces. When the
/// 32-bit millisecond tick wraps, a flat 100 ms is substituted for the delta.
#[derive(Debug)]
pub struct MediaClock {
    clock_rate: u32,
    timestamp: u32,
    prev_ms: Option<u32>,
}

impl MediaClock {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate,
            timestamp: 0,
            prev_ms: None,
        }
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Current RTP timestamp (the value the next packet will carry).
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Advance for a new frame arriving at `now_ms` and return its timestamp.
    pub fn tick(&mut self, now_ms: u32) -> u32 {
        match self.prev_ms {
            None => {
                self.prev_ms = Some(now_ms);
            }
            Some(prev) => {
                let delta_ms = if now_ms >= prev { now_ms - prev } else { 100 };
                let step = (u64::from(self.clock_rate) * u64::from(delta_ms) / 1000) as u32;
                self.timestamp = self.timestamp.wrapping_add(step);
                self.prev_ms = Some(now_ms);
            }
        }
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_keeps_baseline() {
        let mut clock = MediaClock::new(90000);
        assert_eq!(clock.tick(1000), 0);
        assert_eq!(clock.timestamp(), 0);
    }

    #[test]
    fn advances_by_clock_rate_times_delta() {
        let mut clock = MediaClock::new(90000);
        clock.tick(1000);
        assert_eq!(clock.tick(1040), 3600); // 90000 * 40 / 1000
        assert_eq!(clock.tick(1080), 7200);
    }

    #[test]
    fn rollover_substitutes_100ms() {
        let mut clock = MediaClock::new(8000);
        clock.tick(u32::MAX - 5);
        assert_eq!(clock.tick(10), 800); // 8000 * 100 / 1000
    }

    #[test]
    fn timestamp_non_decreasing() {
        let mut clock = MediaClock::new(8000);
        let mut prev = clock.tick(0);
        for t in [20u32, 40, 40, 65, 100] {
            let ts = clock.tick(t);
            assert!(ts >= prev);
            prev = ts;
        }
    }
}
