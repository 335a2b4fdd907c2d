//! Uncompressed 16-bit linear PCM audio (RFC 3551 §4.5.11, payload type 11).
//!
//! Single channel; the RTP clock runs at the sample rate. Frames are raw
//! sample bytes with no payload sub-header.

use super::{MediaStream, RTP_PT_L16_CH1, send_fragments};
use crate::error::Result;
use crate::rtp::RtpSession;

/// Mono L16 audio stream at a configurable sample rate.
#[derive(Debug)]
pub struct L16Stream {
    sample_rate: u32,
}

impl L16Stream {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl MediaStream for L16Stream {
    fn media_description(&self, port: u16) -> String {
        format!("m=audio {port} RTP/AVP {RTP_PT_L16_CH1}")
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!("a=rtpmap:{RTP_PT_L16_CH1} L16/{}/1", self.sample_rate),
            "a=framerate:100".to_string(),
        ]
    }

    fn payload_type(&self) -> u8 {
        RTP_PT_L16_CH1
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn handle_frame(&mut self, rtp: &mut RtpSession, data: &[u8]) -> Result<()> {
        send_fragments(rtp, data, |_| Vec::new())
    }
}
