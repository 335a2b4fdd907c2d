//! G.711 A-law audio stream (RFC 3551 §4.5.14, payload type 8).
//!
//! Frames are raw PCMA bytes with no payload sub-header. When constructed
//! with [`G711aStream::with_linear_input`], 16-bit little-endian PCM frames
//! are transcoded through [`linear_to_alaw`] before fragmentation.

use super::{MediaStream, RTP_PT_PCMA, send_fragments};
use crate::error::Result;
use crate::rtp::RtpSession;

/// A-law segment end points for the 13-bit magnitude search.
const SEG_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

/// Encode one 16-bit linear PCM sample as A-law (G.711).
///
/// The sample is shifted to the 13-bit A-law range, the segment located,
/// and sign/magnitude bits XOR-masked per the even-bit-inversion rule.
pub fn linear_to_alaw(pcm: i16) -> u8 {
    let mut val = i32::from(pcm) >> 3;
    let mask: i32 = if val >= 0 {
        0xD5
    } else {
        val = -val - 1;
        0x55
    };

    match SEG_END.iter().position(|&end| val <= end) {
        None => (0x7F ^ mask) as u8,
        Some(seg) => {
            let mut aval = (seg as i32) << 4;
            aval |= if seg < 2 {
                (val >> 1) & 0xF
            } else {
                (val >> seg) & 0xF
            };
            (aval ^ mask) as u8
        }
    }
}

/// G.711 A-law audio stream.
#[derive(Debug, Default)]
pub struct G711aStream {
    transcode: bool,
}

impl G711aStream {
    /// Stream fed with already-encoded A-law frames.
    pub fn new() -> Self {
        Self { transcode: false }
    }

    /// Stream fed with 16-bit little-endian linear PCM, transcoded here.
    pub fn with_linear_input() -> Self {
        Self { transcode: true }
    }
}

impl MediaStream for G711aStream {
    fn media_description(&self, port: u16) -> String {
        format!("m=audio {port} RTP/AVP {RTP_PT_PCMA}")
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![format!("a=rtpmap:{RTP_PT_PCMA} PCMA/8000/1")]
    }

    fn payload_type(&self) -> u8 {
        RTP_PT_PCMA
    }

    fn clock_rate(&self) -> u32 {
        8000
    }

    fn handle_frame(&mut self, rtp: &mut RtpSession, data: &[u8]) -> Result<()> {
        if self.transcode {
            let encoded: Vec<u8> = data
                .chunks_exact(2)
                .map(|pair| linear_to_alaw(i16::from_le_bytes([pair[0], pair[1]])))
                .collect();
            send_fragments(rtp, &encoded, |_| Vec::new())
        } else {
            send_fragments(rtp, data, |_| Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::test_support::{capture_session, drain};

    #[test]
    fn alaw_known_values() {
        assert_eq!(linear_to_alaw(0), 0xD5);
        assert_eq!(linear_to_alaw(-1), 0x55);
        assert_eq!(linear_to_alaw(i16::MAX), 0xAA); // 0x7F ^ 0xD5
        assert_eq!(linear_to_alaw(i16::MIN), 0x2A); // 0x7F ^ 0x55
    }

    #[test]
    fn alaw_is_monotone_in_magnitude_bands() {
        // larger positive samples never land in a smaller segment
        let mut prev_seg = 0;
        for sample in [10i16, 100, 500, 2000, 8000, 30000] {
            let seg = (linear_to_alaw(sample) ^ 0xD5) >> 4;
            assert!(seg >= prev_seg);
            prev_seg = seg;
        }
    }

    #[test]
    fn raw_frame_sent_unmodified() {
        let (mut session, receiver) = capture_session(RTP_PT_PCMA, 8000);
        let frame = [0x12u8, 0x34, 0x56];
        let mut stream = G711aStream::new();
        session.begin_frame();
        stream.handle_frame(&mut session, &frame).unwrap();

        let packets = drain(&receiver, 1);
        assert_eq!(packets[0].1, frame);
        assert_eq!(packets[0].0.payload_type, RTP_PT_PCMA);
    }

    #[test]
    fn linear_input_is_transcoded() {
        let (mut session, receiver) = capture_session(RTP_PT_PCMA, 8000);
        let samples: [i16; 2] = [0, -1];
        let mut frame = Vec::new();
        for s in samples {
            frame.extend_from_slice(&s.to_le_bytes());
        }

        let mut stream = G711aStream::with_linear_input();
        session.begin_frame();
        stream.handle_frame(&mut session, &frame).unwrap();

        let packets = drain(&receiver, 1);
        assert_eq!(packets[0].1, vec![0xD5, 0x55]);
    }
}
