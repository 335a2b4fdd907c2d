//! MJPEG RTP packetizer (RFC 2435).
//!
//! Every fragment starts with the fixed 8-byte JPEG payload header:
//!
//! ```text
//! | type-specific(8) | fragment offset(24) | type(8) | Q(8) | width/8(8) | height/8(8) |
//! ```
//!
//! When both quantization tables are located in the frame, Q is 128 and the
//! first fragment additionally carries the quantization-table header
//! (mbz, precision, length) plus the two 64-byte tables. Frames whose tables
//! cannot be located fall back to Q=0x5e and omit the table header — a
//! degraded-but-functional path, not a failure.

use super::{MediaStream, RTP_PT_JPEG, send_fragments};
use crate::error::Result;
use crate::rtp::RtpSession;

/// JPEG marker second bytes (`0xFF` prefix implied).
const MARKER_DQT: u8 = 0xDB;
const MARKER_SOF0: u8 = 0xC0;

/// Q value signalling in-band quantization tables (RFC 2435 §4.2).
const Q_WITH_TABLES: u8 = 128;
/// Default Q when the frame's tables cannot be located.
const Q_DEFAULT: u8 = 0x5e;
/// Each quantization table is 64 bytes at 8-bit precision.
const QTABLE_LEN: usize = 64;

/// What the pre-packetization scan of a JPEG byte stream found.
#[derive(Debug, PartialEq, Eq)]
struct JpegScan {
    /// Byte offsets of the two 64-byte quantization tables.
    qtables: Option<(usize, usize)>,
    width: u16,
    height: u16,
}

/// Find the next `FF xx` marker at or after `from`.
fn find_marker(data: &[u8], from: usize, second: u8) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == second)
        .map(|p| from + p)
}

/// Locate the quantization tables and the SOF0 dimensions.
///
/// Layout per marker: `FF DB len(16) precision/id(8) table(64)`, so table
/// bytes start 5 bytes past the marker. `FF C0` carries height at +5 and
/// width at +7 (RFC 2435 expresses both in 8-pixel blocks on the wire).
fn scan_jpeg(data: &[u8]) -> Option<JpegScan> {
    let first = find_marker(data, 0, MARKER_DQT)?;
    if first + 5 + QTABLE_LEN > data.len() {
        return None;
    }
    let second = find_marker(data, first + 4, MARKER_DQT)?;
    if second + 5 + QTABLE_LEN > data.len() {
        return None;
    }

    let sof = find_marker(data, second + 4, MARKER_SOF0)?;
    if sof + 9 > data.len() {
        return None;
    }
    let height = u16::from_be_bytes([data[sof + 5], data[sof + 6]]);
    let width = u16::from_be_bytes([data[sof + 7], data[sof + 8]]);

    Some(JpegScan {
        qtables: Some((first + 5, second + 5)),
        width,
        height,
    })
}

/// MJPEG video stream (payload type 26, 90 kHz clock).
#[derive(Debug, Default)]
pub struct MjpegStream;

impl MjpegStream {
    pub fn new() -> Self {
        Self
    }
}

impl MediaStream for MjpegStream {
    fn media_description(&self, port: u16) -> String {
        format!("m=video {port} RTP/AVP {RTP_PT_JPEG}")
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![format!("a=rtpmap:{RTP_PT_JPEG} JPEG/90000")]
    }

    fn payload_type(&self) -> u8 {
        RTP_PT_JPEG
    }

    fn clock_rate(&self) -> u32 {
        90000
    }

    fn handle_frame(&mut self, rtp: &mut RtpSession, data: &[u8]) -> Result<()> {
        let scan = scan_jpeg(data);
        if scan.is_none() {
            tracing::warn!(
                frame_bytes = data.len(),
                "quantization tables not found, sending with default Q"
            );
        }
        let (qtables, width, height) = match &scan {
            Some(s) => (s.qtables, s.width, s.height),
            None => (None, 0, 0),
        };
        let q = if qtables.is_some() { Q_WITH_TABLES } else { Q_DEFAULT };

        send_fragments(rtp, data, |offset| {
            let mut header = Vec::with_capacity(8 + 4 + 2 * QTABLE_LEN);
            header.push(0); // type-specific
            header.push((offset >> 16) as u8);
            header.push((offset >> 8) as u8);
            header.push(offset as u8);
            header.push(0); // type 0: baseline, 4:2:2
            header.push(q);
            header.push((width / 8) as u8);
            header.push((height / 8) as u8);

            // quantization-table header rides only on the frame's first packet
            if offset == 0 {
                if let Some((t0, t1)) = qtables {
                    header.push(0); // mbz
                    header.push(0); // 8-bit precision
                    header.extend_from_slice(&((2 * QTABLE_LEN) as u16).to_be_bytes());
                    header.extend_from_slice(&data[t0..t0 + QTABLE_LEN]);
                    header.extend_from_slice(&data[t1..t1 + QTABLE_LEN]);
                }
            }
            header
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::test_support::{capture_session, drain};

    /// Minimal JPEG-ish byte stream: two DQT segments and an SOF0.
    fn synthetic_jpeg(width: u16, height: u16, scan_bytes: usize) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8]; // SOI
        for id in 0..2u8 {
            data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, id]);
            data.extend_from_slice(&[id + 1; QTABLE_LEN]);
        }
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&[0xFF, 0xDA]); // SOS
        data.extend(std::iter::repeat(0xA5).take(scan_bytes));
        data.extend_from_slice(&[0xFF, 0xD9]); // EOI
        data
    }

    #[test]
    fn scan_finds_tables_and_dimensions() {
        let frame = synthetic_jpeg(640, 480, 100);
        let scan = scan_jpeg(&frame).unwrap();
        assert_eq!(scan.width, 640);
        assert_eq!(scan.height, 480);
        let (t0, t1) = scan.qtables.unwrap();
        assert_eq!(frame[t0], 1);
        assert_eq!(frame[t1], 2);
    }

    #[test]
    fn scan_fails_without_tables() {
        assert!(scan_jpeg(&[0u8; 256]).is_none());
        // one DQT is not enough
        let mut frame = vec![0xFF, 0xDB, 0x00, 0x43, 0x00];
        frame.extend_from_slice(&[0x01; QTABLE_LEN]);
        assert!(scan_jpeg(&frame).is_none());
    }

    #[test]
    fn first_fragment_carries_quant_tables() {
        let (mut session, receiver) = capture_session(RTP_PT_JPEG, 90000);
        let frame = synthetic_jpeg(320, 240, 64);

        let mut stream = MjpegStream::new();
        session.begin_frame();
        stream.handle_frame(&mut session, &frame).unwrap();

        let packets = drain(&receiver, 1);
        let payload = &packets[0].1;
        // 8-byte JPEG header
        assert_eq!(payload[0], 0); // type-specific
        assert_eq!(&payload[1..4], &[0, 0, 0]); // offset 0
        assert_eq!(payload[5], Q_WITH_TABLES);
        assert_eq!(payload[6], (320 / 8) as u8);
        assert_eq!(payload[7], 240 / 8);
        // quant header: mbz, precision, length=128
        assert_eq!(&payload[8..12], &[0, 0, 0x00, 0x80]);
        assert_eq!(&payload[12..12 + QTABLE_LEN], &[1u8; QTABLE_LEN][..]);
        assert_eq!(
            &payload[12 + QTABLE_LEN..12 + 2 * QTABLE_LEN],
            &[2u8; QTABLE_LEN][..]
        );
        assert!(packets[0].0.marker);
    }

    #[test]
    fn tableless_frame_uses_default_q() {
        let (mut session, receiver) = capture_session(RTP_PT_JPEG, 90000);
        let frame = vec![0x42u8; 500]; // no JPEG markers at all

        let mut stream = MjpegStream::new();
        session.begin_frame();
        stream.handle_frame(&mut session, &frame).unwrap();

        let packets = drain(&receiver, 1);
        let payload = &packets[0].1;
        assert_eq!(payload[5], Q_DEFAULT);
        assert_eq!(payload[6], 0);
        assert_eq!(payload[7], 0);
        assert_eq!(payload.len(), 8 + 500); // no quant header
    }

    #[test]
    fn ten_kilobyte_frame_yields_eight_fragments() {
        // 1420 − 12 RTP − 4 framing − 8 JPEG header = 1396 media bytes per
        // fragment: ceil(10000 / 1396) = 8 fragments.
        let (mut session, receiver) = capture_session(RTP_PT_JPEG, 90000);
        let frame = vec![0x42u8; 10_000]; // tableless, so all headers are 8 bytes

        let mut stream = MjpegStream::new();
        session.begin_frame();
        stream.handle_frame(&mut session, &frame).unwrap();

        let packets = drain(&receiver, 8);
        assert!(packets.iter().take(7).all(|(h, _)| !h.marker));
        assert!(packets[7].0.marker, "marker only on the final fragment");

        // fragment offsets advance by the media bytes of each fragment
        let offsets: Vec<u32> = packets
            .iter()
            .map(|(_, p)| (u32::from(p[1]) << 16) | (u32::from(p[2]) << 8) | u32::from(p[3]))
            .collect();
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], 1396);
        assert_eq!(offsets[7], 7 * 1396);

        let media_total: usize = packets.iter().map(|(_, p)| p.len() - 8).sum();
        assert_eq!(media_total, 10_000);
    }
}
