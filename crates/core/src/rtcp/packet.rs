//! RTCP packet wire format (RFC 3550 §6.4).
//!
//! Pack/unpack for the compound-packet building blocks: the common header,
//! reception report blocks, SR sender info, SDES CNAME chunks, and BYE.
//! All fields are written with explicit big-endian byte writes.

use crate::error::{ParseErrorKind, Result, RtspError};

/// RTCP packet types (RFC 3550 §12.1).
pub const RTCP_SR: u8 = 200;
pub const RTCP_RR: u8 = 201;
pub const RTCP_SDES: u8 = 202;
pub const RTCP_BYE: u8 = 203;
pub const RTCP_APP: u8 = 204;

/// SDES item type for CNAME (RFC 3550 §6.5.1).
const SDES_CNAME: u8 = 1;

/// Seconds between the NTP era (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Common RTCP header: version(2) | padding(1) | count(5), packet type,
/// and length in 32-bit words minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    pub count: u8,
    pub packet_type: u8,
    pub length_words: u16,
}

impl RtcpHeader {
    /// Total packet size in bytes, header included.
    pub fn packet_len(&self) -> usize {
        (usize::from(self.length_words) + 1) * 4
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push((2 << 6) | (self.count & 0x1f));
        out.push(self.packet_type);
        out.extend_from_slice(&self.length_words.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 || buf[0] >> 6 != 2 {
            return None;
        }
        Some(Self {
            count: buf[0] & 0x1f,
            packet_type: buf[1],
            length_words: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }
}

/// Reception report block (RFC 3550 §6.4.1), 24 bytes on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportBlock {
    /// SSRC of the source this block reports on.
    pub ssrc: u32,
    /// Fraction of packets lost since the previous report, as a fixed-point
    /// value with the binary point at the left edge.
    pub fraction_lost: u8,
    /// Cumulative number of packets lost (24-bit field).
    pub cumulative_lost: u32,
    /// Extended highest sequence number received.
    pub ext_highest_seq: u32,
    /// Interarrival jitter estimate in timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the last SR's NTP timestamp.
    pub last_sr: u32,
    /// Delay since that SR, in 1/65536 seconds.
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    pub const WIRE_SIZE: usize = 24;

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.push(self.fraction_lost);
        out.push((self.cumulative_lost >> 16) as u8);
        out.push((self.cumulative_lost >> 8) as u8);
        out.push(self.cumulative_lost as u8);
        out.extend_from_slice(&self.ext_highest_seq.to_be_bytes());
        out.extend_from_slice(&self.jitter.to_be_bytes());
        out.extend_from_slice(&self.last_sr.to_be_bytes());
        out.extend_from_slice(&self.delay_since_last_sr.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            ssrc: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            fraction_lost: buf[4],
            cumulative_lost: (u32::from(buf[5]) << 16) | (u32::from(buf[6]) << 8) | u32::from(buf[7]),
            ext_highest_seq: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            jitter: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            last_sr: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
            delay_since_last_sr: u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]),
        })
    }
}

/// SR sender info (RFC 3550 §6.4.1), 20 bytes on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderInfo {
    pub ntp_sec: u32,
    pub ntp_frac: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderInfo {
    pub const WIRE_SIZE: usize = 20;

    /// Sender info stamped with the current NTP wall clock.
    pub fn now(rtp_timestamp: u32, packet_count: u32, octet_count: u32) -> Self {
        let (ntp_sec, ntp_frac) = ntp_now();
        Self {
            ntp_sec,
            ntp_frac,
            rtp_timestamp,
            packet_count,
            octet_count,
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ntp_sec.to_be_bytes());
        out.extend_from_slice(&self.ntp_frac.to_be_bytes());
        out.extend_from_slice(&self.rtp_timestamp.to_be_bytes());
        out.extend_from_slice(&self.packet_count.to_be_bytes());
        out.extend_from_slice(&self.octet_count.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            ntp_sec: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            ntp_frac: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            rtp_timestamp: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            packet_count: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            octet_count: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
        })
    }
}

/// Current wall clock as an NTP second/fraction pair.
pub fn ntp_now() -> (u32, u32) {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let sec = (since_epoch.as_secs() + NTP_UNIX_OFFSET) as u32;
    let frac = ((u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000) as u32;
    (sec, frac)
}

/// Append an RR packet: reporter SSRC plus one block per entry.
pub fn pack_rr(ssrc: u32, blocks: &[ReportBlock], out: &mut Vec<u8>) {
    let count = blocks.len().min(31);
    RtcpHeader {
        count: count as u8,
        packet_type: RTCP_RR,
        length_words: (1 + 6 * count) as u16,
    }
    .write(out);
    out.extend_from_slice(&ssrc.to_be_bytes());
    for block in &blocks[..count] {
        block.write(out);
    }
}

/// Append an SR packet: sender SSRC, sender info, then report blocks.
pub fn pack_sr(ssrc: u32, info: &SenderInfo, blocks: &[ReportBlock], out: &mut Vec<u8>) {
    let count = blocks.len().min(31);
    RtcpHeader {
        count: count as u8,
        packet_type: RTCP_SR,
        length_words: (6 + 6 * count) as u16,
    }
    .write(out);
    out.extend_from_slice(&ssrc.to_be_bytes());
    info.write(out);
    for block in &blocks[..count] {
        block.write(out);
    }
}

/// Append a one-chunk SDES packet carrying a CNAME item (RFC 3550 §6.5).
pub fn pack_sdes_cname(ssrc: u32, cname: &str, out: &mut Vec<u8>) {
    let name = &cname.as_bytes()[..cname.len().min(255)];
    // chunk body: item header + text + at least one terminating null,
    // padded to a 32-bit boundary
    let item_len = 2 + name.len();
    let padded = (item_len + 1).div_ceil(4) * 4;
    RtcpHeader {
        count: 1,
        packet_type: RTCP_SDES,
        length_words: (1 + padded / 4) as u16,
    }
    .write(out);
    out.extend_from_slice(&ssrc.to_be_bytes());
    out.push(SDES_CNAME);
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out.resize(out.len() + (padded - item_len), 0);
}

/// Append a BYE packet naming this session's SSRC.
pub fn pack_bye(ssrc: u32, out: &mut Vec<u8>) {
    RtcpHeader {
        count: 1,
        packet_type: RTCP_BYE,
        length_words: 1,
    }
    .write(out);
    out.extend_from_slice(&ssrc.to_be_bytes());
}

/// One parsed packet out of a compound RTCP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport {
        ssrc: u32,
        info: SenderInfo,
        blocks: Vec<ReportBlock>,
    },
    ReceiverReport {
        ssrc: u32,
        blocks: Vec<ReportBlock>,
    },
    SourceDescription,
    Bye {
        ssrcs: Vec<u32>,
    },
    App,
    Unknown(u8),
}

/// Walk a compound RTCP datagram into its individual packets.
///
/// Each header's declared length must fit the remaining buffer; a declared
/// length past the end fails the whole datagram.
pub fn parse_compound(buf: &[u8]) -> Result<Vec<RtcpPacket>> {
    let mut packets = Vec::new();
    let mut rest = buf;
    while !rest.is_empty() {
        let header = RtcpHeader::parse(rest).ok_or(RtspError::Parse {
            kind: ParseErrorKind::TruncatedRtcp,
        })?;
        let len = header.packet_len();
        if len > rest.len() {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::TruncatedRtcp,
            });
        }
        let body = &rest[4..len];
        packets.push(parse_one(header, body)?);
        rest = &rest[len..];
    }
    Ok(packets)
}

fn truncated() -> RtspError {
    RtspError::Parse {
        kind: ParseErrorKind::TruncatedRtcp,
    }
}

fn parse_one(header: RtcpHeader, body: &[u8]) -> Result<RtcpPacket> {
    let count = usize::from(header.count);
    match header.packet_type {
        RTCP_SR => {
            if body.len() < 4 + SenderInfo::WIRE_SIZE + count * ReportBlock::WIRE_SIZE {
                return Err(truncated());
            }
            let ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let info = SenderInfo::parse(&body[4..]).ok_or_else(truncated)?;
            let blocks = parse_blocks(&body[4 + SenderInfo::WIRE_SIZE..], count);
            Ok(RtcpPacket::SenderReport { ssrc, info, blocks })
        }
        RTCP_RR => {
            if body.len() < 4 + count * ReportBlock::WIRE_SIZE {
                return Err(truncated());
            }
            let ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let blocks = parse_blocks(&body[4..], count);
            Ok(RtcpPacket::ReceiverReport { ssrc, blocks })
        }
        RTCP_BYE => {
            if body.len() < count * 4 {
                return Err(truncated());
            }
            let ssrcs = body
                .chunks_exact(4)
                .take(count)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            Ok(RtcpPacket::Bye { ssrcs })
        }
        RTCP_SDES => Ok(RtcpPacket::SourceDescription),
        RTCP_APP => Ok(RtcpPacket::App),
        other => Ok(RtcpPacket::Unknown(other)),
    }
}

fn parse_blocks(buf: &[u8], count: usize) -> Vec<ReportBlock> {
    buf.chunks_exact(ReportBlock::WIRE_SIZE)
        .take(count)
        .filter_map(ReportBlock::parse)
        .collect()
}
