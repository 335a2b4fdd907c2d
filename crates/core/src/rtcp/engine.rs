//! RTCP feedback engine (RFC 3550 §6).
//!
//! Tracks session members, builds outbound SR/RR+SDES compound packets,
//! digests inbound reports, and schedules the next report with the RFC 3550
//! §6.2/A.7 interval computation.
//!
//! The engine is shared between the RTP send path and the RTCP receive
//! thread, so callers hold it behind a `parking_lot::Mutex`.

use rand::RngExt;

use super::member::{MemberList, RtcpMember};
use super::packet::{
    self, ReportBlock, RtcpPacket, SenderInfo, pack_bye, pack_rr, pack_sdes_cname, pack_sr,
};
use crate::error::Result;

/// Fraction of the session bandwidth reserved for RTCP (RFC 3550 §6.2).
const RTCP_BANDWIDTH_FRACTION: f64 = 0.05;
/// Minimum reporting interval in seconds; halved for the first report.
const RTCP_MIN_TIME: f64 = 5.0;
/// Reconsideration compensation, `e - 3/2` (RFC 3550 §6.3.1).
const COMPENSATION: f64 = std::f64::consts::E - 1.5;

/// Deterministic part of the RFC 3550 §A.7 interval computation, in seconds.
///
/// Applies the 25%/75% bandwidth split when senders are at most a quarter of
/// the membership, so RR bandwidth is never starved by a sender majority.
pub fn transmission_interval(
    members: usize,
    senders: usize,
    rtcp_bandwidth: f64,
    we_sent: bool,
    avg_rtcp_size: f64,
    initial: bool,
) -> f64 {
    let t_min = if initial { RTCP_MIN_TIME / 2.0 } else { RTCP_MIN_TIME };
    let mut n = members;
    let mut bandwidth = rtcp_bandwidth;
    if senders > 0 && (senders as f64) <= (members as f64) * 0.25 {
        if we_sent {
            bandwidth *= 0.25;
            n = senders;
        } else {
            bandwidth *= 0.75;
            n -= senders;
        }
    }
    if bandwidth <= 0.0 {
        return t_min;
    }
    (avg_rtcp_size * n as f64 / bandwidth).max(t_min)
}

/// Full §A.7 interval: deterministic part, randomized to 0.5..1.5 of its
/// value to decouple report timing across participants, then divided by
/// `e - 3/2` to compensate for timer reconsideration. Returns milliseconds.
pub fn rtcp_interval(
    members: usize,
    senders: usize,
    rtcp_bandwidth: f64,
    we_sent: bool,
    avg_rtcp_size: f64,
    initial: bool,
) -> u32 {
    let t = transmission_interval(
        members,
        senders,
        rtcp_bandwidth,
        we_sent,
        avg_rtcp_size,
        initial,
    );
    let jittered = t * (rand::rng().random::<f64>() + 0.5) / COMPENSATION;
    (jittered * 1000.0) as u32
}

/// Per-session RTCP state machine.
pub struct RtcpEngine {
    ssrc: u32,
    cname: String,
    members: MemberList,
    /// 5% of the configured session bandwidth, in octets/sec.
    rtcp_bandwidth: f64,
    avg_rtcp_size: f64,
    initial: bool,
    /// Wall-clock ms of the last report sent; 0 until scheduling starts.
    last_report_ms: u32,
    /// Current reporting interval in ms; 0 until first poll.
    interval_ms: u32,
    // local sender state, feeding SR sender info
    packets_sent: u32,
    octets_sent: u32,
    last_rtp_timestamp: u32,
    last_sent_ms: u32,
    sent_any: bool,
}

impl RtcpEngine {
    pub fn new(ssrc: u32, cname: &str, session_bandwidth: u32) -> Self {
        let mut members = MemberList::new();
        members.fetch(ssrc); // self is member 0
        Self {
            ssrc,
            cname: cname.to_string(),
            members,
            rtcp_bandwidth: f64::from(session_bandwidth) * RTCP_BANDWIDTH_FRACTION,
            avg_rtcp_size: 128.0,
            initial: true,
            last_report_ms: 0,
            interval_ms: 0,
            packets_sent: 0,
            octets_sent: 0,
            last_rtp_timestamp: 0,
            last_sent_ms: 0,
            sent_any: false,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn member_count(&self) -> usize {
        self.members.count()
    }

    /// The report block a given peer last sent about us.
    pub fn peer_report(&self, ssrc: u32) -> Option<ReportBlock> {
        self.members.find(ssrc).map(|m| m.report)
    }

    /// Record one RTP packet sent by this session.
    pub fn on_rtp_sent(&mut self, payload_octets: usize, rtp_timestamp: u32, now_ms: u32) {
        self.packets_sent = self.packets_sent.wrapping_add(1);
        self.octets_sent = self.octets_sent.wrapping_add(payload_octets as u32);
        self.last_rtp_timestamp = rtp_timestamp;
        self.last_sent_ms = now_ms;
        self.sent_any = true;
        self.members.fetch(self.ssrc).is_sender = true;
    }

    /// Record one RTP packet received from a peer.
    pub fn on_rtp_received(&mut self, ssrc: u32, sequence: u16, payload_octets: usize, now_ms: u32) {
        if ssrc == self.ssrc {
            return; // looped-back own traffic
        }
        let member = self.members.fetch(ssrc);
        let seq = u32::from(sequence);
        if member.rtp_packets == 0 {
            member.first_seq = seq;
            member.ext_highest_seq = seq;
        } else {
            let prev16 = member.ext_highest_seq as u16;
            let cycles = member.ext_highest_seq & 0xFFFF_0000;
            member.ext_highest_seq = if sequence < prev16 && prev16 - sequence > 0x8000 {
                cycles.wrapping_add(0x1_0000) | seq
            } else if sequence > prev16 || prev16 - sequence <= 0x8000 {
                (cycles | seq).max(member.ext_highest_seq)
            } else {
                member.ext_highest_seq
            };
        }
        member.is_sender = true;
        member.rtp_packets = member.rtp_packets.wrapping_add(1);
        member.rtp_octets = member.rtp_octets.wrapping_add(payload_octets as u32);
        member.last_heard_ms = now_ms;
    }

    /// True when this session transmitted within the last two intervals.
    fn we_sent(&self, now_ms: u32) -> bool {
        self.sent_any
            && now_ms.wrapping_sub(self.last_sent_ms) < self.interval_ms.saturating_mul(2).max(1)
    }

    fn reschedule(&mut self, now_ms: u32) {
        self.interval_ms = rtcp_interval(
            self.members.count(),
            self.members.sender_count(),
            self.rtcp_bandwidth,
            self.we_sent(now_ms),
            self.avg_rtcp_size,
            self.initial,
        );
        self.last_report_ms = now_ms;
    }

    /// Returns a compound report when the reporting deadline has passed.
    ///
    /// The deadline lives in the engine itself; callers only poll. The first
    /// poll arms the timer without emitting anything.
    pub fn poll(&mut self, now_ms: u32) -> Option<Vec<u8>> {
        if self.interval_ms == 0 {
            self.reschedule(now_ms);
            return None;
        }
        if now_ms.wrapping_sub(self.last_report_ms) < self.interval_ms {
            return None;
        }
        let report = self.build_report(now_ms);
        self.initial = false;
        self.reschedule(now_ms);
        Some(report)
    }

    /// Build one compound SR/RR + SDES packet (RFC 3550 §6.1).
    pub fn build_report(&mut self, now_ms: u32) -> Vec<u8> {
        let blocks = self.sender_report_blocks(now_ms);
        let mut out = Vec::with_capacity(64);
        if self.we_sent(now_ms) {
            let info =
                SenderInfo::now(self.last_rtp_timestamp, self.packets_sent, self.octets_sent);
            pack_sr(self.ssrc, &info, &blocks, &mut out);
        } else {
            pack_rr(self.ssrc, &blocks, &mut out);
        }
        pack_sdes_cname(self.ssrc, &self.cname, &mut out);
        self.avg_rtcp_size += (out.len() as f64 - self.avg_rtcp_size) / 16.0;
        out
    }

    /// One report block per active sender, per RFC 3550 §A.3.
    ///
    /// Senders with zero packets received and our own SSRC are skipped.
    fn sender_report_blocks(&mut self, now_ms: u32) -> Vec<ReportBlock> {
        let self_ssrc = self.ssrc;
        let mut blocks = Vec::new();
        for member in self.members.iter_mut() {
            if !member.is_sender || member.rtp_packets == 0 || member.ssrc == self_ssrc {
                continue;
            }
            blocks.push(report_block_for(member, now_ms));
            if blocks.len() == 31 {
                break;
            }
        }
        blocks
    }

    /// Digest an inbound compound RTCP datagram.
    pub fn handle_packet(&mut self, data: &[u8], now_ms: u32) -> Result<()> {
        self.avg_rtcp_size += (data.len() as f64 - self.avg_rtcp_size) / 16.0;
        for parsed in packet::parse_compound(data)? {
            match parsed {
                RtcpPacket::SenderReport { ssrc, info, blocks } => {
                    if ssrc == self.ssrc {
                        continue;
                    }
                    let member = self.members.fetch(ssrc);
                    member.is_sender = true;
                    member.last_heard_ms = now_ms;
                    member.last_sr_ntp = (info.ntp_sec << 16) | (info.ntp_frac >> 16);
                    member.last_sr_arrival_ms = now_ms;
                    self.store_reports(ssrc, &blocks);
                    tracing::trace!(ssrc = format_args!("{ssrc:#010X}"), "SR received");
                }
                RtcpPacket::ReceiverReport { ssrc, blocks } => {
                    if ssrc == self.ssrc {
                        continue;
                    }
                    self.members.fetch(ssrc).last_heard_ms = now_ms;
                    self.store_reports(ssrc, &blocks);
                    tracing::trace!(ssrc = format_args!("{ssrc:#010X}"), "RR received");
                }
                RtcpPacket::Bye { ssrcs } => {
                    for ssrc in ssrcs {
                        if ssrc != self.ssrc && self.members.remove(ssrc) {
                            tracing::debug!(ssrc = format_args!("{ssrc:#010X}"), "member left (BYE)");
                        }
                    }
                }
                RtcpPacket::SourceDescription | RtcpPacket::App => {}
                RtcpPacket::Unknown(pt) => {
                    tracing::warn!(packet_type = pt, "unknown RTCP packet type");
                }
            }
        }
        Ok(())
    }

    /// Store report blocks whose target is our own SSRC on the reporter.
    fn store_reports(&mut self, reporter: u32, blocks: &[ReportBlock]) {
        let self_ssrc = self.ssrc;
        if let Some(member) = self.members.find_mut(reporter) {
            for block in blocks {
                if block.ssrc == self_ssrc {
                    member.report = *block;
                }
            }
        }
    }

    /// BYE packet announcing departure (sent on teardown).
    pub fn goodbye(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        pack_bye(self.ssrc, &mut out);
        out
    }
}

fn report_block_for(member: &mut RtcpMember, now_ms: u32) -> ReportBlock {
    let expected = member
        .ext_highest_seq
        .wrapping_sub(member.first_seq)
        .wrapping_add(1);
    let lost = expected.saturating_sub(member.rtp_packets).min(0x00FF_FFFF);

    let expected_interval = expected.wrapping_sub(member.prev_expected);
    let received_interval = member.rtp_packets.wrapping_sub(member.prev_received);
    let lost_interval = expected_interval.saturating_sub(received_interval);
    let fraction = if expected_interval == 0 {
        0
    } else {
        ((lost_interval << 8) / expected_interval).min(255) as u8
    };
    member.prev_expected = expected;
    member.prev_received = member.rtp_packets;

    let dlsr = if member.last_sr_arrival_ms == 0 {
        0
    } else {
        (u64::from(now_ms.wrapping_sub(member.last_sr_arrival_ms)) * 65536 / 1000) as u32
    };

    ReportBlock {
        ssrc: member.ssrc,
        fraction_lost: fraction,
        cumulative_lost: lost,
        ext_highest_seq: member.ext_highest_seq,
        jitter: member.jitter,
        last_sr: member.last_sr_ntp,
        delay_since_last_sr: dlsr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcp::packet::parse_compound;

    #[test]
    fn interval_respects_minimum() {
        // 60 * 2 / 50 = 2.4s, below both floors
        let t = transmission_interval(2, 1, 50.0, true, 60.0, false);
        assert_eq!(t, RTCP_MIN_TIME);
        let t = transmission_interval(2, 1, 50.0, true, 60.0, true);
        assert_eq!(t, RTCP_MIN_TIME / 2.0); // first report halves the floor
    }

    #[test]
    fn sender_split_uses_quarter_bandwidth() {
        // 100 members, 10 senders, big packets: senders share 25% of the bw
        let sender_view = transmission_interval(100, 10, 500.0, true, 800.0, false);
        let receiver_view = transmission_interval(100, 10, 500.0, false, 800.0, false);
        assert!((sender_view - 800.0 * 10.0 / 125.0).abs() < 1e-9);
        assert!((receiver_view - 800.0 * 90.0 / 375.0).abs() < 1e-9);
    }

    #[test]
    fn jittered_interval_stays_in_half_to_one_and_a_half() {
        let base = transmission_interval(2, 1, 50.0, true, 128.0, false);
        for _ in 0..50 {
            let ms = rtcp_interval(2, 1, 50.0, true, 128.0, false);
            let t = f64::from(ms) / 1000.0;
            assert!(t >= base * 0.5 / COMPENSATION - 0.01, "interval {t} too small");
            assert!(t <= base * 1.5 / COMPENSATION + 0.01, "interval {t} too large");
        }
    }

    #[test]
    fn self_is_member_zero() {
        let engine = RtcpEngine::new(0x1234, "cam@test", 1000);
        assert_eq!(engine.member_count(), 1);
    }

    #[test]
    fn receiver_builds_rr_with_block_per_sender() {
        let mut engine = RtcpEngine::new(1, "cam@test", 1000);
        engine.on_rtp_received(42, 100, 1000, 10);
        engine.on_rtp_received(42, 101, 1000, 30);
        let wire = engine.build_report(50);
        match &parse_compound(&wire).unwrap()[0] {
            RtcpPacket::ReceiverReport { ssrc, blocks } => {
                assert_eq!(*ssrc, 1);
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].ssrc, 42);
                assert_eq!(blocks[0].ext_highest_seq, 101);
                assert_eq!(blocks[0].cumulative_lost, 0);
            }
            other => panic!("expected RR, got {other:?}"),
        }
    }

    #[test]
    fn loss_shows_in_report_block() {
        let mut engine = RtcpEngine::new(1, "cam@test", 1000);
        engine.on_rtp_received(42, 100, 100, 0);
        engine.on_rtp_received(42, 105, 100, 0); // 4 packets missing
        let wire = engine.build_report(0);
        match &parse_compound(&wire).unwrap()[0] {
            RtcpPacket::ReceiverReport { blocks, .. } => {
                assert_eq!(blocks[0].cumulative_lost, 4);
                assert!(blocks[0].fraction_lost > 0);
            }
            other => panic!("expected RR, got {other:?}"),
        }
    }

    #[test]
    fn sender_builds_sr_after_sending() {
        let mut engine = RtcpEngine::new(1, "cam@test", 1000);
        engine.poll(0); // arm the timer so we_sent's window is defined
        engine.on_rtp_sent(1400, 90000, 10);
        let wire = engine.build_report(20);
        match &parse_compound(&wire).unwrap()[0] {
            RtcpPacket::SenderReport { ssrc, info, .. } => {
                assert_eq!(*ssrc, 1);
                assert_eq!(info.packet_count, 1);
                assert_eq!(info.octet_count, 1400);
                assert_eq!(info.rtp_timestamp, 90000);
            }
            other => panic!("expected SR, got {other:?}"),
        }
    }

    #[test]
    fn inbound_rr_for_self_updates_member_report() {
        let mut engine = RtcpEngine::new(0xAA, "cam@test", 1000);
        let block = ReportBlock {
            ssrc: 0xAA, // targets us
            fraction_lost: 10,
            cumulative_lost: 3,
            ext_highest_seq: 500,
            jitter: 9,
            last_sr: 77,
            delay_since_last_sr: 88,
        };
        let mut wire = Vec::new();
        pack_rr(0xBB, &[block], &mut wire);
        engine.handle_packet(&wire, 123).unwrap();

        let stored = engine.peer_report(0xBB).unwrap();
        assert_eq!(stored.fraction_lost, 10);
        assert_eq!(stored.cumulative_lost, 3);
        assert_eq!(stored.ext_highest_seq, 500);
        assert_eq!(stored.jitter, 9);
        assert_eq!(stored.last_sr, 77);
        assert_eq!(stored.delay_since_last_sr, 88);
    }

    #[test]
    fn inbound_rr_for_other_target_ignored() {
        let mut engine = RtcpEngine::new(0xAA, "cam@test", 1000);
        let block = ReportBlock {
            ssrc: 0xCC, // someone else
            fraction_lost: 99,
            ..Default::default()
        };
        let mut wire = Vec::new();
        pack_rr(0xBB, &[block], &mut wire);
        engine.handle_packet(&wire, 0).unwrap();
        assert_eq!(engine.peer_report(0xBB).unwrap().fraction_lost, 0);
    }

    #[test]
    fn bye_removes_member() {
        let mut engine = RtcpEngine::new(1, "cam@test", 1000);
        engine.on_rtp_received(42, 0, 100, 0);
        assert_eq!(engine.member_count(), 2);

        let mut wire = Vec::new();
        pack_bye(42, &mut wire);
        engine.handle_packet(&wire, 0).unwrap();
        assert_eq!(engine.member_count(), 1);
    }

    #[test]
    fn poll_arms_then_fires() {
        let mut engine = RtcpEngine::new(1, "cam@test", 1000);
        assert!(engine.poll(0).is_none()); // arming poll
        // interval is at most 7.5s jittered; far in the future it must fire
        let report = engine.poll(20_000);
        assert!(report.is_some());
        assert!(!report.unwrap().is_empty());
        // immediately after firing, the deadline is re-armed
        assert!(engine.poll(20_001).is_none());
    }
}
