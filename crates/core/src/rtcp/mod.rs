//! RTCP feedback loop (RFC 3550 §6).
//!
//! Three layers, wire to policy:
//!
//! - [`packet`] — pack/unpack for SR, RR, SDES, BYE and compound datagrams.
//! - [`member`] — per-SSRC participant bookkeeping.
//! - [`engine`] — report generation, inbound digestion, and the adaptive
//!   reporting-interval schedule.

pub mod engine;
pub mod member;
pub mod packet;

pub use engine::{RtcpEngine, rtcp_interval};
pub use member::{MemberList, RtcpMember};
pub use packet::{ReportBlock, RtcpPacket, SenderInfo};
