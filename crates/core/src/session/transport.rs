//! `Transport:` header parsing and serialization (RFC 2326 §12.39).

use crate::rtp::{MULTICAST_ADDR, TransportMode};

/// Parsed `Transport` header, covering both directions:
///
/// ```text
/// Client → Server: RTP/AVP;unicast;client_port=8000-8001
/// Server → Client: RTP/AVP;unicast;client_port=8000-8001;server_port=6970-6971
/// Interleaved:     RTP/AVP/TCP;unicast;interleaved=0-1
/// Multicast:       RTP/AVP;multicast;port=9832-9833
/// ```
///
/// Mode resolution: `RTP/AVP/TCP` selects interleaved transport, the
/// presence of `multicast` overrides to multicast, everything else is UDP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub mode: TransportMode,
    /// `client_port=` pair (UDP), or the `port=` pair for multicast.
    pub client_ports: Option<(u16, u16)>,
    /// `server_port=` pair, present in SETUP responses.
    pub server_ports: Option<(u16, u16)>,
    /// `interleaved=` channel pair for TCP transport.
    pub interleaved: Option<(u8, u8)>,
    /// `mode=record` parameter (client push SETUP).
    pub record: bool,
}

fn parse_pair<T: std::str::FromStr>(value: &str) -> Option<(T, T)> {
    let (a, b) = value.split_once('-')?;
    let b_digits: String = b.chars().take_while(|c| c.is_ascii_digit()).collect();
    Some((a.trim().parse().ok()?, b_digits.parse().ok()?))
}

impl TransportHeader {
    pub fn parse(header: &str) -> Option<Self> {
        let mut mode = if header.contains("RTP/AVP/TCP") {
            TransportMode::TcpInterleaved
        } else {
            TransportMode::Udp
        };
        if header.contains("multicast") {
            mode = TransportMode::Multicast;
        }

        let mut parsed = Self {
            mode,
            client_ports: None,
            server_ports: None,
            interleaved: None,
            record: false,
        };

        for part in header.split(';') {
            let part = part.trim();
            if let Some(value) = part.strip_prefix("client_port=") {
                parsed.client_ports = parse_pair(value);
            } else if let Some(value) = part.strip_prefix("server_port=") {
                parsed.server_ports = parse_pair(value);
            } else if let Some(value) = part.strip_prefix("interleaved=") {
                parsed.interleaved = parse_pair(value);
            } else if let Some(value) = part.strip_prefix("port=") {
                // multicast spelling of the destination pair
                if parsed.client_ports.is_none() {
                    parsed.client_ports = parse_pair(value);
                }
            } else if part == "mode=record" || part == "mode=\"RECORD\"" {
                parsed.record = true;
            }
        }

        match parsed.mode {
            TransportMode::TcpInterleaved => parsed.interleaved.is_some().then_some(parsed),
            _ => parsed.client_ports.is_some().then_some(parsed),
        }
    }

    /// Serialize the server's SETUP response value, echoing the client
    /// parameters and adding the server-side assignment.
    pub fn serialize_response(&self, server_ports: (u16, u16)) -> String {
        match self.mode {
            TransportMode::TcpInterleaved => {
                let (rtp, rtcp) = self.interleaved.unwrap_or((0, 1));
                format!("RTP/AVP/TCP;unicast;interleaved={rtp}-{rtcp}")
            }
            TransportMode::Multicast => {
                let (rtp, rtcp) = self.client_ports.unwrap_or((0, 0));
                format!("RTP/AVP;multicast;destination={MULTICAST_ADDR};port={rtp}-{rtcp}")
            }
            TransportMode::Udp => {
                let (rtp, rtcp) = self.client_ports.unwrap_or((0, 0));
                format!(
                    "RTP/AVP;unicast;client_port={rtp}-{rtcp};server_port={}-{}",
                    server_ports.0, server_ports.1
                )
            }
        }
    }

    /// Serialize the client's SETUP request value for a push session.
    pub fn serialize_push_request(mode: TransportMode, rtp: u16, rtcp: u16, channels: (u8, u8)) -> String {
        match mode {
            TransportMode::TcpInterleaved => format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{};mode=record",
                channels.0, channels.1
            ),
            _ => format!("RTP/AVP/UDP;unicast;client_port={rtp}-{rtcp};mode=record"),
        }
    }
}
