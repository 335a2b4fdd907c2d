//! Per-track RTP transport state and send paths.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::RngExt;

use super::packet::RtpHeader;
use super::{
    MAX_RTP_PAYLOAD_SIZE, MULTICAST_ADDR, MediaClock, RTP_HEADER_SIZE, RTP_TCP_HEAD_SIZE,
    TransportMode, now_ms,
};
use crate::error::{Result, RtspError};
use crate::rtcp::RtcpEngine;

/// First UDP port probed for the RTP/RTCP pair.
const UDP_PORT_MIN: u16 = 6970;
/// Probe stops (exclusive) here; exhaustion fails session creation.
const UDP_PORT_MAX: u16 = 7000;
/// Read timeout on the RTCP socket, bounding receiver-thread shutdown.
const RTCP_RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// The RTSP TCP stream, shared between the response path and the
/// interleaved RTP path. All writers serialize on this lock.
pub type SharedTcpStream = Arc<Mutex<TcpStream>>;

/// Parameters resolved during SETUP (server) or before SETUP (client push).
#[derive(Clone)]
pub struct RtpSessionConfig {
    pub mode: TransportMode,
    /// Peer address from the RTSP connection (ignored for multicast).
    pub peer_ip: IpAddr,
    /// Negotiated RTP destination port (RTCP goes to port + 1).
    pub peer_rtp_port: u16,
    /// The RTSP connection, required for interleaved transport.
    pub tcp: Option<SharedTcpStream>,
    /// Interleaved RTP channel id (RTCP uses channel + 1).
    pub rtp_channel: u8,
    pub payload_type: u8,
    pub clock_rate: u32,
    /// Session bandwidth in octets/sec; RTCP gets 5% of it.
    pub bandwidth: u32,
    /// CNAME advertised in SDES.
    pub cname: String,
}

enum SendPath {
    Udp {
        rtp: UdpSocket,
        rtcp: Arc<UdpSocket>,
        ports: (u16, u16),
    },
    Tcp {
        stream: SharedTcpStream,
        channel: u8,
    },
    Multicast {
        rtp: UdpSocket,
        rtcp: Arc<UdpSocket>,
        ports: (u16, u16),
    },
}

/// Per-track RTP session.
///
/// Owns the bound socket pair (or the interleaved channel ids), the wrapping
/// sequence counter, the SSRC (random, fixed for the session lifetime), the
/// media timestamp clock, and the RTCP engine plus its receive thread.
pub struct RtpSession {
    path: SendPath,
    peer_ip: IpAddr,
    peer_rtp_port: u16,
    payload_type: u8,
    sequence: u16,
    ssrc: u32,
    clock: MediaClock,
    rtcp: Arc<Mutex<RtcpEngine>>,
    rtcp_stop: Arc<AtomicBool>,
    said_goodbye: bool,
}

impl RtpSession {
    pub fn new(config: RtpSessionConfig) -> Result<Self> {
        let ssrc = rand::rng().random::<u32>();
        let rtcp = Arc::new(Mutex::new(RtcpEngine::new(
            ssrc,
            &config.cname,
            config.bandwidth,
        )));
        let rtcp_stop = Arc::new(AtomicBool::new(false));

        let path = match config.mode {
            TransportMode::Udp => {
                let (rtp, rtcp_socket, port) = bind_udp_pair()?;
                let rtcp_socket = Arc::new(rtcp_socket);
                spawn_rtcp_receiver(rtcp_socket.clone(), rtcp.clone(), rtcp_stop.clone())?;
                SendPath::Udp {
                    rtp,
                    rtcp: rtcp_socket,
                    ports: (port, port + 1),
                }
            }
            TransportMode::Multicast => {
                let (rtp, rtcp_socket, port) = bind_udp_pair()?;
                SendPath::Multicast {
                    rtp,
                    rtcp: Arc::new(rtcp_socket),
                    ports: (port, port + 1),
                }
            }
            TransportMode::TcpInterleaved => {
                let stream = config.tcp.clone().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "interleaved transport needs the RTSP TCP stream",
                    )
                })?;
                SendPath::Tcp {
                    stream,
                    channel: config.rtp_channel,
                }
            }
        };

        let (rtp_port, rtcp_port) = match &path {
            SendPath::Udp { ports, .. } | SendPath::Multicast { ports, .. } => *ports,
            SendPath::Tcp { .. } => (0, 0),
        };
        tracing::info!(
            mode = ?config.mode,
            ssrc = format_args!("{ssrc:#010X}"),
            server_rtp_port = rtp_port,
            server_rtcp_port = rtcp_port,
            peer_rtp_port = config.peer_rtp_port,
            "RTP session created"
        );

        Ok(Self {
            path,
            peer_ip: config.peer_ip,
            peer_rtp_port: config.peer_rtp_port,
            payload_type: config.payload_type,
            sequence: 0,
            ssrc,
            clock: MediaClock::new(config.clock_rate),
            rtcp,
            rtcp_stop,
            said_goodbye: false,
        })
    }

    pub fn mode(&self) -> TransportMode {
        match self.path {
            SendPath::Udp { .. } => TransportMode::Udp,
            SendPath::Tcp { .. } => TransportMode::TcpInterleaved,
            SendPath::Multicast { .. } => TransportMode::Multicast,
        }
    }

    /// Locally bound (RTP, RTCP) ports; (0, 0) for interleaved transport.
    pub fn server_ports(&self) -> (u16, u16) {
        match &self.path {
            SendPath::Udp { ports, .. } | SendPath::Multicast { ports, .. } => *ports,
            SendPath::Tcp { .. } => (0, 0),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.clock.timestamp()
    }

    /// Re-point the RTP destination (client push: the SETUP response's
    /// `server_port`).
    pub fn set_peer_rtp_port(&mut self, port: u16) {
        self.peer_rtp_port = port;
    }

    /// Re-point the interleaved channel (client push: the SETUP response's
    /// `interleaved` assignment).
    pub fn set_rtp_channel(&mut self, channel: u8) {
        if let SendPath::Tcp { channel: ch, .. } = &mut self.path {
            *ch = channel;
        }
    }

    /// Interleaved RTP channel id, when running over the RTSP connection.
    pub fn rtp_channel(&self) -> Option<u8> {
        match &self.path {
            SendPath::Tcp { channel, .. } => Some(*channel),
            _ => None,
        }
    }

    /// Advance the media clock for a new frame; every fragment of the frame
    /// carries the returned timestamp.
    pub fn begin_frame(&mut self) -> u32 {
        self.clock.tick(now_ms())
    }

    /// Largest payload (sub-header included) a single packet may carry.
    pub fn max_fragment_payload(&self) -> usize {
        MAX_RTP_PAYLOAD_SIZE - RTP_HEADER_SIZE - RTP_TCP_HEAD_SIZE
    }

    /// Build and transmit one RTP packet carrying `payload`.
    ///
    /// The marker bit is `is_last`; the sequence number post-increments on
    /// every send; the timestamp is the session timestamp, not per-packet.
    pub fn send_packet(&mut self, payload: &[u8], is_last: bool) -> Result<()> {
        let header = RtpHeader {
            marker: is_last,
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp: self.clock.timestamp(),
            ssrc: self.ssrc,
        };
        let packet_len = RTP_HEADER_SIZE + payload.len();

        match &self.path {
            SendPath::Udp { rtp, .. } => {
                let mut buf = Vec::with_capacity(packet_len);
                buf.extend_from_slice(&header.to_bytes());
                buf.extend_from_slice(payload);
                rtp.send_to(&buf, SocketAddr::new(self.peer_ip, self.peer_rtp_port))?;
            }
            SendPath::Multicast { rtp, .. } => {
                let group = SocketAddr::new(IpAddr::V4(MULTICAST_ADDR), self.peer_rtp_port);
                let mut buf = Vec::with_capacity(packet_len);
                buf.extend_from_slice(&header.to_bytes());
                buf.extend_from_slice(payload);
                rtp.send_to(&buf, group)?;
            }
            SendPath::Tcp { stream, channel } => {
                let mut buf = Vec::with_capacity(RTP_TCP_HEAD_SIZE + packet_len);
                buf.push(b'$');
                buf.push(*channel);
                buf.extend_from_slice(&(packet_len as u16).to_be_bytes());
                buf.extend_from_slice(&header.to_bytes());
                buf.extend_from_slice(payload);
                stream.lock().write_all(&buf)?;
            }
        }

        self.sequence = self.sequence.wrapping_add(1);
        self.rtcp
            .lock()
            .on_rtp_sent(payload.len(), header.timestamp, now_ms());
        Ok(())
    }

    /// Shared handle to this session's RTCP engine (held by the receive
    /// thread and, for interleaved transport, the connection demux).
    pub fn rtcp_engine(&self) -> Arc<Mutex<RtcpEngine>> {
        self.rtcp.clone()
    }

    /// Emit a compound report if the engine's deadline has passed.
    pub fn poll_rtcp(&mut self) -> Result<()> {
        let report = self.rtcp.lock().poll(now_ms());
        if let Some(report) = report {
            self.send_rtcp(&report)?;
            tracing::trace!(bytes = report.len(), "RTCP report sent");
        }
        Ok(())
    }

    fn send_rtcp(&self, data: &[u8]) -> Result<()> {
        match &self.path {
            SendPath::Udp { rtcp, .. } => {
                rtcp.send_to(data, SocketAddr::new(self.peer_ip, self.peer_rtp_port + 1))?;
            }
            SendPath::Multicast { rtcp, .. } => {
                let group = SocketAddr::new(IpAddr::V4(MULTICAST_ADDR), self.peer_rtp_port + 1);
                rtcp.send_to(data, group)?;
            }
            SendPath::Tcp { stream, channel } => {
                let mut buf = Vec::with_capacity(RTP_TCP_HEAD_SIZE + data.len());
                buf.push(b'$');
                buf.push(channel + 1);
                buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
                buf.extend_from_slice(data);
                stream.lock().write_all(&buf)?;
            }
        }
        Ok(())
    }

    /// Announce departure with a BYE and stop the receive thread.
    pub fn shutdown(&mut self) {
        if !self.said_goodbye {
            self.said_goodbye = true;
            let bye = self.rtcp.lock().goodbye();
            if let Err(e) = self.send_rtcp(&bye) {
                tracing::debug!(error = %e, "BYE send failed");
            }
        }
        self.rtcp_stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for RtpSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Probe even ports from 6970, binding RTP then the adjacent RTCP socket.
///
/// A pair that fails on the RTCP side is released before the next probe, so
/// exhaustion leaves no sockets behind.
fn bind_udp_pair() -> Result<(UdpSocket, UdpSocket, u16)> {
    let mut port = UDP_PORT_MIN;
    while port < UDP_PORT_MAX {
        if let Ok(rtp) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)) {
            if let Ok(rtcp) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port + 1)) {
                tracing::debug!(rtp_port = port, rtcp_port = port + 1, "UDP pair bound");
                return Ok((rtp, rtcp, port));
            }
        }
        port += 2;
    }
    tracing::error!("no free UDP port pair for RTP/RTCP");
    Err(RtspError::PortRangeExhausted)
}

/// Blocking RTCP receiver feeding inbound SR/RR/BYE into the engine.
fn spawn_rtcp_receiver(
    socket: Arc<UdpSocket>,
    engine: Arc<Mutex<RtcpEngine>>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    socket.set_read_timeout(Some(RTCP_RECV_TIMEOUT))?;
    thread::Builder::new()
        .name("rtcp-recv".into())
        .spawn(move || {
            let mut buf = [0u8; 256];
            while !stop.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((len, from)) => {
                        if let Err(e) = engine.lock().handle_packet(&buf[..len], now_ms()) {
                            tracing::warn!(error = %e, peer = %from, "malformed RTCP datagram");
                        }
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "RTCP receive loop exiting");
                        break;
                    }
                }
            }
        })?;
    Ok(())
}
