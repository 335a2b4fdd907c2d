//! Server-side RTSP method dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::RngExt;

use crate::protocol::request::{RtspMethod, RtspRequest};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::{self, SdpTrack};
use crate::rtp::{RtpSession, RtpSessionConfig, SharedTcpStream, TransportMode};
use crate::session::{SessionState, TrackSet, TransportHeader};

/// Methods advertised in the OPTIONS `Public:` header.
const PUBLIC_METHODS: &str = "DESCRIBE, SETUP, TEARDOWN, PLAY, PAUSE";

/// Handles RTSP requests for a single accepted connection.
///
/// Owns the per-connection protocol state: the session id handed out in
/// `Session:` headers, the negotiated transport mode, and the references the
/// SETUP path needs to create RTP sessions.
pub struct MethodHandler {
    resource_path: String,
    session_name: String,
    session_id: String,
    bandwidth: u32,
    client_addr: SocketAddr,
    writer: SharedTcpStream,
    tracks: TrackSet,
    state: Arc<RwLock<SessionState>>,
    transport_mode: TransportMode,
}

impl MethodHandler {
    pub fn new(
        resource_path: &str,
        session_name: &str,
        bandwidth: u32,
        client_addr: SocketAddr,
        writer: SharedTcpStream,
        tracks: TrackSet,
        state: Arc<RwLock<SessionState>>,
    ) -> Self {
        Self {
            resource_path: resource_path.to_string(),
            session_name: session_name.to_string(),
            session_id: format!("{:08X}", rand::rng().random::<u32>()),
            bandwidth,
            client_addr,
            writer,
            tracks,
            state,
            transport_mode: TransportMode::Udp,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;
        match request.method {
            RtspMethod::Options => self.handle_options(cseq, request),
            RtspMethod::Describe => self.handle_describe(cseq, request),
            RtspMethod::Setup => self.handle_setup(cseq, request),
            RtspMethod::Play | RtspMethod::Record => self.handle_play(cseq, request),
            RtspMethod::Pause => self.handle_pause(cseq),
            RtspMethod::Teardown => self.handle_teardown(cseq),
            RtspMethod::GetParameter | RtspMethod::SetParameter | RtspMethod::Announce => {
                // acknowledged without state change beyond CSeq
                tracing::trace!(method = request.method.as_str(), cseq, "minimal ack");
                RtspResponse::ok().add_header("CSeq", &cseq.to_string())
            }
        }
    }

    fn handle_options(&self, cseq: u32, request: &RtspRequest) -> RtspResponse {
        tracing::debug!(cseq, "OPTIONS");
        if request.url.resource_path() != self.resource_path {
            tracing::warn!(uri = %request.uri, expected = %self.resource_path, "OPTIONS for unknown resource");
            return RtspResponse::not_found()
                .add_header("CSeq", &cseq.to_string())
                .with_date();
        }
        RtspResponse::ok()
            .add_header("CSeq", &cseq.to_string())
            .add_header("Public", PUBLIC_METHODS)
    }

    fn handle_describe(&self, cseq: u32, request: &RtspRequest) -> RtspResponse {
        tracing::debug!(cseq, uri = %request.uri, "DESCRIBE");
        let entries: Vec<SdpTrack> = self
            .tracks
            .iter()
            .map(|track| {
                let track = track.lock();
                SdpTrack {
                    id: track.id,
                    description: track.stream().media_description(0),
                    attributes: track.stream().sdp_attributes(),
                }
            })
            .collect();

        let sdp = sdp::generate_sdp(
            &entries,
            &request.url.host,
            &self.session_name,
            self.transport_mode == TransportMode::Multicast,
        );

        RtspResponse::ok()
            .add_header("CSeq", &cseq.to_string())
            .with_date()
            .add_header("Content-Base", &format!("{}/", request.uri))
            .add_header("Content-Type", "application/sdp")
            .with_body(sdp)
    }

    fn handle_setup(&mut self, cseq: u32, request: &RtspRequest) -> RtspResponse {
        let track_id = match request.url.track_id() {
            Some(id) => id,
            None => {
                tracing::warn!(uri = %request.uri, "SETUP without trackID, assuming 0");
                0
            }
        };
        let Some(track) = self.tracks.get(track_id).cloned() else {
            tracing::warn!(track_id, "SETUP for unknown track");
            return RtspResponse::not_found()
                .add_header("CSeq", &cseq.to_string())
                .with_date();
        };

        let Some(header_value) = request.get_header("Transport") else {
            tracing::warn!(cseq, "SETUP missing Transport header");
            return RtspResponse::bad_request().add_header("CSeq", &cseq.to_string());
        };
        let Some(transport) = TransportHeader::parse(header_value) else {
            tracing::warn!(cseq, header_value, "SETUP with unparseable Transport header");
            return RtspResponse::bad_request().add_header("CSeq", &cseq.to_string());
        };
        self.transport_mode = transport.mode;

        let mut track = track.lock();
        let config = RtpSessionConfig {
            mode: transport.mode,
            peer_ip: self.client_addr.ip(),
            peer_rtp_port: transport.client_ports.map(|(rtp, _)| rtp).unwrap_or(0),
            tcp: Some(self.writer.clone()),
            rtp_channel: transport
                .interleaved
                .map(|(rtp, _)| rtp)
                .unwrap_or((2 * track_id) as u8),
            payload_type: track.stream().payload_type(),
            clock_rate: track.stream().clock_rate(),
            bandwidth: self.bandwidth,
            cname: format!("rtcam-{}", self.session_id),
        };

        let rtp = match RtpSession::new(config) {
            Ok(rtp) => rtp,
            Err(e) => {
                tracing::error!(error = %e, track_id, "SETUP failed to create RTP session");
                return RtspResponse::new(500).add_header("CSeq", &cseq.to_string());
            }
        };
        let server_ports = rtp.server_ports();
        track.bind_rtp(rtp);
        drop(track);

        {
            let mut state = self.state.write();
            if *state == SessionState::Init {
                *state = SessionState::Ready;
            }
        }

        tracing::info!(
            session_id = %self.session_id,
            track_id,
            mode = ?transport.mode,
            client = %self.client_addr,
            server_rtp_port = server_ports.0,
            "track set up"
        );

        RtspResponse::ok()
            .add_header("CSeq", &cseq.to_string())
            .with_date()
            .add_header("Transport", &transport.serialize_response(server_ports))
            .add_header("Session", &self.session_id)
    }

    fn handle_play(&mut self, cseq: u32, request: &RtspRequest) -> RtspResponse {
        if !self.tracks.iter().any(|t| t.lock().has_rtp()) {
            tracing::warn!(cseq, method = request.method.as_str(), "PLAY/RECORD before SETUP");
            return RtspResponse::new(455)
                .add_header("CSeq", &cseq.to_string())
                .with_date();
        }
        *self.state.write() = SessionState::Playing;
        tracing::info!(session_id = %self.session_id, method = request.method.as_str(), "session playing");
        RtspResponse::ok()
            .add_header("CSeq", &cseq.to_string())
            .with_date()
            .add_header("Range", "npt=0.000-")
            .add_header("Session", &self.session_id)
    }

    fn handle_pause(&mut self, cseq: u32) -> RtspResponse {
        *self.state.write() = SessionState::Paused;
        tracing::info!(session_id = %self.session_id, "session paused");
        RtspResponse::ok()
            .add_header("CSeq", &cseq.to_string())
            .with_date()
            .add_header("Session", &self.session_id)
    }

    fn handle_teardown(&mut self, cseq: u32) -> RtspResponse {
        self.teardown_tracks();
        tracing::info!(session_id = %self.session_id, "session torn down");
        RtspResponse::ok()
            .add_header("CSeq", &cseq.to_string())
            .with_date()
    }

    /// Release every track's RTP session and reset the state machine.
    /// Also the disconnect cleanup path.
    pub fn teardown_tracks(&mut self) {
        for track in &self.tracks {
            track.lock().unbind_rtp();
        }
        *self.state.write() = SessionState::Init;
    }
}
