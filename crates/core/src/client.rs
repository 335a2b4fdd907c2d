//! RTSP push client: registers this device's tracks with a remote media
//! server and streams to it.
//!
//! The push sequence is `OPTIONS → ANNOUNCE(SDP) → SETUP per track →
//! RECORD`. Each step sends one request and blocks for its response; any
//! status other than 200 aborts the sequence.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::RngExt;

use crate::error::{Result, RtspError};
use crate::media::MediaStream;
use crate::protocol::request::{RtspMethod, RtspUrl};
use crate::protocol::response::{ResponseMessage, USER_AGENT};
use crate::protocol::sdp::{self, SdpTrack};
use crate::rtp::{RtpSession, RtpSessionConfig, SharedTcpStream, TransportMode};
use crate::session::{TrackSet, TransportHeader, add_track};

/// Bound on each blocking response read.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// A pushing device registering with a remote RTSP server.
pub struct RtspClient {
    uri: String,
    url: RtspUrl,
    reader: BufReader<TcpStream>,
    writer: SharedTcpStream,
    peer_ip: IpAddr,
    cseq: u32,
    session_id: String,
    tracks: TrackSet,
    bandwidth: u32,
    recording: bool,
}

impl RtspClient {
    /// Connect the RTSP TCP socket to the server named by the URL.
    pub fn connect(url: &str) -> Result<Self> {
        let parsed = RtspUrl::parse(url)?;
        let stream = TcpStream::connect((parsed.host.as_str(), parsed.port))?;
        stream.set_read_timeout(Some(RESPONSE_TIMEOUT))?;
        let peer_ip = stream.peer_addr()?.ip();
        let reader = BufReader::new(stream.try_clone()?);

        tracing::info!(host = %parsed.host, port = parsed.port, "connected to media server");

        Ok(Self {
            uri: format!("rtsp://{}:{}/{}", parsed.host, parsed.port, parsed.suffix),
            url: parsed,
            reader,
            writer: Arc::new(Mutex::new(stream)),
            peer_ip,
            cseq: 0,
            session_id: format!("{:08X}", rand::rng().random::<u32>()),
            tracks: TrackSet::new(),
            bandwidth: 1000,
            recording: false,
        })
    }

    /// Register a media stream; returns its track id.
    pub fn add_stream(&mut self, stream: Box<dyn MediaStream>) -> usize {
        add_track(&mut self.tracks, stream)
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Run the push registration sequence and bind each track's transport.
    pub fn push_media(&mut self, mode: TransportMode) -> Result<()> {
        self.options()?;
        self.announce()?;

        for track_arc in self.tracks.clone() {
            let track_id = track_arc.lock().id;
            let channels = ((2 * track_id) as u8, (2 * track_id + 1) as u8);

            let mut rtp = {
                let track = track_arc.lock();
                RtpSession::new(RtpSessionConfig {
                    mode,
                    peer_ip: self.peer_ip,
                    peer_rtp_port: 0, // learned from the SETUP response
                    tcp: Some(self.writer.clone()),
                    rtp_channel: channels.0,
                    payload_type: track.stream().payload_type(),
                    clock_rate: track.stream().clock_rate(),
                    bandwidth: self.bandwidth,
                    cname: format!("rtcam-{}", self.session_id),
                })?
            };
            let local_ports = rtp.server_ports();

            let transport =
                TransportHeader::serialize_push_request(mode, local_ports.0, local_ports.1, channels);
            let uri = format!("{}/trackID={track_id}", self.uri);
            let response = self.request(
                RtspMethod::Setup,
                &uri,
                &[("Transport", transport)],
                None,
            )?;

            // bind our peer to the server-side assignment
            let assigned = response
                .get_header("Transport")
                .and_then(TransportHeader::parse);
            match assigned {
                Some(assigned) => {
                    if let Some((server_rtp, _)) = assigned.server_ports {
                        rtp.set_peer_rtp_port(server_rtp);
                        tracing::info!(track_id, server_rtp, "server ports assigned");
                    }
                    if let Some((rtp_channel, _)) = assigned.interleaved {
                        rtp.set_rtp_channel(rtp_channel);
                        tracing::info!(track_id, rtp_channel, "interleaved channels assigned");
                    }
                }
                None => {
                    tracing::warn!(track_id, "SETUP response without usable Transport header");
                }
            }
            track_arc.lock().bind_rtp(rtp);
        }

        self.record()?;
        self.recording = true;
        tracing::info!(uri = %self.uri, tracks = self.tracks.len(), "push session recording");
        Ok(())
    }

    /// Packetize one frame into a registered track. Frames arriving before
    /// RECORD completes are dropped.
    pub fn handle_frame(&self, track_id: usize, data: &[u8]) -> Result<()> {
        if !self.recording {
            return Ok(());
        }
        let track = self
            .tracks
            .get(track_id)
            .ok_or(RtspError::TrackNotFound(track_id))?;
        track.lock().handle_frame(data)
    }

    /// End the push session and release every track's transport.
    pub fn teardown(&mut self) -> Result<()> {
        self.recording = false;
        let result = self.request(RtspMethod::Teardown, &self.uri.clone(), &[], None);
        for track in &self.tracks {
            track.lock().unbind_rtp();
        }
        result.map(|_| ())
    }

    fn options(&mut self) -> Result<()> {
        let response = self.request(RtspMethod::Options, &self.uri.clone(), &[], None)?;
        if let Some(public) = response.get_header("Public") {
            let supported: Vec<&str> = RtspMethod::ALL
                .iter()
                .map(RtspMethod::as_str)
                .filter(|m| public.contains(m))
                .collect();
            tracing::debug!(?supported, "server methods");
        }
        Ok(())
    }

    fn announce(&mut self) -> Result<()> {
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
        let body = sdp::generate_sdp(&entries, &self.url.host, "rtcam", false);
        self.request(
            RtspMethod::Announce,
            &self.uri.clone(),
            &[("Content-Type", "application/sdp".to_string())],
            Some(body),
        )
        .map(|_| ())
    }

    fn record(&mut self) -> Result<()> {
        self.request(
            RtspMethod::Record,
            &self.uri.clone(),
            &[("Range", "npt=0.000-".to_string())],
            None,
        )
        .map(|_| ())
    }

    /// Send one request and block for its response.
    ///
    /// A CSeq mismatch in the response is logged but not fatal; a status
    /// other than 200 aborts with [`RtspError::UnexpectedStatus`].
    fn request(
        &mut self,
        method: RtspMethod,
        uri: &str,
        extra_headers: &[(&str, String)],
        body: Option<String>,
    ) -> Result<ResponseMessage> {
        self.cseq += 1;

        let mut text = format!("{} {uri} RTSP/1.0\r\n", method.as_str());
        for (name, value) in extra_headers {
            text.push_str(&format!("{name}: {value}\r\n"));
        }
        text.push_str(&format!("CSeq: {}\r\n", self.cseq));
        text.push_str(&format!("User-Agent: {USER_AGENT}\r\n"));
        text.push_str(&format!("Session: {}\r\n", self.session_id));
        match &body {
            Some(body) => {
                text.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                text.push_str(body);
            }
            None => text.push_str("\r\n"),
        }

        self.writer.lock().write_all(text.as_bytes())?;
        tracing::debug!(method = method.as_str(), cseq = self.cseq, "request sent");

        let response = self.read_response()?;
        if response.cseq() != Some(self.cseq) {
            tracing::warn!(
                expected = self.cseq,
                got = ?response.cseq(),
                "CSeq mismatch in response"
            );
        }
        if let Some(session_id) = response.session_id() {
            self.session_id = session_id.to_string();
        }
        if response.status_code != 200 {
            tracing::error!(
                method = method.as_str(),
                status = response.status_code,
                "push step rejected"
            );
            return Err(RtspError::UnexpectedStatus {
                method: method.as_str(),
                code: response.status_code,
            });
        }
        Ok(response)
    }

    fn read_response(&mut self) -> Result<ResponseMessage> {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return Err(RtspError::PeerClosed),
                Ok(_) => {
                    text.push_str(&line);
                    if line == "\r\n" || line == "\n" {
                        break;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        let response = ResponseMessage::parse(&text)?;

        // drain any body so the next response starts clean
        let body_len = response
            .get_header("Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        if body_len > 0 {
            let mut body = vec![0u8; body_len];
            self.reader.read_exact(&mut body)?;
        }
        Ok(response)
    }
}
