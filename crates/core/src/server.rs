//! RTSP server: listener, per-connection request loop, and the frame entry
//! points the application's push threads call.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::MediaStream;
use crate::protocol::{MethodHandler, RtspRequest};
use crate::rtp::{SharedTcpStream, now_ms};
use crate::session::{SessionState, TrackSet, add_track};

/// Server-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen address, e.g. `0.0.0.0:8554`.
    pub bind_addr: String,
    /// Registered resource path; OPTIONS for anything else is a 404.
    pub resource_path: String,
    /// SDP `s=` session name.
    pub session_name: String,
    /// Session bandwidth in octets/sec, sizing the RTCP share.
    pub bandwidth: u32,
    /// Bound on each blocking socket read, so shutdown stays responsive.
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8554".to_string(),
            resource_path: "live".to_string(),
            session_name: "rtcam".to_string(),
            bandwidth: 1000,
            read_timeout: Duration::from_millis(1000),
        }
    }
}

/// RTSP server for a single peer connection at a time.
///
/// Register media streams with [`add_stream`](Self::add_stream), call
/// [`start`](Self::start), then feed frames from the application's push
/// threads through [`handle_frame`](Self::handle_frame); delivery is gated
/// on the session's Playing state.
pub struct RtspServer {
    config: Arc<ServerConfig>,
    tracks: TrackSet,
    state: Arc<RwLock<SessionState>>,
    running: Arc<AtomicBool>,
}

impl RtspServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            tracks: TrackSet::new(),
            state: Arc::new(RwLock::new(SessionState::Init)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a media stream; returns its track id (also the SDP
    /// `trackID`). Call before [`start`](Self::start).
    pub fn add_stream(&mut self, stream: Box<dyn MediaStream>) -> usize {
        add_track(&mut self.tracks, stream)
    }

    /// Bind the listener and spawn the accept loop.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("server already running");
            return Ok(());
        }

        let listener = TcpListener::bind(&self.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %self.config.bind_addr, resource = %self.config.resource_path, "RTSP server listening");

        let config = self.config.clone();
        let tracks = self.tracks.clone();
        let state = self.state.clone();
        let running = self.running.clone();
        thread::Builder::new().name("rtsp-accept".into()).spawn(move || {
            accept_loop(listener, config, tracks, state, running);
        })?;
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the current session is delivering media.
    pub fn is_playing(&self) -> bool {
        *self.state.read() == SessionState::Playing
    }

    /// Packetize one frame into the given track.
    ///
    /// A frame arriving while the session is not Playing, or before the
    /// track's SETUP, is dropped silently — push threads run on their own
    /// cadence and simply outpace session state around transitions.
    pub fn handle_frame(&self, track_id: usize, data: &[u8]) -> Result<()> {
        if !self.is_playing() {
            return Ok(());
        }
        let track = self
            .tracks
            .get(track_id)
            .ok_or(RtspError::TrackNotFound(track_id))?;
        let mut track = track.lock();
        if !track.has_rtp() {
            return Ok(());
        }
        track.handle_frame(data)
    }
}

impl Drop for RtspServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Accept connections one peer at a time; each connection runs its request
/// loop to completion before the next accept.
fn accept_loop(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    tracks: TrackSet,
    state: Arc<RwLock<SessionState>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                Connection::handle(stream, peer_addr, &config, &tracks, &state, &running);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP peer connection.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: SharedTcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
    tracks: TrackSet,
}

impl Connection {
    fn handle(
        stream: TcpStream,
        peer_addr: SocketAddr,
        config: &ServerConfig,
        tracks: &TrackSet,
        state: &Arc<RwLock<SessionState>>,
        running: &Arc<AtomicBool>,
    ) {
        tracing::info!(%peer_addr, "client connected");

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };
        if reader_stream
            .set_read_timeout(Some(config.read_timeout))
            .is_err()
        {
            return;
        }

        let writer: SharedTcpStream = Arc::new(Mutex::new(stream));
        let handler = MethodHandler::new(
            &config.resource_path,
            &config.session_name,
            config.bandwidth,
            peer_addr,
            writer.clone(),
            tracks.clone(),
            state.clone(),
        );

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer,
            handler,
            peer_addr,
            tracks: tracks.clone(),
        };

        let reason = conn.run(running);
        conn.handler.teardown_tracks();
        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        while running.load(Ordering::SeqCst) {
            // Peek one byte: '$' means an interleaved RTP/RTCP record is
            // sharing the socket and must not reach the text parser.
            let first = match self.reader.fill_buf() {
                Ok([]) => return "connection closed by peer",
                Ok(buf) => buf[0],
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => return "read error",
            };

            if first == b'$' {
                if self.read_interleaved().is_err() {
                    return "read error";
                }
                continue;
            }

            let text = match self.read_request_text() {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(RtspError::PeerClosed) => return "connection closed by peer",
                Err(_) => return "read error",
            };
            if text.trim().is_empty() {
                continue;
            }

            match RtspRequest::parse(&text) {
                Ok(request) => {
                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = request.method.as_str(),
                        uri = %request.uri,
                        cseq = request.cseq,
                        "request"
                    );
                    let response = self.handler.handle(&request);
                    tracing::debug!(peer = %self.peer_addr, status = response.status_code, "response");
                    if self
                        .writer
                        .lock()
                        .write_all(response.serialize().as_bytes())
                        .is_err()
                    {
                        return "write error";
                    }
                }
                Err(RtspError::Parse {
                    kind: ParseErrorKind::UnknownMethod,
                }) => {
                    // not dispatched; the connection stays open
                    tracing::warn!(peer = %self.peer_addr, "unknown RTSP method ignored");
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "request parse error");
                }
            }
        }
        "server shutting down"
    }

    /// Read one request: header block terminated by a blank line, then any
    /// `Content-Length` body (drained; ANNOUNCE bodies are acknowledged, not
    /// interpreted).
    fn read_request_text(&mut self) -> Result<Option<String>> {
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
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if text.is_empty() {
                        return Ok(None);
                    }
                    // mid-request stall: keep collecting the rest
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let body_len = text
            .lines()
            .find(|l| l.to_ascii_lowercase().starts_with("content-length:"))
            .and_then(|l| l.split(':').nth(1))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if body_len > 0 {
            let mut body = vec![0u8; body_len];
            self.reader.read_exact(&mut body)?;
            tracing::trace!(bytes = body_len, "request body drained");
        }
        Ok(Some(text))
    }

    /// Consume one `$`-framed record and feed RTCP channels into the
    /// owning track's engine.
    fn read_interleaved(&mut self) -> Result<()> {
        let mut head = [0u8; 4];
        self.reader.read_exact(&mut head)?;
        let channel = head[1];
        let len = u16::from_be_bytes([head[2], head[3]]) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;

        for track in &self.tracks {
            let track = track.lock();
            let Some(rtp_channel) = track.rtp().and_then(|r| r.rtp_channel()) else {
                continue;
            };
            if channel == rtp_channel + 1 {
                let engine = track.rtp().map(|r| r.rtcp_engine());
                drop(track);
                if let Some(engine) = engine {
                    if let Err(e) = engine.lock().handle_packet(&payload, now_ms()) {
                        tracing::warn!(error = %e, channel, "malformed interleaved RTCP");
                    }
                }
                return Ok(());
            }
            if channel == rtp_channel {
                tracing::trace!(channel, bytes = len, "interleaved RTP record ignored");
                return Ok(());
            }
        }
        tracing::warn!(channel, bytes = len, "interleaved record for unknown channel");
        Ok(())
    }
}
