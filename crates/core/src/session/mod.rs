//! Session-side state: tracks and the RTSP session lifecycle.
//!
//! A [`Track`] binds one media stream adapter to at most one RTP session.
//! Track ids are assigned sequentially and match the SDP `trackID` control
//! attribute. The RTP session is created by SETUP and destroyed by TEARDOWN
//! or peer disconnect.
//!
//! ```text
//! SETUP          -> Ready
//! PLAY / RECORD  -> Playing
//! PAUSE          -> Paused
//! TEARDOWN       -> Init (tracks unbound)
//! ```

pub mod transport;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::media::MediaStream;
use crate::rtp::RtpSession;

pub use transport::TransportHeader;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport negotiated yet.
    Init,
    /// At least one SETUP completed.
    Ready,
    /// Media is flowing.
    Playing,
    /// Delivery suspended; PLAY resumes.
    Paused,
}

/// One media track: a stream adapter plus its (optional) RTP session.
pub struct Track {
    pub id: usize,
    stream: Box<dyn MediaStream>,
    rtp: Option<RtpSession>,
}

impl Track {
    pub fn new(id: usize, stream: Box<dyn MediaStream>) -> Self {
        Self {
            id,
            stream,
            rtp: None,
        }
    }

    pub fn stream(&self) -> &dyn MediaStream {
        self.stream.as_ref()
    }

    pub fn has_rtp(&self) -> bool {
        self.rtp.is_some()
    }

    pub fn rtp(&self) -> Option<&RtpSession> {
        self.rtp.as_ref()
    }

    pub fn rtp_mut(&mut self) -> Option<&mut RtpSession> {
        self.rtp.as_mut()
    }

    /// Attach the RTP session created during SETUP.
    pub fn bind_rtp(&mut self, session: RtpSession) {
        tracing::debug!(track = self.id, "RTP session bound");
        self.rtp = Some(session);
    }

    /// Tear down and drop the RTP session (TEARDOWN / disconnect).
    pub fn unbind_rtp(&mut self) {
        if let Some(mut session) = self.rtp.take() {
            session.shutdown();
            tracing::debug!(track = self.id, "RTP session released");
        }
    }

    /// Packetize one complete frame into this track's RTP session.
    ///
    /// Advances the media clock once, fragments through the stream adapter,
    /// then gives the RTCP engine a chance to emit a due report.
    pub fn handle_frame(&mut self, data: &[u8]) -> Result<()> {
        let rtp = self
            .rtp
            .as_mut()
            .ok_or(RtspError::TransportNotConfigured(self.id))?;
        rtp.begin_frame();
        self.stream.handle_frame(rtp, data)?;
        rtp.poll_rtcp()
    }
}

/// Shared, lock-protected track table. Sequentially-assigned indexes are
/// the track ids.
pub type TrackSet = Vec<Arc<Mutex<Track>>>;

/// Add a stream to a track table, returning the new track's id.
pub fn add_track(tracks: &mut TrackSet, stream: Box<dyn MediaStream>) -> usize {
    let id = tracks.len();
    tracks.push(Arc::new(Mutex::new(Track::new(id, stream))));
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::G711aStream;

    #[test]
    fn track_ids_are_sequential() {
        let mut tracks = TrackSet::new();
        assert_eq!(add_track(&mut tracks, Box::new(G711aStream::new())), 0);
        assert_eq!(add_track(&mut tracks, Box::new(G711aStream::new())), 1);
        assert_eq!(tracks[1].lock().id, 1);
    }

    #[test]
    fn frame_without_setup_is_rejected() {
        let mut track = Track::new(0, Box::new(G711aStream::new()));
        assert!(matches!(
            track.handle_frame(&[0u8; 8]),
            Err(RtspError::TransportNotConfigured(0))
        ));
    }
}
