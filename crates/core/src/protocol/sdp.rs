//! SDP generation (RFC 4566 subset) for DESCRIBE responses and ANNOUNCE
//! bodies.
//!
//! ```text
//! v=0
//! o=- 1834721 1 IN IP4 192.168.1.5
//! s=rtcam
//! t=0 0
//! a=control:*
//! m=video 0 RTP/AVP 26
//! a=rtpmap:26 JPEG/90000
//! a=control:trackID=0
//! m=audio 0 RTP/AVP 8
//! a=rtpmap:8 PCMA/8000/1
//! a=control:trackID=1
//! ```
//!
//! Multicast sessions add `a=type:broadcast` at session level and a
//! `c=` line per media section.

use rand::RngExt;

/// What the SDP builder needs from one track.
pub struct SdpTrack {
    pub id: usize,
    /// `m=` line, from [`MediaStream::media_description`](crate::media::MediaStream::media_description).
    pub description: String,
    /// `a=` lines, from [`MediaStream::sdp_attributes`](crate::media::MediaStream::sdp_attributes).
    pub attributes: Vec<String>,
}

/// Build the session description for the given tracks.
///
/// Emits exactly one `m=` section and one `a=control:trackID=` line per
/// track, ids matching the track table.
pub fn generate_sdp(tracks: &[SdpTrack], host: &str, session_name: &str, multicast: bool) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(8 + tracks.len() * 4);

    lines.push("v=0".to_string());
    lines.push(format!(
        "o=- {} 1 IN IP4 {host}",
        rand::rng().random::<u32>()
    ));
    lines.push(format!("s={session_name}"));
    lines.push("t=0 0".to_string());
    lines.push("a=control:*".to_string());
    if multicast {
        lines.push("a=type:broadcast".to_string());
        lines.push("a=rtcp-unicast: reflection".to_string());
    }

    for track in tracks {
        lines.push(track.description.clone());
        if multicast {
            lines.push("c=IN IP4 0.0.0.0/255".to_string());
        }
        lines.extend(track.attributes.iter().cloned());
        lines.push(format!("a=control:trackID={}", track.id));
    }

    let mut sdp = lines.join("\r\n");
    sdp.push_str("\r\n");
    sdp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{G711aStream, MediaStream, MjpegStream};

    fn tracks() -> Vec<SdpTrack> {
        let video = MjpegStream::new();
        let audio = G711aStream::new();
        vec![
            SdpTrack {
                id: 0,
                description: video.media_description(0),
                attributes: video.sdp_attributes(),
            },
            SdpTrack {
                id: 1,
                description: audio.media_description(0),
                attributes: audio.sdp_attributes(),
            },
        ]
    }

    #[test]
    fn one_media_section_per_track() {
        let sdp = generate_sdp(&tracks(), "192.168.1.5", "cam", false);
        assert_eq!(sdp.matches("m=").count(), 2);
        assert_eq!(sdp.matches("a=control:trackID=").count(), 2);
        assert!(sdp.contains("m=video 0 RTP/AVP 26\r\n"));
        assert!(sdp.contains("m=audio 0 RTP/AVP 8\r\n"));
        assert!(sdp.contains("a=control:trackID=0\r\n"));
        assert!(sdp.contains("a=control:trackID=1\r\n"));
    }

    #[test]
    fn session_level_lines_precede_media() {
        let sdp = generate_sdp(&tracks(), "10.0.0.1", "cam", false);
        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("o=- "));
        assert!(sdp.contains(" 1 IN IP4 10.0.0.1\r\n"));
        assert!(sdp.contains("s=cam\r\n"));
        assert!(sdp.contains("t=0 0\r\n"));
        let control = sdp.find("a=control:*").unwrap();
        let media = sdp.find("m=video").unwrap();
        assert!(control < media);
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn rtpmap_follows_its_media_section() {
        let sdp = generate_sdp(&tracks(), "10.0.0.1", "cam", false);
        let m_video = sdp.find("m=video").unwrap();
        let rtpmap = sdp.find("a=rtpmap:26 JPEG/90000").unwrap();
        let m_audio = sdp.find("m=audio").unwrap();
        assert!(m_video < rtpmap && rtpmap < m_audio);
    }

    #[test]
    fn multicast_adds_broadcast_attrs() {
        let sdp = generate_sdp(&tracks(), "10.0.0.1", "cam", true);
        assert!(sdp.contains("a=type:broadcast\r\n"));
        assert_eq!(sdp.matches("c=IN IP4 0.0.0.0/255\r\n").count(), 2);
    }
}
