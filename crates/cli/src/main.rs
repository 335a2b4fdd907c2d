use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use rtcam::{G711aStream, MjpegStream, RtspServer, ServerConfig};

#[derive(Parser)]
#[command(
    name = "rtcam-server",
    about = "Standalone RTSP server looping a JPEG file with a PCMA audio track"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Resource path clients request (rtsp://host:port/<path>)
    #[arg(long, default_value = "live")]
    path: String,

    /// JPEG file looped as the video track
    #[arg(long)]
    jpeg: Option<PathBuf>,

    /// Video frame rate
    #[arg(long, default_value_t = 25)]
    fps: u32,
}

/// 20 ms of A-law silence at 8 kHz.
const AUDIO_FRAME: [u8; 160] = [0xD5; 160];

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let fps = args.fps.max(1);

    let jpeg_frame = match &args.jpeg {
        Some(path) => match std::fs::read(path) {
            Ok(data) => Some(data),
            Err(e) => {
                eprintln!("Failed to read {}: {e}", path.display());
                return;
            }
        },
        None => None,
    };

    let mut server = RtspServer::new(ServerConfig {
        bind_addr: args.bind.clone(),
        resource_path: args.path.clone(),
        ..ServerConfig::default()
    });

    let video_track = jpeg_frame
        .as_ref()
        .map(|_| server.add_stream(Box::new(MjpegStream::new())));
    let audio_track = server.add_stream(Box::new(G711aStream::new()));

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {e}");
        return;
    }

    let server = Arc::new(server);

    if let (Some(track), Some(frame)) = (video_track, jpeg_frame) {
        let server = server.clone();
        thread::spawn(move || {
            let interval = Duration::from_millis(u64::from(1000 / fps));
            while server.is_running() {
                if server.is_playing() {
                    if let Err(e) = server.handle_frame(track, &frame) {
                        tracing::warn!(error = %e, "video frame dropped");
                    }
                }
                thread::sleep(interval);
            }
        });
    }

    {
        let server = server.clone();
        thread::spawn(move || {
            while server.is_running() {
                if server.is_playing() {
                    if let Err(e) = server.handle_frame(audio_track, &AUDIO_FRAME) {
                        tracing::warn!(error = %e, "audio frame dropped");
                    }
                }
                thread::sleep(Duration::from_millis(20));
            }
        });
    }

    println!(
        "RTSP server on rtsp://{}/{} — press Enter to stop",
        args.bind, args.path
    );
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);

    server.stop();
}
