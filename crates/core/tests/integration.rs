//! Integration tests: full RTSP handshake against the server, and the
//! client push sequence against a scripted peer.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;

use rtcam::rtp::packet::RtpHeader;
use rtcam::{G711aStream, MjpegStream, RtspClient, RtspServer, ServerConfig, TransportMode};

fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;
    read_message(&mut BufReader::new(stream.try_clone()?))
}

/// Read one RTSP message: headers until the blank line, then any
/// `Content-Length` body.
fn read_message(reader: &mut BufReader<TcpStream>) -> std::io::Result<String> {
    let mut message = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        message.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    if let Some(len) = message
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if len > 0 {
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            message.push_str(&String::from_utf8_lossy(&body));
        }
    }
    Ok(message)
}

fn header_value<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    message
        .lines()
        .find(|l| l.to_lowercase().starts_with(&format!("{}:", name.to_lowercase())))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim())
}

const TEST_BIND: &str = "127.0.0.1:18554";

#[test]
fn full_handshake_and_delivery() {
    let mut server = RtspServer::new(ServerConfig {
        bind_addr: TEST_BIND.to_string(),
        resource_path: "live".to_string(),
        ..ServerConfig::default()
    });
    let video = server.add_stream(Box::new(MjpegStream::new()));
    let _audio = server.add_stream(Box::new(G711aStream::new()));
    server.start().expect("server start");

    let addr = TEST_BIND.to_socket_addrs().unwrap().next().unwrap();
    let mut stream =
        TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to server");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let base_uri = "rtsp://127.0.0.1:18554/live";

    // OPTIONS: the exact capability response
    let resp = rtsp_request(
        &mut stream,
        &format!("OPTIONS {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n"),
    )
    .unwrap();
    assert_eq!(
        resp,
        "RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: DESCRIBE, SETUP, TEARDOWN, PLAY, PAUSE\r\n\r\n"
    );

    // DESCRIBE: SDP with one m= section per track
    let resp = rtsp_request(
        &mut stream,
        &format!("DESCRIBE {base_uri} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "DESCRIBE: {resp}");
    assert!(resp.contains("CSeq: 2\r\n"));
    assert!(resp.contains("Content-Type: application/sdp"));
    assert!(resp.contains("v=0\r\n"));
    assert_eq!(resp.matches("m=").count(), 2);
    assert!(resp.contains("m=video 0 RTP/AVP 26"));
    assert!(resp.contains("a=rtpmap:26 JPEG/90000"));
    assert!(resp.contains("a=control:trackID=0"));
    assert!(resp.contains("a=control:trackID=1"));

    // SETUP video on a UDP port pair we actually hold
    let rtp_receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    rtp_receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let client_rtp = rtp_receiver.local_addr().unwrap().port();

    let resp = rtsp_request(
        &mut stream,
        &format!(
            "SETUP {base_uri}/trackID={video} RTSP/1.0\r\nCSeq: 3\r\n\
             Transport: RTP/AVP;unicast;client_port={client_rtp}-{}\r\n\r\n",
            client_rtp + 1
        ),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {resp}");
    assert!(resp.contains("CSeq: 3\r\n"));

    let session_id = header_value(&resp, "session")
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .expect("SETUP must return a Session id");
    assert!(!session_id.is_empty());

    let transport = header_value(&resp, "transport").expect("SETUP Transport header");
    let server_port: u16 = transport
        .split(';')
        .find_map(|p| p.trim().strip_prefix("server_port="))
        .and_then(|v| v.split('-').next())
        .and_then(|v| v.parse().ok())
        .expect("server_port in Transport");
    assert!(
        (6970..7000).contains(&server_port),
        "server port {server_port} outside probe range"
    );

    // PLAY
    let resp = rtsp_request(
        &mut stream,
        &format!("PLAY {base_uri} RTSP/1.0\r\nCSeq: 4\r\nSession: {session_id}\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PLAY: {resp}");
    assert!(resp.contains("CSeq: 4\r\n"));
    assert!(resp.contains("Range: npt=0.000-\r\n"));
    assert!(server.is_playing());

    // a pushed frame reaches the negotiated client port
    server.handle_frame(video, &[0x5A; 400]).unwrap();
    let mut buf = [0u8; 2048];
    let (len, from) = rtp_receiver.recv_from(&mut buf).expect("RTP delivery");
    assert_eq!(from.port(), server_port);
    let header = RtpHeader::parse(&buf[..len]).expect("valid RTP header");
    assert_eq!(header.payload_type, 26);
    assert!(header.marker, "single-fragment frame carries the marker");

    // TEARDOWN stops delivery
    let resp = rtsp_request(
        &mut stream,
        &format!("TEARDOWN {base_uri} RTSP/1.0\r\nCSeq: 5\r\nSession: {session_id}\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "TEARDOWN: {resp}");
    assert!(!server.is_playing());

    server.stop();
}

/// Scripted media server for exercising the push client. SETUP responses
/// assign `server_rtp_port` as the server-side RTP port.
fn scripted_push_server(
    listener: TcpListener,
    server_rtp_port: u16,
    reject_options: bool,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (stream, _) = match listener.accept() {
            Ok(pair) => pair,
            Err(_) => return,
        };
        let mut writer = stream.try_clone().expect("clone stream");
        let mut reader = BufReader::new(stream);

        loop {
            let request = match read_message(&mut reader) {
                Ok(text) if !text.is_empty() => text,
                _ => return,
            };
            let method = request.split_whitespace().next().unwrap_or("").to_string();
            let cseq = header_value(&request, "cseq").unwrap_or("0").to_string();

            let response = match method.as_str() {
                "OPTIONS" if reject_options => {
                    format!("RTSP/1.0 403 Forbidden\r\nCSeq: {cseq}\r\n\r\n")
                }
                "OPTIONS" => format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nPublic: OPTIONS, ANNOUNCE, SETUP, RECORD, TEARDOWN\r\n\r\n"
                ),
                "SETUP" => {
                    // echo the client ports, assign our own pair
                    let client_ports = header_value(&request, "transport")
                        .and_then(|t| {
                            t.split(';').find_map(|p| p.trim().strip_prefix("client_port="))
                        })
                        .unwrap_or("0-0")
                        .to_string();
                    format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                         Transport: RTP/AVP;unicast;client_port={client_ports};server_port={server_rtp_port}-{}\r\n\
                         Session: 7B3F9A01\r\n\r\n",
                        server_rtp_port + 1
                    )
                }
                _ => format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nSession: 7B3F9A01\r\n\r\n"),
            };
            if writer.write_all(response.as_bytes()).is_err() {
                return;
            }
        }
    })
}

#[test]
fn push_sequence_registers_and_streams() {
    // the port the scripted server will hand out as its server_port
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let server_rtp_port = receiver.local_addr().unwrap().port();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = scripted_push_server(listener, server_rtp_port, false);

    let mut client = RtspClient::connect(&format!("rtsp://127.0.0.1:{port}/push")).unwrap();
    let audio = client.add_stream(Box::new(G711aStream::new()));
    client.push_media(TransportMode::Udp).unwrap();
    assert!(client.is_recording());

    client.handle_frame(audio, &[0x7F; 160]).unwrap();
    let mut buf = [0u8; 512];
    let (len, _) = receiver.recv_from(&mut buf).expect("pushed RTP frame");
    let header = RtpHeader::parse(&buf[..len]).expect("valid RTP header");
    assert_eq!(header.payload_type, 8);

    client.teardown().unwrap();
    assert!(!client.is_recording());
    drop(client);
    let _ = handle.join();
}

#[test]
fn push_sequence_aborts_on_error_status() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = scripted_push_server(listener, 6000, true);

    let mut client = RtspClient::connect(&format!("rtsp://127.0.0.1:{port}/push")).unwrap();
    client.add_stream(Box::new(G711aStream::new()));
    let err = client.push_media(TransportMode::Udp).unwrap_err();
    assert!(matches!(
        err,
        rtcam::RtspError::UnexpectedStatus { code: 403, .. }
    ));
    assert!(!client.is_recording());
    drop(client);
    let _ = handle.join();
}
