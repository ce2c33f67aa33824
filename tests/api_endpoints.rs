use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use watchpost::api::{ApiConfig, ApiHandle, ApiServer, ApiState};
use watchpost::settings::{DetectionMode, FileSettingsStore, Settings, SettingsProvider};
use watchpost::{
    open_source, CameraSettings, FramePipeline, MjpegStream, PauseHandle, PipelineConfig,
    SnapshotStore, StreamEncoder, StreamHub,
};

struct TestServer {
    handle: ApiHandle,
    settings: Arc<FileSettingsStore>,
    pause: PauseHandle,
    hub: Arc<StreamHub>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn start() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let settings = Arc::new(FileSettingsStore::open_or_init(
            dir.path().join("settings.json"),
        )?);
        let pause = PauseHandle::new();
        let camera = CameraSettings {
            device: "stub://api-test".to_string(),
            target_fps: 20,
            width: 64,
            height: 48,
        };
        let pipeline = FramePipeline::new(
            PipelineConfig {
                width: 64,
                height: 48,
                ..PipelineConfig::default()
            },
            open_source(&camera)?,
            settings.clone(),
            SnapshotStore::new(dir.path().join("snapshots"))?,
        )
        .with_pause(pause.clone());
        let stream = MjpegStream::new(pipeline, StreamEncoder::jpeg())
            .with_idle_backoff(Duration::from_millis(5));
        let hub = Arc::new(StreamHub::spawn(stream, Duration::from_millis(20))?);

        let handle = ApiServer::new(
            ApiConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            ApiState {
                hub: hub.clone(),
                settings: settings.clone(),
                pause: pause.clone(),
            },
        )
        .spawn()?;
        Ok(Self {
            handle,
            settings,
            pause,
            hub,
            _dir: dir,
        })
    }

    fn addr(&self) -> SocketAddr {
        self.handle.addr
    }
}

struct Response {
    status: u16,
    headers: String,
    body: String,
}

fn request(addr: SocketAddr, method: &str, path: &str, content_type: &str, body: &str) -> Result<Response> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(req.as_bytes())?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    parse_response(&raw)
}

fn get(addr: SocketAddr, path: &str) -> Result<Response> {
    request(addr, "GET", path, "text/plain", "")
}

fn parse_response(raw: &[u8]) -> Result<Response> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| anyhow!("malformed response"))?;
    let status = head
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("missing status"))?
        .parse()?;
    Ok(Response {
        status,
        headers: head.to_string(),
        body: body.to_string(),
    })
}

#[test]
fn health_and_toggle_feed() -> Result<()> {
    let server = TestServer::start()?;

    let health = get(server.addr(), "/health")?;
    assert_eq!(health.status, 200);
    let json: serde_json::Value = serde_json::from_str(&health.body)?;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["paused"], false);

    let toggled = request(server.addr(), "POST", "/toggle_feed", "text/plain", "")?;
    assert_eq!(toggled.status, 200);
    let json: serde_json::Value = serde_json::from_str(&toggled.body)?;
    assert_eq!(json["paused"], true);
    assert!(server.pause.is_paused());

    request(server.addr(), "POST", "/toggle_feed", "text/plain", "")?;
    assert!(!server.pause.is_paused());

    server.handle.stop()?;
    Ok(())
}

#[test]
fn settings_get_and_form_post() -> Result<()> {
    let server = TestServer::start()?;

    let current = get(server.addr(), "/settings")?;
    assert_eq!(current.status, 200);
    let json: serde_json::Value = serde_json::from_str(&current.body)?;
    assert_eq!(json["detection_mode"], "motion");
    assert_eq!(json["sensitivity"], 5);

    let updated = request(
        server.addr(),
        "POST",
        "/settings",
        "application/x-www-form-urlencoded",
        "detection_mode=ai&sensitivity=12",
    )?;
    assert_eq!(updated.status, 200);
    let json: serde_json::Value = serde_json::from_str(&updated.body)?;
    assert_eq!(json["status"], "updated");
    assert_eq!(json["settings"]["detection_mode"], "ai");

    let persisted = server.settings.current()?;
    assert_eq!(persisted.detection_mode, DetectionMode::Ai);
    assert_eq!(persisted.sensitivity, 12);

    server.handle.stop()?;
    Ok(())
}

#[test]
fn invalid_settings_are_rejected_with_diagnostic() -> Result<()> {
    let server = TestServer::start()?;

    let rejected = request(
        server.addr(),
        "POST",
        "/settings",
        "application/json",
        r#"{"detection_mode":"motion","sensitivity":0}"#,
    )?;
    assert_eq!(rejected.status, 400);
    let json: serde_json::Value = serde_json::from_str(&rejected.body)?;
    assert!(json["error"]
        .as_str()
        .map(|e| e.contains("sensitivity"))
        .unwrap_or(false));
    assert_eq!(server.settings.current()?.sensitivity, 5);

    server.handle.stop()?;
    Ok(())
}

#[test]
fn unknown_paths_and_methods() -> Result<()> {
    let server = TestServer::start()?;
    assert_eq!(get(server.addr(), "/nope")?.status, 404);
    assert_eq!(get(server.addr(), "/toggle_feed")?.status, 405);
    assert_eq!(
        request(server.addr(), "DELETE", "/settings", "text/plain", "")?.status,
        405
    );
    let index = get(server.addr(), "/")?;
    assert_eq!(index.status, 200);
    assert!(index.body.contains("/video"));
    server.handle.stop()?;
    Ok(())
}

#[test]
fn video_streams_multipart_frames() -> Result<()> {
    let server = TestServer::start()?;

    let mut stream = TcpStream::connect(server.addr())?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(b"GET /video HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let marker = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    while raw.windows(marker.len()).filter(|w| *w == marker).count() < 2 {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }
    let response = parse_response(&raw)?;
    assert_eq!(response.status, 200);
    assert!(response
        .headers
        .contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));
    assert!(raw.windows(marker.len()).filter(|w| *w == marker).count() >= 2);

    drop(stream);
    server.handle.stop()?;
    Ok(())
}

#[test]
fn concurrent_partial_posts_both_land() -> Result<()> {
    let server = TestServer::start()?;
    let addr = server.addr();

    for round in 0..8u32 {
        server.settings.update(Settings::default())?;
        let sensitivity = 20 + round;
        std::thread::scope(|scope| -> Result<()> {
            let mode = scope.spawn(|| {
                request(addr, "POST", "/settings", "application/json", r#"{"detection_mode":"ai"}"#)
            });
            let level = scope.spawn(move || {
                let body = format!("sensitivity={sensitivity}");
                request(addr, "POST", "/settings", "application/x-www-form-urlencoded", &body)
            });
            for handle in [mode, level] {
                let response = handle.join().map_err(|_| anyhow!("client thread panicked"))??;
                assert_eq!(response.status, 200);
            }
            Ok(())
        })?;

        let stored = server.settings.current()?;
        assert_eq!(stored.detection_mode, DetectionMode::Ai, "round {round}");
        assert_eq!(stored.sensitivity, sensitivity, "round {round}");
    }

    server.handle.stop()?;
    Ok(())
}

#[test]
fn paused_viewer_hangup_releases_its_subscription() -> Result<()> {
    let server = TestServer::start()?;
    server.pause.set_paused(true);

    let mut stream = TcpStream::connect(server.addr())?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(b"GET /video HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let mut head = [0u8; 12];
    stream.read_exact(&mut head)?;
    assert_eq!(&head, b"HTTP/1.1 200");

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.hub.subscriber_count() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.hub.subscriber_count(), 1);

    drop(stream);
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.hub.subscriber_count() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(server.hub.subscriber_count(), 0, "hung-up viewer kept the producer awake");

    server.handle.stop()?;
    Ok(())
}
