//! HTTP surface: live stream, pause toggle, settings and health.
//!
//! Plain `std::net` server; one thread per connection so a long-lived `/video`
//! response never blocks the settings endpoints.

use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::pipeline::PauseHandle;
use crate::settings::{Settings, SettingsProvider, SettingsUpdate};
use crate::stream::{StreamHub, CONTENT_TYPE};

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 4096;
const STREAM_POLL: Duration = Duration::from_millis(500);
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5001".to_string(),
        }
    }
}

/// Everything a request handler may touch.
#[derive(Clone)]
pub struct ApiState {
    pub hub: Arc<StreamHub>,
    pub settings: Arc<dyn SettingsProvider>,
    pub pause: PauseHandle,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("http api listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, state, shutdown_thread) {
                log::error!("http api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: ApiState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let state = state.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &state, &shutdown) {
                        log::warn!("http request from {} rejected: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    state: &ApiState,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => {
            let settings = state.settings.current().ok();
            let page = index_page(state.pause.is_paused(), settings.as_ref());
            write_response(&mut stream, 200, "text/html; charset=utf-8", page.as_bytes())
        }
        ("GET", "/video") => serve_video(stream, state, shutdown),
        ("POST", "/toggle_feed") => {
            let paused = state.pause.toggle();
            log::info!("feed {}", if paused { "paused" } else { "resumed" });
            write_json(&mut stream, 200, &json!({ "paused": paused }))
        }
        ("GET", "/settings") => match state.settings.current() {
            Ok(settings) => write_json(&mut stream, 200, &json!(settings)),
            Err(err) => {
                log::error!("settings record unreadable: {:#}", err);
                write_json(&mut stream, 500, &json!({ "error": format!("{:#}", err) }))
            }
        },
        ("POST", "/settings") => match update_settings(&request, state.settings.as_ref()) {
            Ok(settings) => {
                log::info!(
                    "settings updated: mode={} sensitivity={}",
                    settings.detection_mode,
                    settings.sensitivity
                );
                write_json(
                    &mut stream,
                    200,
                    &json!({ "status": "updated", "settings": settings }),
                )
            }
            Err(err) => {
                log::warn!("settings update rejected: {:#}", err);
                write_json(&mut stream, 400, &json!({ "error": format!("{:#}", err) }))
            }
        },
        ("GET", "/health") => write_json(
            &mut stream,
            200,
            &json!({
                "status": "ok",
                "paused": state.pause.is_paused(),
                "camera_healthy": state.hub.source_healthy(),
                "viewers": state.hub.subscriber_count(),
            }),
        ),
        (_, "/" | "/video" | "/toggle_feed" | "/settings" | "/health") => {
            write_json(&mut stream, 405, &json!({ "error": "method_not_allowed" }))
        }
        _ => write_json(&mut stream, 404, &json!({ "error": "not_found" })),
    }
}

fn update_settings(request: &HttpRequest, provider: &dyn SettingsProvider) -> Result<Settings> {
    let update = if request.is_json() {
        SettingsUpdate::from_json(&request.body)?
    } else {
        SettingsUpdate::from_form(&request.body)?
    };
    // A complete update may replace a record that no longer parses.
    match (update.detection_mode, update.sensitivity) {
        (Some(detection_mode), Some(sensitivity)) => {
            let next = Settings {
                detection_mode,
                sensitivity,
            };
            provider.update(next)?;
            Ok(next)
        }
        _ => provider.modify(&|current| current.apply(&update)),
    }
}

fn serve_video(mut stream: TcpStream, state: &ApiState, shutdown: &AtomicBool) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {CONTENT_TYPE}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;

    let subscription = state.hub.subscribe();
    while !shutdown.load(Ordering::SeqCst) {
        let Some(chunk) = subscription.recv_timeout(STREAM_POLL) else {
            // No frames while paused, so no failing write would notice a hangup.
            if peer_closed(&stream) {
                log::info!("video consumer disconnected while idle");
                break;
            }
            continue;
        };
        if let Err(err) = stream.write_all(&chunk).and_then(|_| stream.flush()) {
            log::info!("video consumer disconnected: {}", err);
            break;
        }
    }
    Ok(())
}

/// The request has been consumed by now, so a readable EOF means the peer
/// hung up.
fn peer_closed(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut byte = [0u8; 1];
    let closed = match stream.peek(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) => !matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted),
    };
    stream.set_nonblocking(false).is_err() || closed
}

fn index_page(paused: bool, settings: Option<&Settings>) -> String {
    let (mode, sensitivity) = match settings {
        Some(s) => (s.detection_mode.as_str(), s.sensitivity.to_string()),
        None => ("unavailable", "-".to_string()),
    };
    let button = if paused { "Resume" } else { "Pause" };
    format!(
        r#"<!doctype html>
<html>
<head><title>watchpost</title></head>
<body>
<h1>watchpost</h1>
<img src="/video" width="640" height="480" alt="live feed">
<form method="post" action="/toggle_feed"><button type="submit">{button}</button></form>
<form method="post" action="/settings">
<label>Mode <select name="detection_mode">
<option value="motion"{motion_sel}>motion</option>
<option value="ai"{ai_sel}>ai</option>
</select></label>
<label>Sensitivity <input name="sensitivity" type="number" min="1" max="1000" value="{sensitivity}"></label>
<button type="submit">Save</button>
</form>
<p>Current mode: {mode}</p>
</body>
</html>
"#,
        motion_sel = if mode == "motion" { " selected" } else { "" },
        ai_sel = if mode == "ai" { " selected" } else { "" },
    )
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end.min(data.len())..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn is_json(&self) -> bool {
        self.headers
            .get("content-type")
            .map(|ct| ct.to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{DetectionMode, SharedSettings};

    fn request(content_type: &str, body: &[u8]) -> HttpRequest {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        HttpRequest {
            method: "POST".to_string(),
            path: "/settings".to_string(),
            headers,
            body: body.to_vec(),
        }
    }

    #[test]
    fn update_accepts_form_and_json() -> Result<()> {
        let provider = SharedSettings::new(Settings::default())?;
        let form = request(
            "application/x-www-form-urlencoded",
            b"detection_mode=ai&sensitivity=8",
        );
        let next = update_settings(&form, &provider)?;
        assert_eq!(next.detection_mode, DetectionMode::Ai);

        let body = br#"{"sensitivity":11}"#;
        let next = update_settings(&request("application/json", body), &provider)?;
        assert_eq!(next.detection_mode, DetectionMode::Ai);
        assert_eq!(provider.current()?.sensitivity, 11);
        Ok(())
    }

    #[test]
    fn rejected_update_keeps_previous_settings() -> Result<()> {
        let provider = SharedSettings::new(Settings::default())?;
        let bad = request("application/x-www-form-urlencoded", b"detection_mode=thermal");
        assert!(update_settings(&bad, &provider).is_err());
        assert_eq!(provider.current()?, Settings::default());
        Ok(())
    }

    #[test]
    fn index_page_reflects_state() {
        let page = index_page(true, Some(&Settings::default()));
        assert!(page.contains("Resume"));
        assert!(page.contains(r#"<option value="motion" selected>"#));
    }
}
