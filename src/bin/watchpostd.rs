//! watchpostd - camera monitoring daemon
//!
//! This daemon:
//! 1. Opens the configured camera (or a synthetic `stub://` scene)
//! 2. Runs the frame pipeline on a single producer thread, only while someone
//!    is watching the stream
//! 3. Saves snapshots and sends throttled alerts on motion
//! 4. Serves the stream, pause toggle and settings over HTTP

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use watchpost::api::{ApiConfig, ApiServer, ApiState};
use watchpost::{
    open_source, FileSettingsStore, FramePipeline, LogNotifier, MjpegStream, Notifier,
    ObjectDetector, PauseHandle, PipelineConfig, SettingsProvider, SnapshotStore,
    StreamEncoder, StreamHub, StubBackend, WatchpostConfig,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "WATCHPOST_CONFIG")]
    config: Option<PathBuf>,
    /// Override the HTTP listen address.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = WatchpostConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.api_addr = addr;
    }

    // Refuse to start on a malformed settings record rather than guessing.
    let settings = Arc::new(FileSettingsStore::open_or_init(&cfg.settings_path)?);
    let current = settings.current()?;
    log::info!(
        "settings {}: mode={} sensitivity={}",
        settings.path().display(),
        current.detection_mode,
        current.sensitivity
    );

    let source = open_source(&cfg.camera)?;
    let snapshots = SnapshotStore::new(&cfg.snapshot_dir)?;
    log::info!("snapshots written to {}", snapshots.dir().display());

    let mut detector = build_detector(&cfg)?;
    detector.warm_up()?;

    let pause = PauseHandle::new();
    let pipeline = FramePipeline::new(
        PipelineConfig {
            width: cfg.camera.width,
            height: cfg.camera.height,
            alert_cooldown: cfg.alert_cooldown,
        },
        source,
        settings.clone(),
        snapshots,
    )
    .with_object_detector(detector)
    .with_notifier(build_notifier(&cfg)?)
    .with_pause(pause.clone());

    let stream =
        MjpegStream::new(pipeline, StreamEncoder::jpeg()).with_idle_backoff(cfg.frame_interval());
    let hub = Arc::new(StreamHub::spawn(stream, cfg.frame_interval())?);

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        ApiState {
            hub: hub.clone(),
            settings,
            pause,
        },
    )
    .spawn()?;
    log::info!(
        "watchpostd running: camera {} -> http://{}/video",
        cfg.camera.device,
        api_handle.addr
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::info!(
                    "health: {} viewer(s), {} frame(s) streamed, camera {}",
                    hub.subscriber_count(),
                    hub.chunks_emitted(),
                    if hub.source_healthy() { "ok" } else { "degraded" }
                );
            }
        }
    }

    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    drop(hub);
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn build_detector(cfg: &WatchpostConfig) -> Result<Box<dyn ObjectDetector>> {
    match &cfg.model_path {
        Some(path) => Ok(Box::new(watchpost::detect::TractBackend::new(path)?)),
        None => {
            log::warn!("no detector model configured; ai mode will report no objects");
            Ok(Box::new(StubBackend::new()))
        }
    }
}

#[cfg(not(feature = "backend-tract"))]
fn build_detector(cfg: &WatchpostConfig) -> Result<Box<dyn ObjectDetector>> {
    if let Some(path) = &cfg.model_path {
        log::warn!(
            "detector model {} ignored: built without the backend-tract feature",
            path.display()
        );
    }
    Ok(Box::new(StubBackend::new()))
}

#[cfg(feature = "notify-relay")]
fn build_notifier(cfg: &WatchpostConfig) -> Result<Box<dyn Notifier>> {
    use watchpost::notify::{RelayConfig, RelayNotifier};

    let Some(url) = cfg.notify.relay_url.clone() else {
        log::warn!("no notification relay configured; alerts are logged only");
        return Ok(Box::new(LogNotifier));
    };
    let notifier = RelayNotifier::new(RelayConfig {
        url,
        token: cfg
            .notify
            .token
            .clone()
            .ok_or_else(|| anyhow!("WATCHPOST_NOTIFY_TOKEN must be set"))?,
        from: cfg.notify.from.clone().unwrap_or_default(),
        to: cfg
            .notify
            .to
            .clone()
            .ok_or_else(|| anyhow!("notify.to must be set"))?,
        timeout: cfg.notify.timeout,
    })?;
    Ok(Box::new(notifier))
}

#[cfg(not(feature = "notify-relay"))]
fn build_notifier(cfg: &WatchpostConfig) -> Result<Box<dyn Notifier>> {
    if cfg.notify.relay_configured() {
        return Err(anyhow!(
            "notify.relay_url is set but watchpostd was built without the notify-relay feature"
        ));
    }
    log::warn!("no notification relay configured; alerts are logged only");
    Ok(Box::new(LogNotifier))
}
