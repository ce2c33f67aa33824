//! Per-camera frame pipeline.
//!
//! One `tick()` pulls at most one frame and runs it through:
//! pause check -> settings read -> capture -> resize -> detection ->
//! annotation -> (motion event) snapshot, cooldown gate, notification.
//!
//! All mutable state (detector reference, cooldown timestamp, pause flag) is
//! owned by the pipeline instance, so several cameras can run side by side.

use anyhow::Result;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{AlertGate, DEFAULT_ALERT_COOLDOWN};
use crate::annotate;
use crate::detect::{MotionDetector, ObjectDetector, Region, StubBackend};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::notify::{Alert, LogNotifier, Notifier};
use crate::settings::{DetectionMode, SettingsProvider};
use crate::snapshot::SnapshotStore;

pub trait Clock: Send {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Shared pause flag. Cloning hands out another handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.0.store(paused, Ordering::SeqCst);
    }

    /// Flip the flag and return the new state.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Working resolution every frame is resized to before detection.
    pub width: u32,
    pub height: u32,
    pub alert_cooldown: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            alert_cooldown: DEFAULT_ALERT_COOLDOWN,
        }
    }
}

/// Regions that qualified in one tick.
#[derive(Clone, Debug)]
pub struct DetectionEvent {
    pub mode: DetectionMode,
    pub timestamp: DateTime<Local>,
    pub regions: Vec<Region>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertStatus {
    Sent,
    Failed,
    Throttled,
    /// Snapshot could not be written, so there was nothing to attach.
    NoSnapshot,
}

#[derive(Clone, Debug)]
pub struct EventReport {
    pub event: DetectionEvent,
    pub snapshot: Option<PathBuf>,
    pub alert: AlertStatus,
}

#[derive(Debug)]
pub struct ProcessedFrame {
    pub frame: Frame,
    pub mode: DetectionMode,
    pub regions: Vec<Region>,
    pub event: Option<EventReport>,
}

#[derive(Debug)]
pub enum TickOutcome {
    Paused,
    SourceUnavailable,
    Processed(ProcessedFrame),
}

impl TickOutcome {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            TickOutcome::Processed(processed) => Some(processed.frame),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub ticks: u64,
    pub frames: u64,
    pub paused_ticks: u64,
    pub source_failures: u64,
    pub events: u64,
    pub snapshots: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub alerts_throttled: u64,
}

pub struct FramePipeline {
    config: PipelineConfig,
    source: Box<dyn FrameSource>,
    settings: Arc<dyn SettingsProvider>,
    motion: MotionDetector,
    objects: Box<dyn ObjectDetector>,
    gate: AlertGate,
    snapshots: SnapshotStore,
    notifier: Box<dyn Notifier>,
    clock: Box<dyn Clock>,
    pause: PauseHandle,
    stats: PipelineStats,
}

impl FramePipeline {
    /// Build a pipeline with a stub object detector and a log-only notifier;
    /// use the `with_*` methods to plug in real collaborators.
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        settings: Arc<dyn SettingsProvider>,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            gate: AlertGate::new(config.alert_cooldown),
            config,
            source,
            settings,
            motion: MotionDetector::new(),
            objects: Box::new(StubBackend::new()),
            snapshots,
            notifier: Box::new(LogNotifier),
            clock: Box::new(SystemClock),
            pause: PauseHandle::new(),
            stats: PipelineStats::default(),
        }
    }

    pub fn with_object_detector(mut self, detector: Box<dyn ObjectDetector>) -> Self {
        self.objects = detector;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pause(mut self, pause: PauseHandle) -> Self {
        self.pause = pause;
        self
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Whether the camera reports itself healthy.
    pub fn source_healthy(&self) -> bool {
        self.source.is_healthy()
    }

    /// Forget the motion reference so the next frame only re-seeds it.
    pub fn reset_motion(&mut self) {
        if self.motion.has_reference() {
            log::info!("motion reference discarded; next frame re-seeds it");
        }
        self.motion.reset();
    }

    /// Run one tick.
    ///
    /// Returns `Err` only for a malformed settings record; camera failures,
    /// detector failures and notification failures are logged and absorbed.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.stats.ticks += 1;
        if self.pause.is_paused() {
            self.stats.paused_ticks += 1;
            return Ok(TickOutcome::Paused);
        }

        let settings = self.settings.current()?;

        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.source_failures += 1;
                log::warn!("camera {} unavailable: {:#}", self.source.name(), err);
                return Ok(TickOutcome::SourceUnavailable);
            }
        };
        let mut frame = frame.resized(self.config.width, self.config.height);
        self.stats.frames += 1;

        let regions = match settings.detection_mode {
            DetectionMode::Motion => {
                let regions = self.motion.detect(&frame, settings.sensitivity);
                annotate::draw_motion_overlay(&mut frame, &regions);
                regions
            }
            DetectionMode::Ai => {
                let regions = match self.objects.detect(&frame) {
                    Ok(regions) => regions,
                    Err(err) => {
                        log::warn!("object detector {} failed: {:#}", self.objects.name(), err);
                        Vec::new()
                    }
                };
                annotate::draw_object_overlay(&mut frame, &regions);
                regions
            }
        };

        // Object detections are display-only; only motion raises events.
        let event = if settings.detection_mode == DetectionMode::Motion && !regions.is_empty() {
            let event = DetectionEvent {
                mode: settings.detection_mode,
                timestamp: self.clock.now(),
                regions: regions.clone(),
            };
            Some(self.handle_event(&frame, event))
        } else {
            None
        };

        Ok(TickOutcome::Processed(ProcessedFrame {
            frame,
            mode: settings.detection_mode,
            regions,
            event,
        }))
    }

    /// One snapshot and at most one notification per event, however many
    /// regions it carries.
    fn handle_event(&mut self, frame: &Frame, event: DetectionEvent) -> EventReport {
        self.stats.events += 1;

        let snapshot = match self.snapshots.save(frame, &event.timestamp) {
            Ok(path) => {
                self.stats.snapshots += 1;
                log::info!(
                    "snapshot saved: {} ({} region(s))",
                    path.display(),
                    event.regions.len()
                );
                path
            }
            Err(err) => {
                log::error!("snapshot write failed: {:#}", err);
                return EventReport {
                    event,
                    snapshot: None,
                    alert: AlertStatus::NoSnapshot,
                };
            }
        };

        let alert = if !self.gate.allow(event.timestamp) {
            self.stats.alerts_throttled += 1;
            log::debug!("alert suppressed by cooldown");
            AlertStatus::Throttled
        } else {
            match self.notifier.send(&Alert::motion(snapshot.clone())) {
                Ok(()) => {
                    self.stats.alerts_sent += 1;
                    log::info!("alert sent via {}", self.notifier.name());
                    AlertStatus::Sent
                }
                Err(err) => {
                    self.stats.alerts_failed += 1;
                    log::error!("alert via {} failed: {:#}", self.notifier.name(), err);
                    AlertStatus::Failed
                }
            }
        };

        EventReport {
            event,
            snapshot: Some(snapshot),
            alert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_toggle_returns_new_state() {
        let pause = PauseHandle::new();
        assert!(!pause.is_paused());
        assert!(pause.toggle());
        assert!(pause.is_paused());
        assert!(!pause.toggle());
        let other = pause.clone();
        other.set_paused(true);
        assert!(pause.is_paused());
    }

    #[test]
    fn into_frame_only_for_processed() {
        assert!(TickOutcome::Paused.into_frame().is_none());
        assert!(TickOutcome::SourceUnavailable.into_frame().is_none());
    }
}
