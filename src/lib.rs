//! watchpost: live camera monitoring.
//!
//! Frames flow from a [`FrameSource`] through a [`FramePipeline`], which runs
//! one of two interchangeable detection modes (background-subtraction motion
//! detection or object detection), draws overlays, saves a snapshot and sends a
//! cooldown-throttled alert for each motion event, and hands the annotated
//! frame to the MJPEG stream.
//!
//! # Module Structure
//!
//! - `frame`: RGB raster, resize, JPEG encode
//! - `ingest`: camera sources (synthetic `stub://`, V4L2)
//! - `detect`: motion detector, object-detector backends, regions
//! - `annotate`: rectangles and captions
//! - `alert` / `snapshot` / `notify`: event side effects
//! - `settings`: live-editable detection mode and sensitivity
//! - `pipeline`: per-tick orchestration
//! - `stream`: multipart encoding and single-producer fan-out
//! - `api`: HTTP endpoints
//! - `config`: daemon configuration

pub mod alert;
pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod settings;
pub mod snapshot;
pub mod stream;

pub use alert::AlertGate;
pub use config::WatchpostConfig;
pub use detect::{MotionDetector, ObjectDetector, Region, StubBackend};
pub use frame::Frame;
pub use ingest::{open_source, CameraSettings, FrameSource};
pub use notify::{Alert, LogNotifier, Notifier};
pub use pipeline::{FramePipeline, PauseHandle, PipelineConfig, TickOutcome};
pub use settings::{DetectionMode, FileSettingsStore, Settings, SettingsProvider, SharedSettings};
pub use snapshot::SnapshotStore;
pub use stream::{MjpegStream, StreamEncoder, StreamHub};
