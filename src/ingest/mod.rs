//! Frame acquisition.
//!
//! Every source hands out owned RGB [`Frame`]s. A failed read is reported as
//! an `Err` from [`FrameSource::next_frame`]; callers treat it as "no frame this
//! tick" and must not feed anything into detector state.
//!
//! Device strings select the backend:
//! - `stub://<name>`: synthetic scene, no hardware required
//! - anything else: a V4L2 device node (feature `ingest-v4l2`)

#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

pub const STUB_SCHEME: &str = "stub://";

/// Camera capture parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraSettings {
    /// Device path (e.g. "/dev/video0") or `stub://<name>`.
    pub device: String,
    pub target_fps: u32,
    /// Working resolution. Sources request it; the pipeline enforces it.
    pub width: u32,
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: "stub://camera0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Capture the next frame. An error means the camera is unavailable for
    /// this tick.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Open the source named by `settings.device`.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    if settings.device.starts_with(STUB_SCHEME) {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    open_device(settings)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    let mut source = V4l2Source::new(settings.clone());
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!(
        "camera device {} requires the ingest-v4l2 feature",
        settings.device
    ))
}
