use anyhow::Result;

use crate::detect::region::Region;
use crate::frame::Frame;

/// Object-detection capability.
///
/// Given a frame, returns labeled regions with confidences in frame pixel
/// coordinates. Backends own whatever model state they need; the pipeline
/// treats them as opaque and never feeds their output into motion state.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Region>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
