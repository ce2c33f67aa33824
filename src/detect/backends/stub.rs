use anyhow::Result;

use crate::detect::backend::ObjectDetector;
use crate::detect::region::Region;
use crate::frame::Frame;

/// Stub backend. Reports a fixed set of regions on every frame.
///
/// With no regions configured it stands in for "no model loaded".
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    regions: Vec<Region>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_regions(regions: Vec<Region>) -> Self {
        Self { regions, calls: 0 }
    }

    /// Number of frames this backend has been asked to analyze.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl ObjectDetector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Region>> {
        self.calls += 1;
        let (width, height) = frame.dimensions();
        Ok(self
            .regions
            .iter()
            .filter(|r| r.x < width && r.y < height)
            .cloned()
            .collect())
    }
}
