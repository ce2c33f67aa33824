mod backend;
mod backends;
pub mod motion;
mod region;

pub use backend::ObjectDetector;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use motion::{min_region_area, MotionDetector};
pub use region::Region;
