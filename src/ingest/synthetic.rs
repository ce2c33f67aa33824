use anyhow::{anyhow, Result};

use super::{CameraSettings, FrameSource};
use crate::frame::Frame;

/// Frames between two jumps of the synthetic intruder.
const SCENE_PERIOD: u64 = 50;
const INTRUDER_COLOR: [u8; 3] = [240, 240, 240];

/// Synthetic camera for `stub://` devices.
///
/// Renders a static gradient background with a bright square that jumps to a
/// new position every `SCENE_PERIOD` frames, so motion detection sees one
/// event per jump and a still scene in between.
pub struct SyntheticSource {
    settings: CameraSettings,
    frame_count: u64,
    scene_state: u64,
}

impl SyntheticSource {
    pub fn new(settings: CameraSettings) -> Self {
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            settings.device,
            settings.width,
            settings.height
        );
        Self {
            settings,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> Frame {
        let (w, h) = (self.settings.width, self.settings.height);
        let mut frame = Frame::filled(w, h, [0, 0, 0]);
        for (x, y, pixel) in frame.image_mut().enumerate_pixels_mut() {
            let shade = ((x * 96 / w.max(1)) + (y * 64 / h.max(1))) as u8;
            pixel.0 = [shade, shade / 2 + 32, 96u8.saturating_sub(shade / 2)];
        }

        let side = (w.min(h) / 8).max(1);
        let span_x = w.saturating_sub(side).max(1) as u64;
        let span_y = h.saturating_sub(side).max(1) as u64;
        let x = (self.scene_state * 97) % span_x;
        let y = (self.scene_state * 53) % span_y;
        frame.fill_rect(x as u32, y as u32, side, side, INTRUDER_COLOR);
        frame
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.settings.device
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.settings.width == 0 || self.settings.height == 0 {
            return Err(anyhow!("synthetic source has zero-sized frames"));
        }
        self.frame_count += 1;
        if self.frame_count % SCENE_PERIOD == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        Ok(self.render())
    }
}
