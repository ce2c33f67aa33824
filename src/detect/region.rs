/// Axis-aligned region of interest in frame pixel coordinates.
///
/// Motion regions carry no label or confidence; object-detection regions carry both.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub label: Option<String>,
    pub confidence: Option<f32>,
}

impl Region {
    pub fn motion(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            label: None,
            confidence: None,
        }
    }

    pub fn labeled(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        label: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            x,
            y,
            width,
            height,
            label: Some(label.into()),
            confidence: Some(confidence),
        }
    }

    pub fn is_motion(&self) -> bool {
        self.label.is_none()
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Overlay caption for object-detection regions: `"<label> <confidence:.2>"`.
    pub fn caption(&self) -> Option<String> {
        let label = self.label.as_ref()?;
        Some(format!("{} {:.2}", label, self.confidence.unwrap_or(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_formats_confidence_with_two_decimals() {
        let region = Region::labeled(1, 2, 3, 4, "person", 0.8765);
        assert_eq!(region.caption().as_deref(), Some("person 0.88"));
        assert!(!region.is_motion());
    }

    #[test]
    fn motion_region_has_no_caption() {
        let region = Region::motion(0, 0, 30, 30);
        assert!(region.caption().is_none());
        assert_eq!(region.area(), 900);
    }
}
