//! Background-subtraction motion detector.
//!
//! Each call to `MotionDetector::detect`:
//! 1. Converts the frame to grayscale and applies a fixed-size Gaussian blur
//! 2. On the first frame (or after a reset) stores it as the reference and reports nothing
//! 3. Otherwise thresholds `|reference - current|`, dilates the mask, and extracts
//!    8-connected regions whose pixel area is at least `sensitivity * AREA_SCALE`
//! 4. Replaces the reference with the current frame, whether or not motion was found
//!
//! The reference never crosses a resolution change: a frame whose size differs from
//! the stored reference resets the detector instead of being diffed.

use image::imageops;
use image::GrayImage;

use crate::detect::region::Region;
use crate::frame::Frame;

/// Gaussian kernel width (pixels). Smaller kernels react to smaller motions,
/// larger kernels suppress sensor noise.
pub const BLUR_KERNEL_SIZE: usize = 21;

/// Absolute intensity difference a pixel must exceed to count as changed.
pub const DIFF_THRESHOLD: u8 = 25;

/// 3x3 dilation passes applied to the change mask.
pub const DILATE_ITERATIONS: usize = 2;

/// Area (pixels) contributed by one sensitivity step.
pub const AREA_SCALE: u64 = 100;

const MASK_ON: u8 = 255;

/// Minimum region area for a sensitivity setting. Regions with a smaller area
/// are discarded; a region exactly at the minimum is kept.
pub fn min_region_area(sensitivity: u32) -> u64 {
    sensitivity as u64 * AREA_SCALE
}

/// Stateful temporal-differencing motion detector.
pub struct MotionDetector {
    reference: Option<GrayImage>,
    kernel: Vec<f32>,
}

impl MotionDetector {
    pub fn new() -> Self {
        Self::with_kernel_size(BLUR_KERNEL_SIZE)
    }

    /// Use a different blur kernel width. Even widths are rounded up to the next odd value.
    pub fn with_kernel_size(size: usize) -> Self {
        Self {
            reference: None,
            kernel: gaussian_kernel(size.max(1) | 1),
        }
    }

    /// Drop the reference frame. The next frame bootstraps a new one.
    pub fn reset(&mut self) {
        self.reference = None;
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn reference_dimensions(&self) -> Option<(u32, u32)> {
        self.reference.as_ref().map(|r| r.dimensions())
    }

    /// Compare `frame` against the stored reference and return motion regions.
    pub fn detect(&mut self, frame: &Frame, sensitivity: u32) -> Vec<Region> {
        let current = preprocess(frame, &self.kernel);

        let regions = match self.reference.as_ref() {
            None => Vec::new(),
            Some(previous) if previous.dimensions() != current.dimensions() => {
                log::warn!(
                    "MotionDetector: frame size changed {:?} -> {:?}; resetting reference",
                    previous.dimensions(),
                    current.dimensions()
                );
                Vec::new()
            }
            Some(previous) => {
                let mut mask = threshold_diff(previous, &current, DIFF_THRESHOLD);
                for _ in 0..DILATE_ITERATIONS {
                    mask = dilate(&mask);
                }
                find_regions(&mask, min_region_area(sensitivity))
            }
        };

        self.reference = Some(current);
        regions
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn preprocess(frame: &Frame, kernel: &[f32]) -> GrayImage {
    let gray = imageops::grayscale(frame.image());
    gaussian_blur(&gray, kernel)
}

/// Normalized 1-D Gaussian weights. Sigma follows the usual rule for a
/// kernel-size-only blur: `0.3 * ((size - 1) / 2 - 1) + 0.8`.
fn gaussian_kernel(size: usize) -> Vec<f32> {
    let center = (size / 2) as f32;
    let sigma = (0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8).max(0.1);
    let denom = 2.0 * sigma * sigma;
    let weights: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Separable Gaussian blur with replicated borders.
fn gaussian_blur(src: &GrayImage, kernel: &[f32]) -> GrayImage {
    let (width, height) = src.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || kernel.len() <= 1 {
        return src.clone();
    }
    let radius = kernel.len() / 2;
    let input = src.as_raw();

    let mut horizontal = vec![0f32; w * h];
    for y in 0..h {
        let row = &input[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x + k).saturating_sub(radius).min(w - 1);
                acc += weight * row[sx] as f32;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y + k).saturating_sub(radius).min(h - 1);
                acc += weight * horizontal[sy * w + x];
            }
            out[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    GrayImage::from_raw(width, height, out).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Binary change mask: `MASK_ON` where `|a - b| > cutoff`, else 0.
fn threshold_diff(a: &GrayImage, b: &GrayImage, cutoff: u8) -> GrayImage {
    let (width, height) = a.dimensions();
    let data: Vec<u8> = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&pa, &pb)| if pa.abs_diff(pb) > cutoff { MASK_ON } else { 0 })
        .collect();
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

/// One 3x3 dilation pass (separable max filter).
fn dilate(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let input = mask.as_raw();

    let mut horizontal = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let lo = x.saturating_sub(1);
            let hi = (x + 1).min(w - 1);
            horizontal[y * w + x] = input[y * w + lo..=y * w + hi]
                .iter()
                .copied()
                .max()
                .unwrap_or(0);
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        let lo = y.saturating_sub(1);
        let hi = (y + 1).min(h - 1);
        for x in 0..w {
            out[y * w + x] = (lo..=hi).map(|sy| horizontal[sy * w + x]).max().unwrap_or(0);
        }
    }

    GrayImage::from_raw(width, height, out).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Extract 8-connected regions of set pixels, in row-major discovery order.
/// A region's area is its pixel count; regions below `min_area` are discarded.
pub(crate) fn find_regions(mask: &GrayImage, min_area: u64) -> Vec<Region> {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let data = mask.as_raw();
    let mut visited = vec![false; w * h];
    let mut stack = Vec::new();
    let mut regions = Vec::new();

    for start in 0..w * h {
        if visited[start] || data[start] == 0 {
            continue;
        }
        visited[start] = true;
        stack.push(start);

        let (mut min_x, mut min_y) = (start % w, start / w);
        let (mut max_x, mut max_y) = (min_x, min_y);
        let mut area = 0u64;

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            area += 1;
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if !visited[n] && data[n] != 0 {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        if area < min_area {
            continue;
        }
        regions.push(Region::motion(
            min_x as u32,
            min_y as u32,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        ));
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 160;
    const H: u32 = 120;

    fn background() -> Frame {
        Frame::filled(W, H, [20, 20, 20])
    }

    fn with_square(x: u32, y: u32, size: u32) -> Frame {
        let mut frame = background();
        frame.fill_rect(x, y, size, size, [255, 255, 255]);
        frame
    }

    fn mask_with_block(x: u32, y: u32, w: u32, h: u32) -> GrayImage {
        let mut mask = GrayImage::new(64, 64);
        for py in y..y + h {
            for px in x..x + w {
                mask.put_pixel(px, py, image::Luma([MASK_ON]));
            }
        }
        mask
    }

    #[test]
    fn first_frame_bootstraps_without_regions() {
        let mut detector = MotionDetector::new();
        assert!(!detector.has_reference());
        assert!(detector.detect(&with_square(60, 40, 30), 5).is_empty());
        assert!(detector.has_reference());
    }

    #[test]
    fn identical_frames_never_report_motion() {
        let mut detector = MotionDetector::new();
        for _ in 0..5 {
            assert!(detector.detect(&background(), 1).is_empty());
        }
    }

    #[test]
    fn bright_square_is_reported_once() {
        let mut detector = MotionDetector::new();
        detector.detect(&background(), 5);
        let regions = detector.detect(&with_square(60, 40, 30), 5);

        assert_eq!(regions.len(), 1);
        let region = &regions[0];
        assert!(region.is_motion());
        assert!(region.x <= 60 && region.y <= 40);
        assert!(region.x + region.width >= 90 && region.y + region.height >= 70);
        assert!(region.area() >= 900);
    }

    #[test]
    fn small_change_is_below_default_area() {
        let mut detector = MotionDetector::new();
        detector.detect(&background(), 5);
        assert!(detector.detect(&with_square(70, 50, 4), 5).is_empty());
    }

    #[test]
    fn high_sensitivity_value_suppresses_region() {
        let mut detector = MotionDetector::new();
        detector.detect(&background(), 100);
        assert!(detector.detect(&with_square(60, 40, 30), 100).is_empty());
    }

    #[test]
    fn reference_tracks_scene_every_tick() {
        let mut detector = MotionDetector::new();
        detector.detect(&background(), 5);
        assert_eq!(detector.detect(&with_square(60, 40, 30), 5).len(), 1);
        // The square is now part of the reference scene.
        assert!(detector.detect(&with_square(60, 40, 30), 5).is_empty());
    }

    #[test]
    fn resolution_change_resets_reference() {
        let mut detector = MotionDetector::new();
        detector.detect(&background(), 5);
        let smaller = Frame::filled(80, 60, [255, 255, 255]);
        assert!(detector.detect(&smaller, 5).is_empty());
        assert_eq!(detector.reference_dimensions(), Some((80, 60)));
        assert!(detector.detect(&smaller, 5).is_empty());
    }

    #[test]
    fn area_exactly_at_minimum_is_kept() {
        // 10 x 50 = 500 pixels.
        let mask = mask_with_block(2, 2, 10, 50);
        assert_eq!(find_regions(&mask, min_region_area(5)).len(), 1);
        assert!(find_regions(&mask, 501).is_empty());
    }

    #[test]
    fn separate_blobs_are_separate_regions_in_scan_order() {
        let mut mask = mask_with_block(40, 2, 5, 5);
        for py in 30..35 {
            for px in 2..7 {
                mask.put_pixel(px, py, image::Luma([MASK_ON]));
            }
        }
        let regions = find_regions(&mask, 1);
        assert_eq!(regions.len(), 2);
        assert_eq!((regions[0].x, regions[0].y), (40, 2));
        assert_eq!((regions[1].x, regions[1].y), (2, 30));
        assert_eq!((regions[1].width, regions[1].height), (5, 5));
    }

    #[test]
    fn diagonal_neighbors_are_connected() {
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(0, 0, image::Luma([MASK_ON]));
        mask.put_pixel(1, 1, image::Luma([MASK_ON]));
        let regions = find_regions(&mask, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!((regions[0].width, regions[0].height), (2, 2));
    }

    #[test]
    fn kernel_is_normalized() {
        let kernel = gaussian_kernel(BLUR_KERNEL_SIZE);
        let sum: f32 = kernel.iter().sum();
        assert_eq!(kernel.len(), BLUR_KERNEL_SIZE);
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn dilate_grows_single_pixel_to_3x3() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(2, 2, image::Luma([MASK_ON]));
        let grown = dilate(&mask);
        let on = grown.as_raw().iter().filter(|&&v| v == MASK_ON).count();
        assert_eq!(on, 9);
    }
}
