//! Frame overlays: region rectangles and captions.
//!
//! Captions are drawn with a built-in 5x7 bitmap font covering digits, ASCII
//! letters (rendered upper-case) and a few punctuation marks. Characters without
//! a glyph render as blanks.

use image::Rgb;

use crate::detect::Region;
use crate::frame::Frame;

pub const MOTION_BOX_COLOR: [u8; 3] = [0, 255, 0];
pub const MOTION_CAPTION_COLOR: [u8; 3] = [255, 0, 0];
pub const OBJECT_BOX_COLOR: [u8; 3] = [0, 0, 255];
pub const OBJECT_CAPTION_COLOR: [u8; 3] = [255, 255, 255];

pub const MOTION_CAPTION: &str = "Motion Detected";
pub const MONITORING_CAPTION: &str = "Monitoring...";

const BOX_THICKNESS: u32 = 2;
const CAPTION_SCALE: u32 = 2;
const LABEL_SCALE: u32 = 1;
const STATUS_ORIGIN: (i64, i64) = (10, 20);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// Motion-mode overlay: every region boxed, plus one status caption.
pub fn draw_motion_overlay(frame: &mut Frame, regions: &[Region]) {
    for region in regions {
        draw_rect(frame, region, MOTION_BOX_COLOR, BOX_THICKNESS);
    }
    let caption = if regions.is_empty() {
        MONITORING_CAPTION
    } else {
        MOTION_CAPTION
    };
    draw_text(
        frame,
        STATUS_ORIGIN.0,
        STATUS_ORIGIN.1,
        caption,
        MOTION_CAPTION_COLOR,
        CAPTION_SCALE,
    );
}

/// Object-mode overlay: every region boxed and captioned with label and confidence.
pub fn draw_object_overlay(frame: &mut Frame, regions: &[Region]) {
    for region in regions {
        draw_rect(frame, region, OBJECT_BOX_COLOR, BOX_THICKNESS);
        if let Some(caption) = region.caption() {
            draw_text(
                frame,
                region.x as i64,
                region.y as i64 - 10,
                &caption,
                OBJECT_CAPTION_COLOR,
                LABEL_SCALE,
            );
        }
    }
}

/// Hollow rectangle of the given stroke width, clipped to the frame.
pub fn draw_rect(frame: &mut Frame, region: &Region, color: [u8; 3], thickness: u32) {
    if region.width == 0 || region.height == 0 {
        return;
    }
    let t = thickness.max(1);
    let (x, y, w, h) = (region.x, region.y, region.width, region.height);
    frame.fill_rect(x, y, w, t.min(h), color);
    frame.fill_rect(x, y + h.saturating_sub(t), w, t.min(h), color);
    frame.fill_rect(x, y, t.min(w), h, color);
    frame.fill_rect(x + w.saturating_sub(t), y, t.min(w), h, color);
}

/// Draw `text` with its bottom-left corner at (`x`, `y`). Off-frame pixels are skipped.
pub fn draw_text(frame: &mut Frame, x: i64, y: i64, text: &str, color: [u8; 3], scale: u32) {
    let scale = scale.max(1) as i64;
    let top = y - GLYPH_HEIGHT as i64 * scale;
    let advance = (GLYPH_WIDTH as i64 + 1) * scale;
    let (width, height) = (frame.width() as i64, frame.height() as i64);
    let image = frame.image_mut();

    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        let origin_x = x + i as i64 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = origin_x + col as i64 * scale + dx;
                        let py = top + row as i64 * scale + dy;
                        if px >= 0 && py >= 0 && px < width && py < height {
                            image.put_pixel(px as u32, py as u32, Rgb(color));
                        }
                    }
                }
            }
        }
    }
}

/// 5x7 glyph rows, most significant of the low five bits is the leftmost column.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '\u{2026}' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x15],
        _ => return None,
    };
    Some(rows)
}
