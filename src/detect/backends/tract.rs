#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::ObjectDetector;
use crate::detect::region::Region;
use crate::frame::Frame;

/// Square input edge of the YOLOv8 exports this backend expects.
pub const MODEL_INPUT_SIZE: u32 = 640;

const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Tract-based YOLOv8 object detector.
///
/// Loads a local ONNX export (`1x3x640x640` input, `1x(4+C)xN` output) and
/// performs inference on RGB frames. No network I/O; nothing written to disk.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

#[derive(Clone, Debug)]
struct Candidate {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    score: f32,
    class: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = MODEL_INPUT_SIZE as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!("TractBackend: loaded {}", model_path.display());
        Ok(Self {
            model,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(
            frame.image(),
            MODEL_INPUT_SIZE,
            MODEL_INPUT_SIZE,
            FilterType::Triangle,
        );
        let size = MODEL_INPUT_SIZE as usize;
        let pixels = resized.as_raw();
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            pixels[(y * size + x) * 3 + channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, output: &Tensor) -> Result<Vec<Candidate>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;
        let (_, rows, count) = view.dim();
        if rows < 5 {
            return Err(anyhow!("model output has {} rows, expected at least 5", rows));
        }

        let mut candidates = Vec::new();
        for i in 0..count {
            let (class, score) = (4..rows)
                .map(|row| (row - 4, view[[0, row, i]]))
                .fold((0, f32::NEG_INFINITY), |best, c| if c.1 > best.1 { c } else { best });
            if !(score >= self.confidence_threshold) {
                continue;
            }
            let (cx, cy) = (view[[0, 0, i]], view[[0, 1, i]]);
            let (w, h) = (view[[0, 2, i]], view[[0, 3, i]]);
            candidates.push(Candidate {
                x0: cx - w / 2.0,
                y0: cy - h / 2.0,
                x1: cx + w / 2.0,
                y1: cy + h / 2.0,
                score,
                class,
            });
        }
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl ObjectDetector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Region>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let candidates = self.decode(output)?;

        let sx = frame.width() as f32 / MODEL_INPUT_SIZE as f32;
        let sy = frame.height() as f32 / MODEL_INPUT_SIZE as f32;
        let max_x = frame.width().saturating_sub(1) as f32;
        let max_y = frame.height().saturating_sub(1) as f32;

        Ok(candidates
            .into_iter()
            .map(|c| {
                let x0 = (c.x0 * sx).clamp(0.0, max_x);
                let y0 = (c.y0 * sy).clamp(0.0, max_y);
                let x1 = (c.x1 * sx).clamp(0.0, max_x);
                let y1 = (c.y1 * sy).clamp(0.0, max_y);
                let label = COCO_LABELS
                    .get(c.class)
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| format!("class{}", c.class));
                Region::labeled(
                    x0 as u32,
                    y0 as u32,
                    (x1 - x0).max(1.0) as u32,
                    (y1 - y0).max(1.0) as u32,
                    label,
                    c.score,
                )
            })
            .collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, [0, 0, 0]);
        self.detect(&blank).context("detector warm-up failed")?;
        Ok(())
    }
}

/// Class-wise greedy NMS, highest score first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class == candidate.class && iou(k, &candidate) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let ix = (a.x1.min(b.x1) - a.x0.max(b.x0)).max(0.0);
    let iy = (a.y1.min(b.y1) - a.y0.max(b.y0)).max(0.0);
    let inter = ix * iy;
    let area_a = (a.x1 - a.x0) * (a.y1 - a.y0);
    let area_b = (b.x1 - b.x0) * (b.y1 - b.y0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
