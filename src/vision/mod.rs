//! Vision/OCR layer
//!
//! The detection and recognition models are external collaborators behind
//! the [`TextOcr`] trait; this module owns everything around them: quad
//! reduction, confidence filtering, region classification and the
//! annotated display frame.

pub mod regions;

use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use regions::{
    BoundingBox, ClassifiedRegions, DetectedRegion, RegionClassifier, RegionFilterSettings,
};

/// Box drawn around the label region (red)
const LABEL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Box drawn around the print region (green)
const PRINT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// OCR recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Minimum line confidence (0.0 - 1.0); lower lines are excluded from
    /// the joined text but retained for audit
    pub confidence_threshold: f32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
        }
    }
}

/// One recognized text line with its confidence
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedLine {
    pub text: String,
    pub confidence: f32,
}

/// Filtered recognition result for one region
#[derive(Debug, Clone, Default)]
pub struct OcrOutcome {
    /// Accepted lines joined with a single space
    pub text: String,
    /// Mean confidence over the accepted lines (0.0 when none accepted)
    pub confidence: f32,
    /// Every line the engine returned, including rejected ones
    pub raw_lines: Vec<RecognizedLine>,
}

/// External OCR engine boundary
///
/// `detect` reports arbitrary quadrilaterals in image pixel space;
/// `recognize` reports text lines with confidences for a (cropped) image.
pub trait TextOcr {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Vec<(f32, f32)>>>;
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<RecognizedLine>>;
}

/// Run detection and reduce the reported quads to axis-aligned boxes
pub fn detect_boxes(ocr: &mut dyn TextOcr, image: &RgbImage) -> Result<Vec<BoundingBox>> {
    let quads = ocr.detect(image)?;
    let boxes: Vec<BoundingBox> = quads
        .iter()
        .filter_map(|q| BoundingBox::from_quad(q))
        .collect();
    debug!("Detection: {} quads, {} usable boxes", quads.len(), boxes.len());
    Ok(boxes)
}

/// Run recognition on a region crop and apply the confidence policy
pub fn recognize_region(
    ocr: &mut dyn TextOcr,
    region: &RgbImage,
    settings: &OcrSettings,
) -> Result<OcrOutcome> {
    let lines = ocr.recognize(region)?;
    Ok(collect_outcome(lines, settings.confidence_threshold))
}

/// Join the lines meeting the confidence threshold, keeping all lines for audit
fn collect_outcome(lines: Vec<RecognizedLine>, threshold: f32) -> OcrOutcome {
    let accepted: Vec<&RecognizedLine> = lines
        .iter()
        .filter(|line| line.confidence >= threshold)
        .collect();

    let text = accepted
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let confidence = if accepted.is_empty() {
        0.0
    } else {
        accepted.iter().map(|line| line.confidence).sum::<f32>() / accepted.len() as f32
    };

    OcrOutcome {
        text,
        confidence,
        raw_lines: lines,
    }
}

/// Draw the classified region boxes on a copy of the frame for display
pub fn annotate_regions(image: &RgbImage, regions: &ClassifiedRegions) -> RgbImage {
    let mut annotated = image.clone();

    if let Some(label) = &regions.label {
        draw_region_box(&mut annotated, &label.bbox, LABEL_COLOR);
    }
    if let Some(print) = &regions.print {
        draw_region_box(&mut annotated, &print.bbox, PRINT_COLOR);
    }

    annotated
}

fn draw_region_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let rect = Rect::at(bbox.x as i32, bbox.y as i32).of_size(bbox.width, bbox.height);
    draw_hollow_rect_mut(image, rect, color);
}
