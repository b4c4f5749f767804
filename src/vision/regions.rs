//! Region localization and classification
//!
//! Turns the raw text boxes reported by the detector into at most one
//! label region and one print region. Noise detections (dust, specular
//! highlights) are suppressed by area and aspect-ratio bounds; the
//! survivors are ordered top to bottom and the top two win.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Axis-aligned bounding box in image pixel space
///
/// Invariant: `width > 0 && height > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Create a box, returning `None` for degenerate dimensions
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Reduce an arbitrary detector quadrilateral to an axis-aligned box
    /// by min/max projection. Negative coordinates are clamped to zero.
    pub fn from_quad(points: &[(f32, f32)]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let min_x = points.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_x = points.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

        let x = min_x.max(0.0) as u32;
        let y = min_y.max(0.0) as u32;
        let right = max_x.max(0.0) as u32;
        let bottom = max_y.max(0.0) as u32;

        Self::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    /// Box area in square pixels
    pub fn area(&self) -> u32 {
        self.width * self.height
    }

    /// Orientation-independent aspect ratio: `max(w, h) / min(w, h)`, always >= 1
    pub fn aspect_ratio(&self) -> f32 {
        let long = self.width.max(self.height) as f32;
        let short = self.width.min(self.height) as f32;
        long / short
    }

    /// One past the right edge
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// One past the bottom edge
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Standard axis-aligned rectangle intersection test
    pub fn intersects(&self, other: &Self) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Bounding rectangle of both boxes
    pub fn union(&self, other: &Self) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Self {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }
}

/// Filtering bounds for candidate text boxes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionFilterSettings {
    /// Minimum box area in square pixels
    pub min_area: u32,
    /// Maximum box area in square pixels
    pub max_area: u32,
    /// Minimum aspect ratio (`max(w,h)/min(w,h)`)
    pub min_aspect: f32,
    /// Maximum aspect ratio
    pub max_aspect: f32,
    /// Union overlapping boxes before classification (compensates for a
    /// detector splitting one physical line into two boxes)
    pub merge_overlapping: bool,
}

impl Default for RegionFilterSettings {
    fn default() -> Self {
        Self {
            min_area: 500,
            max_area: 50_000,
            min_aspect: 1.5,
            max_aspect: 20.0,
            merge_overlapping: true,
        }
    }
}

/// A classified region with its owned pixel crop
///
/// The crop is a copy, never a view into the source frame.
#[derive(Debug, Clone)]
pub struct DetectedRegion {
    pub bbox: BoundingBox,
    pub image: RgbImage,
}

/// Classification outcome: at most one label region and one print region
#[derive(Debug, Clone, Default)]
pub struct ClassifiedRegions {
    /// Topmost accepted box: the reference label text
    pub label: Option<DetectedRegion>,
    /// Second accepted box: the spray-printed text under verification
    pub print: Option<DetectedRegion>,
}

impl ClassifiedRegions {
    /// True when neither region was found
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.print.is_none()
    }
}

/// Assigns label/print regions from raw detected boxes
#[derive(Debug, Clone, Default)]
pub struct RegionClassifier {
    settings: RegionFilterSettings,
}

impl RegionClassifier {
    /// Create a classifier with the given filter settings
    pub fn new(settings: RegionFilterSettings) -> Self {
        Self { settings }
    }

    /// Classify raw detector boxes against the image they came from
    ///
    /// Pure over its inputs; absence is represented by empty options. Boxes
    /// beyond the top two survivors are discarded: the fixture holds one
    /// label above one spray line.
    pub fn classify(&self, raw_boxes: &[BoundingBox], image: &RgbImage) -> ClassifiedRegions {
        let mut candidates: Vec<BoundingBox> = raw_boxes
            .iter()
            .copied()
            .filter(|b| self.accepts(b) && b.x < image.width() && b.y < image.height())
            .collect();

        if self.settings.merge_overlapping {
            candidates = merge_overlapping(candidates);
        }

        candidates.sort_by_key(|b| b.y);

        debug!(
            "Region classification: {} raw boxes, {} candidates",
            raw_boxes.len(),
            candidates.len()
        );

        let mut assigned = candidates.into_iter();
        ClassifiedRegions {
            label: assigned.next().map(|b| crop_region(image, b)),
            print: assigned.next().map(|b| crop_region(image, b)),
        }
    }

    /// Area and aspect-ratio acceptance test
    fn accepts(&self, bbox: &BoundingBox) -> bool {
        let area = bbox.area();
        if area < self.settings.min_area || area > self.settings.max_area {
            return false;
        }
        let aspect = bbox.aspect_ratio();
        aspect >= self.settings.min_aspect && aspect <= self.settings.max_aspect
    }
}

/// Union overlapping boxes until no pair overlaps
fn merge_overlapping(mut boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    loop {
        let mut merged_any = false;
        let mut out: Vec<BoundingBox> = Vec::with_capacity(boxes.len());

        'next_box: for b in boxes {
            for existing in out.iter_mut() {
                if existing.intersects(&b) {
                    *existing = existing.union(&b);
                    merged_any = true;
                    continue 'next_box;
                }
            }
            out.push(b);
        }

        boxes = out;
        if !merged_any {
            return boxes;
        }
    }
}

/// Copy the pixel sub-rectangle for a box into an owned buffer, clamped to
/// the image bounds
fn crop_region(image: &RgbImage, bbox: BoundingBox) -> DetectedRegion {
    let width = bbox.width.min(image.width() - bbox.x);
    let height = bbox.height.min(image.height() - bbox.y);
    let crop = image::imageops::crop_imm(image, bbox.x, bbox.y, width, height).to_image();
    DetectedRegion { bbox, image: crop }
}
