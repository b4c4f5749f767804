//! Text comparison module
//!
//! Decides whether the spray-printed text matches the label text. Both
//! sides are reduced to their alphanumeric payload before scoring; the
//! diff and the highlighted rendering are computed over the raw strings
//! so the operator sees exactly what the camera saw.

pub mod matcher;

use serde::{Deserialize, Serialize};

pub use matcher::{OpKind, SequenceMatcher};

/// Comparison policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareSettings {
    /// Advisory similarity threshold (0.0 - 1.0). Reported on the result
    /// as `meets_threshold`; the pass/fail verdict is strict equality of
    /// the normalized texts and does not consult this value.
    pub similarity_threshold: f64,
}

impl Default for CompareSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
        }
    }
}

/// One aligned difference segment between the two raw texts
///
/// Ranges are char indices. Concatenating `left_value` across a full diff
/// reconstructs the left input exactly; same for `right_value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSegment {
    /// Segment kind
    pub kind: OpKind,
    /// Covered range in the left text
    pub left_range: (usize, usize),
    /// Covered range in the right text
    pub right_range: (usize, usize),
    /// Left text covered by this segment
    pub left_value: String,
    /// Right text covered by this segment
    pub right_value: String,
}

/// Result of comparing label text against print text
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    /// Ratcliff/Obershelp ratio over the normalized texts (0.0 - 1.0)
    pub similarity: f64,
    /// Aligned diff over the raw texts
    pub diff: Vec<DiffSegment>,
    /// Left raw text with divergent segments wrapped in highlight markup
    pub highlighted_left: String,
    /// Right raw text with divergent segments wrapped in highlight markup
    pub highlighted_right: String,
    /// True only for an exact normalized match (similarity == 1.0)
    pub is_match: bool,
    /// Whether similarity reached the configured advisory threshold
    pub meets_threshold: bool,
}

/// Highlight markup for divergent segments on the label side
const LEFT_MARK_OPEN: &str = "<span style=\"background-color: #ffcccc; font-weight: bold;\">";
/// Highlight markup for divergent segments on the print side
const RIGHT_MARK_OPEN: &str = "<span style=\"background-color: #ccffcc; font-weight: bold;\">";
const MARK_CLOSE: &str = "</span>";

/// Reduce a string to its ASCII-alphanumeric payload, preserving order and case
///
/// Whitespace, punctuation and all non-Latin script are discarded: only the
/// serial-style code matters for equality. Idempotent by construction.
pub fn normalize(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Compares two raw OCR texts
#[derive(Debug, Clone, Default)]
pub struct TextComparator {
    settings: CompareSettings,
}

impl TextComparator {
    /// Create a comparator with the given policy settings
    pub fn new(settings: CompareSettings) -> Self {
        Self { settings }
    }

    /// Currently configured advisory threshold
    pub fn similarity_threshold(&self) -> f64 {
        self.settings.similarity_threshold
    }

    /// Compare raw label text against raw print text
    ///
    /// Total over any two strings. An empty raw input short-circuits to a
    /// zero-similarity failure with an empty diff; the vacuous-equality
    /// case (both sides normalize to nothing) only applies when both raw
    /// inputs are non-empty.
    pub fn compare(&self, raw_left: &str, raw_right: &str) -> ComparisonResult {
        if raw_left.is_empty() || raw_right.is_empty() {
            return ComparisonResult {
                similarity: 0.0,
                diff: Vec::new(),
                highlighted_left: raw_left.to_string(),
                highlighted_right: raw_right.to_string(),
                is_match: false,
                meets_threshold: false,
            };
        }

        let norm_left = normalize(raw_left);
        let norm_right = normalize(raw_right);

        let similarity = match (norm_left.is_empty(), norm_right.is_empty()) {
            (true, true) => 1.0,
            (true, false) | (false, true) => 0.0,
            (false, false) => SequenceMatcher::new(&norm_left, &norm_right).ratio(),
        };

        let diff = Self::diff_segments(raw_left, raw_right);
        let (highlighted_left, highlighted_right) = Self::render_highlight(&diff);

        ComparisonResult {
            similarity,
            diff,
            highlighted_left,
            highlighted_right,
            is_match: similarity == 1.0,
            meets_threshold: similarity >= self.settings.similarity_threshold,
        }
    }

    /// Aligned diff over the raw, unnormalized strings
    fn diff_segments(raw_left: &str, raw_right: &str) -> Vec<DiffSegment> {
        let matcher = SequenceMatcher::new(raw_left, raw_right);
        matcher
            .opcodes()
            .into_iter()
            .map(|op| DiffSegment {
                kind: op.kind,
                left_range: (op.a_start, op.a_end),
                right_range: (op.b_start, op.b_end),
                left_value: matcher.a_slice(op.a_start, op.a_end),
                right_value: matcher.b_slice(op.b_start, op.b_end),
            })
            .collect()
    }

    /// Render both sides with divergent segments wrapped in highlight markup
    ///
    /// Equal segments pass through verbatim; textual content is preserved
    /// exactly on both sides.
    fn render_highlight(diff: &[DiffSegment]) -> (String, String) {
        let mut left = String::new();
        let mut right = String::new();

        for seg in diff {
            match seg.kind {
                OpKind::Equal => {
                    left.push_str(&seg.left_value);
                    right.push_str(&seg.right_value);
                }
                OpKind::Replace => {
                    left.push_str(LEFT_MARK_OPEN);
                    left.push_str(&seg.left_value);
                    left.push_str(MARK_CLOSE);
                    right.push_str(RIGHT_MARK_OPEN);
                    right.push_str(&seg.right_value);
                    right.push_str(MARK_CLOSE);
                }
                OpKind::Delete => {
                    left.push_str(LEFT_MARK_OPEN);
                    left.push_str(&seg.left_value);
                    left.push_str(MARK_CLOSE);
                }
                OpKind::Insert => {
                    right.push_str(RIGHT_MARK_OPEN);
                    right.push_str(&seg.right_value);
                    right.push_str(MARK_CLOSE);
                }
            }
        }

        (left, right)
    }
}
