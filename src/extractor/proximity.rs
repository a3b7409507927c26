//! Label matching and spatial search for `ByProximity` strategies

use serde::{Deserialize, Serialize};

use crate::page_source::BoundingBox;
use crate::utils::constants::{DIRECTION_TOLERANCE_PX, MAX_PROXIMITY_VALUE_CHARS};
use crate::utils::string_utils::char_len;

/// Side of the label on which a value must sit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
    Left,
    Right,
}

impl Direction {
    /// Whether `candidate` lies on this side of `label`.
    ///
    /// Offsets within the dead-zone count as neither side.
    #[must_use]
    pub fn holds(self, label: &BoundingBox, candidate: &BoundingBox) -> bool {
        let (lx, ly) = label.center();
        let (cx, cy) = candidate.center();
        let (dx, dy) = (cx - lx, cy - ly);
        match self {
            Self::Above => dy < -DIRECTION_TOLERANCE_PX,
            Self::Below => dy > DIRECTION_TOLERANCE_PX,
            Self::Left => dx < -DIRECTION_TOLERANCE_PX,
            Self::Right => dx > DIRECTION_TOLERANCE_PX,
        }
    }
}

/// Similarity of two already-normalized strings in `[0, 1]`.
///
/// Exact matches score 1.0. Substring matches score in `[0.8, 1.0)` so they
/// always clear the label threshold and outrank fuzzy matches of similar
/// length. Everything else scores `1 - levenshtein / max_len`.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (len_a, len_b) = (char_len(a), char_len(b));
    if a.contains(b) || b.contains(a) {
        let (shorter, longer) = if len_a < len_b {
            (len_a, len_b)
        } else {
            (len_b, len_a)
        };
        // Strictly below an exact match
        return (0.8 + 0.2 * shorter as f64 / longer as f64).min(0.999);
    }

    let max_len = len_a.max(len_b) as f64;
    1.0 - levenshtein(a, b) as f64 / max_len
}

/// Edit distance over Unicode scalar values
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

/// Whether `text` may be the value next to a label whose text is `label`.
///
/// Both are in comparable (lowercased, normalized) form. Other labels (text
/// ending in `:`) and long blocks of prose are rejected.
#[must_use]
pub fn is_value_candidate(label: &str, text: &str) -> bool {
    !text.is_empty()
        && text != label
        && !text.ends_with(':')
        && char_len(text) < MAX_PROXIMITY_VALUE_CHARS
}

/// Whether one box encloses the other.
///
/// Enclosing boxes are the label's ancestors or descendants, never a value
/// sitting next to it.
#[must_use]
pub fn is_nested(a: &BoundingBox, b: &BoundingBox) -> bool {
    encloses(a, b) || encloses(b, a)
}

fn encloses(outer: &BoundingBox, inner: &BoundingBox) -> bool {
    outer.x <= inner.x
        && outer.y <= inner.y
        && outer.x + outer.width >= inner.x + inner.width
        && outer.y + outer.height >= inner.y + inner.height
}
