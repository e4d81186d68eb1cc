//! Zone classification for circle positions
//!
//! Positions live in a 0-100 coordinate space with (50,50) as the center of
//! the circle. A position's standing zone is derived from its normalized
//! distance from the center, never stored independently.

use serde::{Deserialize, Serialize};

/// Discrete standing zones, ordered from center outward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Center,
    Inner,
    Middle,
    Edge,
    Off,
}

/// Display metadata for a zone. Constant configuration, never mutated.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ZoneInfo {
    pub label: &'static str,
    pub description: &'static str,
    pub color: &'static str,
}

impl Zone {
    pub const ALL: [Zone; 5] = [Zone::Center, Zone::Inner, Zone::Middle, Zone::Edge, Zone::Off];

    /// Display metadata lookup table.
    pub fn info(&self) -> ZoneInfo {
        match self {
            Zone::Center => ZoneInfo {
                label: "Perfect",
                description: "The golden center - all is well",
                color: "zone-center",
            },
            Zone::Inner => ZoneInfo {
                label: "Good",
                description: "In good standing",
                color: "zone-inner",
            },
            Zone::Middle => ZoneInfo {
                label: "Neutral",
                description: "Not great, not terrible",
                color: "zone-middle",
            },
            Zone::Edge => ZoneInfo {
                label: "Edge",
                description: "Hanging on by your humor",
                color: "zone-edge",
            },
            Zone::Off => ZoneInfo {
                label: "Off",
                description: "The point of no return",
                color: "zone-off",
            },
        }
    }
}

/// Normalized distance from the center (50,50).
///
/// Scaled so that half the coordinate range (50 units) maps to 100, then
/// clamped, so any input including far out-of-range coordinates yields a
/// value in [0,100].
pub fn distance_from_center(x: f64, y: f64) -> f64 {
    let dx = x - 50.0;
    let dy = y - 50.0;
    let distance = (dx * dx + dy * dy).sqrt();
    (distance / 50.0 * 100.0).min(100.0)
}

/// Classify a normalized distance into a zone.
///
/// Thresholds are inclusive on the upper bound: exactly 15 is still Center.
pub fn classify(distance: f64) -> Zone {
    if distance <= 15.0 {
        Zone::Center
    } else if distance <= 35.0 {
        Zone::Inner
    } else if distance <= 55.0 {
        Zone::Middle
    } else if distance <= 75.0 {
        Zone::Edge
    } else {
        Zone::Off
    }
}

/// Zone for a raw coordinate pair.
pub fn zone_from_position(x: f64, y: f64) -> Zone {
    classify(distance_from_center(x, y))
}
