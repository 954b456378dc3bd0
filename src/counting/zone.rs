//! Counting zones: line segments with a perpendicular tolerance band.
//!
//! Zone geometry is configuration, not code. `ZoneLayout` derives serde so
//! deployments can load it from JSON; validation runs once at construction
//! (or right after deserialization) and never per frame.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which counting line a zone represents.
///
/// Entry lines count traffic arriving on their side of the scene, exit lines
/// count traffic leaving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneLabel {
    LeftEntry,
    LeftExit,
    RightEntry,
    RightExit,
}

impl ZoneLabel {
    pub const ALL: [ZoneLabel; 4] = [
        ZoneLabel::LeftEntry,
        ZoneLabel::LeftExit,
        ZoneLabel::RightEntry,
        ZoneLabel::RightExit,
    ];

    /// Stable index into per-label storage.
    pub fn index(self) -> usize {
        match self {
            ZoneLabel::LeftEntry => 0,
            ZoneLabel::LeftExit => 1,
            ZoneLabel::RightEntry => 2,
            ZoneLabel::RightExit => 3,
        }
    }

    pub fn is_entry(self) -> bool {
        matches!(self, ZoneLabel::LeftEntry | ZoneLabel::RightEntry)
    }

    /// Overlay caption prefix for this zone's count.
    pub fn caption(self) -> &'static str {
        if self.is_entry() {
            "In: "
        } else {
            "Out: "
        }
    }
}

impl std::fmt::Display for ZoneLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ZoneLabel::LeftEntry => "left_entry",
            ZoneLabel::LeftExit => "left_exit",
            ZoneLabel::RightEntry => "right_entry",
            ZoneLabel::RightExit => "right_exit",
        };
        f.write_str(name)
    }
}

/// A counting line: a segment plus a band of `band_half_width` pixels on each
/// side, measured along the axis orthogonal to the segment's dominant
/// orientation.
///
/// A track center is inside the zone when it lies between the segment's
/// endpoints on the dominant axis (inclusive) and within the band on the
/// other axis. The narrow default band means a fast object can step across
/// the line between two frames without ever being inside; widen
/// `band_half_width` when that matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub label: ZoneLabel,
    pub start: [f64; 2],
    pub end: [f64; 2],
    #[serde(default = "default_band_half_width")]
    pub band_half_width: f64,
}

fn default_band_half_width() -> f64 {
    1.0
}

impl Zone {
    /// Create a zone with the default one-pixel band.
    pub fn new(label: ZoneLabel, start: [f64; 2], end: [f64; 2]) -> Result<Self> {
        let zone = Self {
            label,
            start,
            end,
            band_half_width: default_band_half_width(),
        };
        zone.validate()?;
        Ok(zone)
    }

    /// Check shape invariants; geometry problems are configuration errors,
    /// caught here rather than while frames are flowing.
    pub fn validate(&self) -> Result<()> {
        let coords = [self.start[0], self.start[1], self.end[0], self.end[1]];
        if coords.iter().any(|c| !c.is_finite()) || !self.band_half_width.is_finite() {
            return Err(Error::InvalidZoneConfig(format!(
                "zone {} has non-finite geometry",
                self.label
            )));
        }
        if self.band_half_width <= 0.0 {
            return Err(Error::InvalidZoneConfig(format!(
                "zone {} band_half_width must be positive, got {}",
                self.label, self.band_half_width
            )));
        }
        let axis = if self.is_horizontal() { 0 } else { 1 };
        if self.start[axis] >= self.end[axis] {
            return Err(Error::InvalidZoneConfig(format!(
                "zone {} span is empty or inverted along its dominant axis ({} to {})",
                self.label, self.start[axis], self.end[axis]
            )));
        }
        Ok(())
    }

    fn is_horizontal(&self) -> bool {
        (self.end[0] - self.start[0]).abs() >= (self.end[1] - self.start[1]).abs()
    }

    /// Whether a track center counts as crossing this zone.
    pub fn contains(&self, center: [f64; 2]) -> bool {
        let (span, cross) = if self.is_horizontal() { (0, 1) } else { (1, 0) };
        let position = center[span];
        if position < self.start[span] || position > self.end[span] {
            return false;
        }
        // Band around the segment, interpolated so slanted lines work too
        let t = (position - self.start[span]) / (self.end[span] - self.start[span]);
        let line = self.start[cross] + t * (self.end[cross] - self.start[cross]);
        (center[cross] - line).abs() <= self.band_half_width
    }
}

/// The full set of counting lines for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneLayout {
    pub zones: Vec<Zone>,
}

impl ZoneLayout {
    /// Build a validated layout.
    pub fn new(zones: Vec<Zone>) -> Result<Self> {
        let layout = Self { zones };
        layout.validate()?;
        Ok(layout)
    }

    /// Deserialize and validate a layout from JSON, e.g.
    /// `{"zones":[{"label":"left_entry","start":[0,650],"end":[1130,650]}]}`.
    pub fn from_json(text: &str) -> Result<Self> {
        let layout: ZoneLayout = serde_json::from_str(text)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Validate every zone plus layout-level invariants (at least one zone,
    /// no duplicated labels).
    pub fn validate(&self) -> Result<()> {
        if self.zones.is_empty() {
            return Err(Error::InvalidZoneConfig("layout has no zones".to_string()));
        }
        let mut seen = [false; 4];
        for zone in &self.zones {
            zone.validate()?;
            let index = zone.label.index();
            if seen[index] {
                return Err(Error::InvalidZoneConfig(format!(
                    "duplicate zone label {}",
                    zone.label
                )));
            }
            seen[index] = true;
        }
        Ok(())
    }

    /// Check that every endpoint lies inside a `width` x `height` frame.
    ///
    /// Deliberately separate from [`validate`](Self::validate): a span
    /// reaching past the frame edge still counts everything inside the
    /// frame, so it is only a defect relative to a concrete camera. This
    /// reports it without silently clamping.
    pub fn validate_against_frame(&self, width: u32, height: u32) -> Result<()> {
        let (w, h) = (f64::from(width), f64::from(height));
        for zone in &self.zones {
            for point in [zone.start, zone.end] {
                if point[0] < 0.0 || point[0] > w || point[1] < 0.0 || point[1] > h {
                    return Err(Error::InvalidZoneConfig(format!(
                        "zone {} endpoint ({}, {}) outside {}x{} frame",
                        zone.label, point[0], point[1], width, height
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, label: ZoneLabel) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.label == label)
    }
}

/// Stock two-lane traffic layout.
///
/// The right-exit span runs to x = 19000, far past any real frame edge;
/// [`ZoneLayout::validate_against_frame`] reports it for callers that want
/// their layout bounded.
impl Default for ZoneLayout {
    fn default() -> Self {
        Self {
            zones: vec![
                Zone {
                    label: ZoneLabel::LeftEntry,
                    start: [0.0, 650.0],
                    end: [1130.0, 650.0],
                    band_half_width: 1.0,
                },
                Zone {
                    label: ZoneLabel::LeftExit,
                    start: [0.0, 170.0],
                    end: [630.0, 170.0],
                    band_half_width: 1.0,
                },
                Zone {
                    label: ZoneLabel::RightEntry,
                    start: [800.0, 260.0],
                    end: [1260.0, 260.0],
                    band_half_width: 1.0,
                },
                Zone {
                    label: ZoneLabel::RightExit,
                    start: [1000.0, 500.0],
                    end: [19000.0, 500.0],
                    band_half_width: 1.0,
                },
            ],
        }
    }
}
