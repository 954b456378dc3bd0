//! Per-session zone-crossing counter.

use std::collections::HashSet;
use std::hash::Hash;

use image::RgbImage;

use crate::counting::zone::{ZoneLabel, ZoneLayout};
use crate::drawing::{draw_zones, OverlayStyle};
use crate::utils::warn_once;
use crate::Result;

/// Directional totals, one per counting line. Each is the cardinality of the
/// corresponding registry, so they never decrease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneCounts {
    pub left_entry: usize,
    pub left_exit: usize,
    pub right_entry: usize,
    pub right_exit: usize,
}

impl ZoneCounts {
    pub fn entries(&self) -> usize {
        self.left_entry + self.right_entry
    }

    pub fn exits(&self) -> usize {
        self.left_exit + self.right_exit
    }
}

/// A crossing recorded by [`ZoneCounter::register`]: emitted exactly once per
/// `(zone, track_id)` pair, on the frame the track first sits inside the zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneEvent<Id> {
    pub zone: ZoneLabel,
    pub track_id: Id,
    pub center: [f64; 2],
}

/// Counts tracked objects crossing the layout's lines.
///
/// One counter serves one video session; constructing a new one starts all
/// counts from zero. Track ids are generic so numeric tracker ids and string
/// ids like `"car-1"` both work. Registration is idempotent per id and zone:
/// an object sitting on a line for many frames still counts once.
#[derive(Debug)]
pub struct ZoneCounter<Id> {
    layout: ZoneLayout,
    registries: [HashSet<Id>; 4],
    skipped_objects: u64,
}

impl<Id: Eq + Hash + Clone> ZoneCounter<Id> {
    /// Create a counter over a validated layout.
    pub fn new(layout: ZoneLayout) -> Result<Self> {
        layout.validate()?;
        Ok(Self {
            layout,
            registries: std::array::from_fn(|_| HashSet::new()),
            skipped_objects: 0,
        })
    }

    pub fn layout(&self) -> &ZoneLayout {
        &self.layout
    }

    /// Register one tracked object for the current frame.
    ///
    /// `extent` holds the object's corner points; the crossing test uses the
    /// midpoint of the first two. Objects with fewer than 2 points cannot
    /// produce a center and are skipped (counted in
    /// [`skipped_objects`](Self::skipped_objects), warned once per process).
    ///
    /// Returns the zones this id newly crossed; re-registering an id already
    /// inside a zone's registry returns nothing for that zone.
    pub fn register(&mut self, track_id: &Id, extent: &[[f64; 2]]) -> Vec<ZoneEvent<Id>> {
        if extent.len() < 2 {
            warn_once("tracked object extent has fewer than 2 points; skipping zone registration");
            self.skipped_objects += 1;
            return Vec::new();
        }
        let center = [
            (extent[0][0] + extent[1][0]) / 2.0,
            (extent[0][1] + extent[1][1]) / 2.0,
        ];

        let mut events = Vec::new();
        for zone in &self.layout.zones {
            if !zone.contains(center) {
                continue;
            }
            let registry = &mut self.registries[zone.label.index()];
            if !registry.contains(track_id) {
                registry.insert(track_id.clone());
                events.push(ZoneEvent {
                    zone: zone.label,
                    track_id: track_id.clone(),
                    center,
                });
            }
        }
        events
    }

    /// [`register`](Self::register), then draw the zone overlay onto `frame`
    /// with any newly-crossed line flashed for this frame.
    pub fn register_and_render(
        &mut self,
        track_id: &Id,
        extent: &[[f64; 2]],
        frame: &mut RgbImage,
    ) -> Vec<ZoneEvent<Id>> {
        let events = self.register(track_id, extent);
        let flashes: Vec<ZoneLabel> = events.iter().map(|event| event.zone).collect();
        draw_zones(frame, self, &flashes, &OverlayStyle::default());
        events
    }

    /// Current directional totals.
    pub fn counts(&self) -> ZoneCounts {
        ZoneCounts {
            left_entry: self.registries[ZoneLabel::LeftEntry.index()].len(),
            left_exit: self.registries[ZoneLabel::LeftExit.index()].len(),
            right_entry: self.registries[ZoneLabel::RightEntry.index()].len(),
            right_exit: self.registries[ZoneLabel::RightExit.index()].len(),
        }
    }

    pub fn count_for(&self, label: ZoneLabel) -> usize {
        self.registries[label.index()].len()
    }

    pub fn has_crossed(&self, label: ZoneLabel, track_id: &Id) -> bool {
        self.registries[label.index()].contains(track_id)
    }

    /// Objects skipped for lacking a usable extent.
    pub fn skipped_objects(&self) -> u64 {
        self.skipped_objects
    }
}
