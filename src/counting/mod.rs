//! Zone-crossing counting.
//!
//! A [`ZoneLayout`] describes where the counting lines sit, a [`ZoneCounter`]
//! holds one session's crossing registries and turns per-frame track
//! positions into directional counts and [`ZoneEvent`]s.

mod counter;
mod zone;

pub use counter::{ZoneCounter, ZoneCounts, ZoneEvent};
pub use zone::{Zone, ZoneLabel, ZoneLayout};
