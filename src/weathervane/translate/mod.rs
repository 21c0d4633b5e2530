// Weathervane - Smart home and weather metrics exporter for Prometheus
//
// Copyright 2023 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Conversion of upstream snapshots into metric samples.
//!
//! Translators are pure: the same snapshot always produces the same samples,
//! timestamped with the time the snapshot was fetched. Every entity produces
//! the same set of series on every call. Values that are missing from a
//! snapshot, or that belong to a device reported as unreachable, are emitted as
//! `NaN` instead of being left out.

pub mod hue;
pub mod nest;
pub mod openweather;

use crate::metrics::{Labels, MetricDesc, MetricSample};
use std::time::SystemTime;

/// Pure conversion from one upstream snapshot to the samples derived from it.
pub trait Translator: Send + Sync {
    type Snapshot;

    fn translate(&self, snapshot: &Self::Snapshot) -> Vec<MetricSample>;
}

/// Difference between degrees celsius and kelvin.
pub const KELVIN_CELSIUS_OFFSET: f64 = -273.15;

/// Scale a fixed point integer reading by its divisor, e.g. `2150 / 100 = 21.5`.
pub fn fixed_point(raw: i64, divisor: f64) -> f64 {
    raw as f64 / divisor
}

/// Illuminance in lux from a light level reading on the logarithmic scale used
/// by Zigbee light sensors: `lux = 10 ^ ((raw - 1) / 10000)`.
pub fn lux_from_light_level(raw: i64) -> f64 {
    10f64.powf((raw - 1) as f64 / 10_000.0)
}

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin + KELVIN_CELSIUS_OFFSET
}

/// 1 for true, 0 for false.
pub fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Accumulates the samples for a single entity, applying the reachability policy.
pub(crate) struct EntitySamples<'a> {
    labels: Labels,
    timestamp: SystemTime,
    reachable: bool,
    out: &'a mut Vec<MetricSample>,
}

impl<'a> EntitySamples<'a> {
    pub(crate) fn new(out: &'a mut Vec<MetricSample>, labels: Labels, timestamp: SystemTime, reachable: bool) -> Self {
        EntitySamples {
            labels,
            timestamp,
            reachable,
            out,
        }
    }

    /// A reading from the device: `NaN` when absent or when the device isn't reachable.
    pub(crate) fn reading(&mut self, desc: MetricDesc, value: Option<f64>) -> &mut Self {
        let value = if self.reachable { value } else { None };
        self.out.push(MetricSample::new(
            desc,
            self.labels.clone(),
            value.unwrap_or(f64::NAN),
            self.timestamp,
        ));
        self
    }
}

#[cfg(test)]
mod test {
    use super::{fixed_point, flag, kelvin_to_celsius, lux_from_light_level, EntitySamples};
    use crate::metrics::{Labels, MetricDesc};
    use std::time::UNIX_EPOCH;

    const READING: MetricDesc = MetricDesc::new("test_reading", "A reading");
    const ONLINE: MetricDesc = MetricDesc::new("test_online", "Whether the device is online");

    #[test]
    fn test_fixed_point() {
        assert_eq!(21.50, fixed_point(2150, 100.0));
        assert_eq!(-5.25, fixed_point(-525, 100.0));
        assert_eq!(0.0, fixed_point(0, 100.0));
    }

    #[test]
    fn test_lux_from_light_level() {
        assert_eq!(10f64.powf((12345.0 - 1.0) / 10000.0), lux_from_light_level(12345));
        assert_eq!(1.0, lux_from_light_level(1));
        assert_eq!(10.0, lux_from_light_level(10001));
    }

    #[test]
    fn test_kelvin_to_celsius() {
        assert_eq!(0.0, kelvin_to_celsius(273.15));
        assert_eq!(293.15 - 273.15, kelvin_to_celsius(293.15));
    }

    #[test]
    fn test_flag() {
        assert_eq!(1.0, flag(true));
        assert_eq!(0.0, flag(false));
    }

    #[test]
    fn test_entity_samples_reachable() {
        let mut out = Vec::new();
        EntitySamples::new(&mut out, Labels::new().with("id", "1"), UNIX_EPOCH, true)
            .reading(READING, Some(3.0))
            .reading(READING, None)
            .reading(ONLINE, Some(1.0));

        assert_eq!(3, out.len());
        assert_eq!(3.0, out[0].value);
        assert!(out[1].value.is_nan());
        assert_eq!(1.0, out[2].value);
        assert!(out.iter().all(|s| s.labels.get("id") == Some("1")));
    }

    #[test]
    fn test_entity_samples_unreachable() {
        let mut out = Vec::new();
        EntitySamples::new(&mut out, Labels::new(), UNIX_EPOCH, false)
            .reading(READING, Some(3.0))
            .reading(ONLINE, Some(0.0));

        // Present but NaN, even for values describing the connection itself
        assert_eq!(2, out.len());
        assert!(out.iter().all(|s| s.value.is_nan()));
    }
}
