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

use crate::metrics::{Labels, MetricDesc, MetricSample};
use crate::translate::{fixed_point, flag, lux_from_light_level, EntitySamples, Translator};
use crate::upstream::hue::{HueSnapshot, LIGHT_LEVEL_SENSOR, PRESENCE_SENSOR, TEMPERATURE_SENSOR};

pub const TEMPERATURE: MetricDesc = MetricDesc::new("hue_temperature_c", "Temperature (°C)");
pub const LIGHT_LEVEL: MetricDesc = MetricDesc::new("hue_light_level_lux", "Illuminance (lux)");
pub const DARK: MetricDesc = MetricDesc::new("hue_dark", "Light level is below the dark threshold (1 for dark, 0 otherwise)");
pub const DAYLIGHT: MetricDesc = MetricDesc::new(
    "hue_daylight",
    "Light level is above the daylight threshold (1 for daylight, 0 otherwise)",
);
pub const PRESENCE: MetricDesc = MetricDesc::new("hue_presence", "Motion detected (1 for presence, 0 otherwise)");
pub const BATTERY: MetricDesc = MetricDesc::new("hue_battery_percent", "Battery level (%)");

/// Fixed point scaling factor of temperature readings.
const TEMPERATURE_DIVISOR: f64 = 100.0;

/// Translate temperature, light level, and motion sensors of a Hue bridge into
/// samples labeled by sensor ID and unique ID. Other sensor types are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct HueTranslator;

impl Translator for HueTranslator {
    type Snapshot = HueSnapshot;

    fn translate(&self, snapshot: &HueSnapshot) -> Vec<MetricSample> {
        let mut out = Vec::new();

        for (id, sensor) in snapshot.sensors.iter() {
            let labels = Labels::new()
                .with("sensorid", id.as_str())
                .with("uniqueid", sensor.uniqueid.as_deref().unwrap_or_default());
            let mut samples = EntitySamples::new(&mut out, labels, snapshot.fetched_at, sensor.is_reachable());

            match sensor.kind.as_str() {
                TEMPERATURE_SENSOR => {
                    samples.reading(
                        TEMPERATURE,
                        sensor.state.temperature.map(|t| fixed_point(t, TEMPERATURE_DIVISOR)),
                    );
                }
                LIGHT_LEVEL_SENSOR => {
                    samples
                        .reading(LIGHT_LEVEL, sensor.state.lightlevel.map(lux_from_light_level))
                        .reading(DARK, sensor.state.dark.map(flag))
                        .reading(DAYLIGHT, sensor.state.daylight.map(flag));
                }
                PRESENCE_SENSOR => {
                    samples.reading(PRESENCE, sensor.state.presence.map(flag));
                }
                _ => continue,
            }

            samples.reading(BATTERY, sensor.config.battery);
        }

        out
    }
}
