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
use crate::translate::{flag, EntitySamples, Translator};
use crate::upstream::nest::{HvacMode, HvacState, NestSnapshot, Thermostat};

pub const LAST_CONNECTION: MetricDesc = MetricDesc::new(
    "nest_last_connection",
    "Unix timestamp (seconds) of the last successful interaction with the Nest service",
);
pub const IS_ONLINE: MetricDesc = MetricDesc::new(
    "nest_is_online",
    "Device connection status with the Nest Service (1 for online, 0 for offline)",
);
pub const AMBIENT_TEMPERATURE_C: MetricDesc = MetricDesc::new(
    "nest_ambient_temperature_c",
    "Temperature, measured at the device, in half degrees Celsius (0.5°C)",
);
pub const AMBIENT_TEMPERATURE_F: MetricDesc = MetricDesc::new(
    "nest_ambient_temperature_f",
    "Temperature, measured at the device, in whole degrees Fahrenheit (°F)",
);
pub const HUMIDITY: MetricDesc = MetricDesc::new(
    "nest_humidity",
    "Humidity, in percent (%) format, measured at the device, rounded to the nearest 5%",
);
pub const HEATING: MetricDesc = MetricDesc::new("nest_heating", "Indicates whether HVAC system is actively heating");
pub const COOLING: MetricDesc = MetricDesc::new("nest_cooling", "Indicates whether HVAC system is actively cooling");
pub const TARGET_HIGH_C: MetricDesc = MetricDesc::new(
    "nest_target_temperature_high_c",
    "Maximum target temperature, displayed in half degrees Celsius (0.5°C)",
);
pub const TARGET_LOW_C: MetricDesc = MetricDesc::new(
    "nest_target_temperature_low_c",
    "Minimum target temperature, displayed in half degrees Celsius (0.5°C)",
);
pub const TARGET_HIGH_F: MetricDesc = MetricDesc::new(
    "nest_target_temperature_high_f",
    "Maximum target temperature, displayed in whole degrees Fahrenheit (°F)",
);
pub const TARGET_LOW_F: MetricDesc = MetricDesc::new(
    "nest_target_temperature_low_f",
    "Minimum target temperature, displayed in whole degrees Fahrenheit (°F)",
);
pub const TIME_TO_TARGET: MetricDesc = MetricDesc::new(
    "nest_time_to_target",
    "The time, in minutes, that it will take for the structure to reach the target temperature",
);

/// Translate Nest thermostats into samples labeled by thermostat ID.
///
/// Every sample of an offline thermostat is `NaN`, including its connection
/// status and the time of its last connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NestTranslator;

impl Translator for NestTranslator {
    type Snapshot = NestSnapshot;

    fn translate(&self, snapshot: &NestSnapshot) -> Vec<MetricSample> {
        let mut out = Vec::new();

        for t in snapshot.thermostats.iter() {
            let labels = Labels::new().with("thermostat_id", t.device_id.as_str());
            let targets = Targets::from(t);

            EntitySamples::new(&mut out, labels, snapshot.fetched_at, t.is_online())
                .reading(
                    LAST_CONNECTION,
                    t.last_connection.map(|dt| dt.timestamp_millis() as f64 / 1000.0),
                )
                .reading(IS_ONLINE, Some(flag(t.is_online())))
                .reading(AMBIENT_TEMPERATURE_C, t.ambient_temperature_c)
                .reading(AMBIENT_TEMPERATURE_F, t.ambient_temperature_f)
                .reading(HUMIDITY, t.humidity)
                .reading(HEATING, t.hvac_state.map(|s| flag(s == HvacState::Heating)))
                .reading(COOLING, t.hvac_state.map(|s| flag(s == HvacState::Cooling)))
                .reading(TARGET_HIGH_C, targets.high_c)
                .reading(TARGET_LOW_C, targets.low_c)
                .reading(TARGET_HIGH_F, targets.high_f)
                .reading(TARGET_LOW_F, targets.low_f)
                .reading(TIME_TO_TARGET, t.time_to_target.as_deref().and_then(minutes_to_target));
        }

        out
    }
}

/// Target temperatures that apply in the current HVAC mode.
///
/// When heating and cooling, the thermostat keeps the temperature between a low
/// and a high target. When only heating or only cooling there is a single target
/// which is the low or high bound respectively. Other modes have no target.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Targets {
    high_c: Option<f64>,
    low_c: Option<f64>,
    high_f: Option<f64>,
    low_f: Option<f64>,
}

impl From<&Thermostat> for Targets {
    fn from(t: &Thermostat) -> Self {
        match t.hvac_mode {
            Some(HvacMode::HeatCool) => Targets {
                high_c: t.target_temperature_high_c,
                low_c: t.target_temperature_low_c,
                high_f: t.target_temperature_high_f,
                low_f: t.target_temperature_low_f,
            },
            Some(HvacMode::Cool) => Targets {
                high_c: t.target_temperature_c,
                high_f: t.target_temperature_f,
                ..Targets::default()
            },
            Some(HvacMode::Heat) => Targets {
                low_c: t.target_temperature_c,
                low_f: t.target_temperature_f,
                ..Targets::default()
            },
            _ => Targets::default(),
        }
    }
}

/// Parse estimates like `~15`, `<5`, or `>120` into a number of minutes.
fn minutes_to_target(raw: &str) -> Option<f64> {
    raw.trim_start_matches(&['~', '<', '>'][..]).trim().parse::<f64>().ok()
}

#[cfg(test)]
mod test {
    use super::{
        minutes_to_target, NestTranslator, AMBIENT_TEMPERATURE_C, COOLING, HEATING, IS_ONLINE, LAST_CONNECTION,
        TARGET_HIGH_C, TARGET_HIGH_F, TARGET_LOW_C, TARGET_LOW_F, TIME_TO_TARGET,
    };
    use crate::metrics::MetricSample;
    use crate::translate::Translator;
    use crate::upstream::nest::{HvacMode, HvacState, NestSnapshot, Thermostat};
    use chrono::{TimeZone, Utc};
    use std::time::{Duration, UNIX_EPOCH};

    fn thermostat(mode: HvacMode, state: HvacState, online: bool) -> Thermostat {
        Thermostat {
            device_id: "peyiJNo0IldT2YlIVtYaGQ".to_owned(),
            name: Some("Hallway".to_owned()),
            is_online: Some(online),
            last_connection: Some(Utc.with_ymd_and_hms(2016, 10, 31, 23, 59, 59).unwrap()),
            ambient_temperature_c: Some(21.5),
            ambient_temperature_f: Some(71.0),
            humidity: Some(40.0),
            hvac_state: Some(state),
            hvac_mode: Some(mode),
            target_temperature_c: Some(20.0),
            target_temperature_f: Some(68.0),
            target_temperature_high_c: Some(24.0),
            target_temperature_high_f: Some(75.0),
            target_temperature_low_c: Some(19.5),
            target_temperature_low_f: Some(67.0),
            time_to_target: Some("~15".to_owned()),
        }
    }

    fn translate(t: Thermostat) -> Vec<MetricSample> {
        let snapshot = NestSnapshot {
            thermostats: vec![t],
            fetched_at: UNIX_EPOCH + Duration::from_secs(1_477_958_400),
        };

        NestTranslator.translate(&snapshot)
    }

    fn value(samples: &[MetricSample], name: &str) -> f64 {
        samples
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.value)
            .unwrap_or_else(|| panic!("no sample {}", name))
    }

    #[test]
    fn test_online_heat_cool() {
        let samples = translate(thermostat(HvacMode::HeatCool, HvacState::Heating, true));

        assert_eq!(12, samples.len());
        assert_eq!(1_477_958_399.0, value(&samples, LAST_CONNECTION.name));
        assert_eq!(1.0, value(&samples, IS_ONLINE.name));
        assert_eq!(21.5, value(&samples, AMBIENT_TEMPERATURE_C.name));
        assert_eq!(1.0, value(&samples, HEATING.name));
        assert_eq!(0.0, value(&samples, COOLING.name));
        assert_eq!(24.0, value(&samples, TARGET_HIGH_C.name));
        assert_eq!(19.5, value(&samples, TARGET_LOW_C.name));
        assert_eq!(75.0, value(&samples, TARGET_HIGH_F.name));
        assert_eq!(67.0, value(&samples, TARGET_LOW_F.name));
        assert_eq!(15.0, value(&samples, TIME_TO_TARGET.name));
        assert!(samples
            .iter()
            .all(|s| s.labels.get("thermostat_id") == Some("peyiJNo0IldT2YlIVtYaGQ")));
    }

    #[test]
    fn test_cool_mode_single_target() {
        let samples = translate(thermostat(HvacMode::Cool, HvacState::Cooling, true));

        assert_eq!(1.0, value(&samples, COOLING.name));
        assert_eq!(20.0, value(&samples, TARGET_HIGH_C.name));
        assert_eq!(68.0, value(&samples, TARGET_HIGH_F.name));
        assert!(value(&samples, TARGET_LOW_C.name).is_nan());
        assert!(value(&samples, TARGET_LOW_F.name).is_nan());
    }

    #[test]
    fn test_heat_mode_single_target() {
        let samples = translate(thermostat(HvacMode::Heat, HvacState::Off, true));

        assert_eq!(0.0, value(&samples, HEATING.name));
        assert_eq!(20.0, value(&samples, TARGET_LOW_C.name));
        assert!(value(&samples, TARGET_HIGH_C.name).is_nan());
    }

    #[test]
    fn test_eco_mode_no_targets() {
        let samples = translate(thermostat(HvacMode::Eco, HvacState::Off, true));

        assert_eq!(12, samples.len());
        for desc in [TARGET_HIGH_C, TARGET_LOW_C, TARGET_HIGH_F, TARGET_LOW_F] {
            assert!(value(&samples, desc.name).is_nan());
        }
    }

    #[test]
    fn test_offline_all_samples_nan() {
        let samples = translate(thermostat(HvacMode::HeatCool, HvacState::Heating, false));

        // Every series is still present
        assert_eq!(12, samples.len());
        assert!(value(&samples, IS_ONLINE.name).is_nan());
        assert!(value(&samples, LAST_CONNECTION.name).is_nan());
        assert!(samples.iter().all(|s| s.value.is_nan()));
    }

    #[test]
    fn test_absent_fields_nan() {
        let t = Thermostat {
            device_id: "abc".to_owned(),
            name: None,
            is_online: None,
            last_connection: None,
            ambient_temperature_c: None,
            ambient_temperature_f: None,
            humidity: None,
            hvac_state: None,
            hvac_mode: None,
            target_temperature_c: None,
            target_temperature_f: None,
            target_temperature_high_c: None,
            target_temperature_high_f: None,
            target_temperature_low_c: None,
            target_temperature_low_f: None,
            time_to_target: None,
        };
        let samples = translate(t);

        assert_eq!(12, samples.len());
        assert_eq!(1.0, value(&samples, IS_ONLINE.name));
        assert!(samples
            .iter()
            .filter(|s| s.name() != IS_ONLINE.name)
            .all(|s| s.value.is_nan()));
    }

    #[test]
    fn test_translate_idempotent() {
        let t = thermostat(HvacMode::Cool, HvacState::Cooling, false);
        assert_eq!(translate(t.clone()), translate(t));
    }

    #[test]
    fn test_minutes_to_target() {
        assert_eq!(Some(15.0), minutes_to_target("~15"));
        assert_eq!(Some(5.0), minutes_to_target("<5"));
        assert_eq!(Some(120.0), minutes_to_target(">120"));
        assert_eq!(Some(0.0), minutes_to_target("0"));
        assert_eq!(None, minutes_to_target("soon"));
    }
}
