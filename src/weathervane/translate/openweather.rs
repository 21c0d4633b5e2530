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
use crate::translate::{kelvin_to_celsius, EntitySamples, Translator};
use crate::upstream::openweather::WeatherSnapshot;

pub const TEMPERATURE: MetricDesc = MetricDesc::new("owm_temperature", "Temperature (K)");
pub const TEMPERATURE_C: MetricDesc = MetricDesc::new("owm_temperature_c", "Temperature (°C)");
pub const FEELS_LIKE: MetricDesc = MetricDesc::new(
    "owm_temperature_feels_like",
    "Temperature accounting for the human perception of weather (K)",
);
pub const FEELS_LIKE_C: MetricDesc = MetricDesc::new(
    "owm_temperature_feels_like_c",
    "Temperature accounting for the human perception of weather (°C)",
);
pub const PRESSURE: MetricDesc = MetricDesc::new("owm_pressure", "Atmospheric pressure at sea level (hPa)");
pub const HUMIDITY: MetricDesc = MetricDesc::new("owm_humidity", "Relative humidity (%)");
pub const DEW_POINT: MetricDesc = MetricDesc::new(
    "owm_dew_point",
    "Temperature below which water droplets begin to condense (K)",
);
pub const CLOUDS: MetricDesc = MetricDesc::new("owm_clouds", "Cloudiness (%)");
pub const UVI: MetricDesc = MetricDesc::new("owm_uvi", "UV index");
pub const VISIBILITY: MetricDesc = MetricDesc::new("owm_visibility", "Average visibility (m)");
pub const WIND_SPEED: MetricDesc = MetricDesc::new("owm_wind_speed", "Wind speed (m/s)");
pub const WIND_GUST: MetricDesc = MetricDesc::new("owm_wind_gust", "Wind gust speed (m/s)");
pub const WIND_DEGREES: MetricDesc = MetricDesc::new("owm_wind_degrees", "Wind direction (degrees, meteorological)");

/// Translate current weather at each configured location into samples labeled
/// by location name and coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenWeatherTranslator;

impl Translator for OpenWeatherTranslator {
    type Snapshot = WeatherSnapshot;

    fn translate(&self, snapshot: &WeatherSnapshot) -> Vec<MetricSample> {
        let mut out = Vec::new();

        for obs in snapshot.observations.iter() {
            let labels = Labels::new()
                .with("location", obs.location.as_str())
                .with("lat", obs.onecall.lat.to_string())
                .with("long", obs.onecall.lon.to_string());
            let current = &obs.onecall.current;

            // Weather services have no notion of an unreachable device.
            EntitySamples::new(&mut out, labels, snapshot.fetched_at, true)
                .reading(TEMPERATURE, current.temp)
                .reading(TEMPERATURE_C, current.temp.map(kelvin_to_celsius))
                .reading(FEELS_LIKE, current.feels_like)
                .reading(FEELS_LIKE_C, current.feels_like.map(kelvin_to_celsius))
                .reading(PRESSURE, current.pressure)
                .reading(HUMIDITY, current.humidity)
                .reading(DEW_POINT, current.dew_point)
                .reading(CLOUDS, current.clouds)
                .reading(UVI, current.uvi)
                .reading(VISIBILITY, current.visibility)
                .reading(WIND_SPEED, current.wind_speed)
                .reading(WIND_GUST, current.wind_gust)
                .reading(WIND_DEGREES, current.wind_deg);
        }

        out
    }
}

#[cfg(test)]
mod test {
    use super::{OpenWeatherTranslator, FEELS_LIKE_C, PRESSURE, TEMPERATURE, TEMPERATURE_C, WIND_GUST, WIND_SPEED};
    use crate::metrics::{Labels, MetricSample};
    use crate::translate::Translator;
    use crate::upstream::openweather::{Current, Observation, OneCall, WeatherSnapshot};
    use std::time::{Duration, UNIX_EPOCH};

    fn observation(location: &str, lat: f64, lon: f64, current: Current) -> Observation {
        Observation {
            location: location.to_owned(),
            onecall: OneCall { lat, lon, current },
        }
    }

    fn snapshot(observations: Vec<Observation>) -> WeatherSnapshot {
        WeatherSnapshot {
            observations,
            fetched_at: UNIX_EPOCH + Duration::from_secs(1_618_317_040),
        }
    }

    fn find<'a>(samples: &'a [MetricSample], name: &str, location: &str) -> &'a MetricSample {
        samples
            .iter()
            .find(|s| s.name() == name && s.labels.get("location") == Some(location))
            .unwrap_or_else(|| panic!("no sample {} for location {}", name, location))
    }

    fn boston() -> Current {
        Current {
            temp: Some(284.07),
            feels_like: Some(282.84),
            pressure: Some(1019.0),
            humidity: Some(62.0),
            dew_point: Some(277.08),
            clouds: Some(0.0),
            uvi: Some(0.89),
            visibility: Some(10000.0),
            wind_speed: Some(6.0),
            wind_gust: None,
            wind_deg: Some(300.0),
        }
    }

    #[test]
    fn test_kelvin_and_celsius() {
        let snap = snapshot(vec![observation("boston", 42.36, -71.06, boston())]);
        let samples = OpenWeatherTranslator.translate(&snap);

        assert_eq!(13, samples.len());
        assert_eq!(284.07, find(&samples, TEMPERATURE.name, "boston").value);
        assert_eq!(284.07 - 273.15, find(&samples, TEMPERATURE_C.name, "boston").value);
        assert_eq!(282.84 - 273.15, find(&samples, FEELS_LIKE_C.name, "boston").value);
        assert_eq!(1019.0, find(&samples, PRESSURE.name, "boston").value);
        assert_eq!(6.0, find(&samples, WIND_SPEED.name, "boston").value);
    }

    #[test]
    fn test_absent_gust_nan() {
        let snap = snapshot(vec![observation("boston", 42.36, -71.06, boston())]);
        let samples = OpenWeatherTranslator.translate(&snap);

        assert!(find(&samples, WIND_GUST.name, "boston").value.is_nan());
    }

    #[test]
    fn test_labels_location_and_coordinates() {
        let snap = snapshot(vec![
            observation("boston", 42.36, -71.06, boston()),
            observation("null-island", 0.0, 0.0, Current::default()),
        ]);
        let samples = OpenWeatherTranslator.translate(&snap);

        assert_eq!(26, samples.len());
        assert_eq!(
            &Labels::new()
                .with("location", "boston")
                .with("lat", "42.36")
                .with("long", "-71.06"),
            &find(&samples, TEMPERATURE.name, "boston").labels
        );
        assert_eq!(
            Some("0"),
            find(&samples, TEMPERATURE.name, "null-island").labels.get("lat")
        );
        assert!(samples
            .iter()
            .filter(|s| s.labels.get("location") == Some("null-island"))
            .all(|s| s.value.is_nan()));
    }

    #[test]
    fn test_translate_idempotent() {
        let snap = snapshot(vec![observation("boston", 42.36, -71.06, boston())]);
        assert_eq!(
            OpenWeatherTranslator.translate(&snap),
            OpenWeatherTranslator.translate(&snap)
        );
    }
}
