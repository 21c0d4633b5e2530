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

use crate::config::{LocationConfig, OpenWeatherSettings};
use crate::upstream::{check_status, decode_json, endpoint, http_client, FetchError, UpstreamClient};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};
use tracing::{event, span, Instrument, Level};

/// Response of the One Call API for a single location.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OneCall {
    pub lat: f64,
    pub lon: f64,
    pub current: Current,
}

/// Current weather conditions. Temperatures are in kelvin.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Current {
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    /// Atmospheric pressure, hPa.
    pub pressure: Option<f64>,
    /// Relative humidity, percent.
    pub humidity: Option<f64>,
    pub dew_point: Option<f64>,
    /// Cloud cover, percent.
    pub clouds: Option<f64>,
    pub uvi: Option<f64>,
    /// Visibility, meters.
    pub visibility: Option<f64>,
    /// Meters per second.
    pub wind_speed: Option<f64>,
    /// Meters per second. Only present when there are gusts.
    pub wind_gust: Option<f64>,
    pub wind_deg: Option<f64>,
}

/// Current weather for one of the configured locations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub location: String,
    pub onecall: OneCall,
}

/// Current weather for every configured location, ordered by location name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    pub observations: Vec<Observation>,
    #[serde(skip)]
    pub fetched_at: SystemTime,
}

/// Client for the OpenWeather One Call API.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    http: Client,
    onecall_url: Url,
    appid: String,
    locations: BTreeMap<String, LocationConfig>,
}

impl OpenWeatherClient {
    pub fn new(settings: &OpenWeatherSettings, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout, Policy::limited(5))?,
            onecall_url: endpoint(&settings.api_url, ["data", "2.5", "onecall"]),
            appid: settings.appid.clone(),
            locations: settings.locations.clone(),
        })
    }

    async fn onecall(&self, name: &str, location: &LocationConfig) -> Result<Observation, FetchError> {
        event!(
            Level::DEBUG,
            message = "fetching weather for location",
            location = name,
            lat = location.lat,
            long = location.long,
        );

        let res = self
            .http
            .get(self.onecall_url.clone())
            .query(&[
                ("lat", location.lat.to_string()),
                ("lon", location.long.to_string()),
                ("appid", self.appid.clone()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest("unable to fetch openweather onecall", e))?;

        let onecall = decode_json(check_status(res)?).await?;
        Ok(Observation {
            location: name.to_owned(),
            onecall,
        })
    }
}

#[async_trait]
impl UpstreamClient for OpenWeatherClient {
    type Snapshot = WeatherSnapshot;

    fn name(&self) -> &'static str {
        "openweather"
    }

    async fn fetch(&self) -> Result<WeatherSnapshot, FetchError> {
        let observations = try_join_all(
            self.locations
                .iter()
                .map(|(name, loc)| self.onecall(name, loc).instrument(span!(Level::DEBUG, "openweather_onecall"))),
        )
        .await?;

        Ok(WeatherSnapshot {
            observations,
            fetched_at: SystemTime::now(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::OpenWeatherClient;
    use crate::config::{LocationConfig, OpenWeatherSettings};
    use crate::upstream::{FetchErrorKind, UpstreamClient};
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use reqwest::Url;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const BOSTON: &str = r#"{
        "lat": 42.36,
        "lon": -71.06,
        "timezone": "America/New_York",
        "current": {
            "dt": 1618317040,
            "temp": 284.07,
            "feels_like": 282.84,
            "pressure": 1019,
            "humidity": 62,
            "dew_point": 277.08,
            "uvi": 0.89,
            "clouds": 0,
            "visibility": 10000,
            "wind_speed": 6,
            "wind_deg": 300,
            "weather": [{"id": 500, "main": "Rain"}]
        }
    }"#;

    fn settings(server: &MockServer, locations: &[(&str, f64, f64)]) -> OpenWeatherSettings {
        OpenWeatherSettings {
            api_url: Url::parse(&server.base_url()).unwrap(),
            appid: "key".to_owned(),
            locations: locations
                .iter()
                .map(|(name, lat, long)| (name.to_string(), LocationConfig { lat: *lat, long: *long }))
                .collect::<BTreeMap<_, _>>(),
            interval: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_fetch_locations() {
        let server = MockServer::start_async().await;
        let boston = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/data/2.5/onecall")
                    .query_param("lat", "42.36")
                    .query_param("lon", "-71.06")
                    .query_param("appid", "key");
                then.status(200).body(BOSTON);
            })
            .await;
        let nowhere = server
            .mock_async(|when, then| {
                when.method(GET).path("/data/2.5/onecall").query_param("lat", "0");
                then.status(200).body(r#"{"lat": 0, "lon": 0, "current": {"temp": 300.0}}"#);
            })
            .await;

        let settings = settings(&server, &[("boston", 42.36, -71.06), ("null-island", 0.0, 0.0)]);
        let client = OpenWeatherClient::new(&settings, Duration::from_secs(5)).unwrap();
        let snapshot = client.fetch().await.unwrap();

        boston.assert_async().await;
        nowhere.assert_async().await;
        assert_eq!(2, snapshot.observations.len());

        let first = &snapshot.observations[0];
        assert_eq!("boston", first.location);
        assert_eq!(42.36, first.onecall.lat);
        assert_eq!(Some(284.07), first.onecall.current.temp);
        assert_eq!(Some(1019.0), first.onecall.current.pressure);
        assert_eq!(None, first.onecall.current.wind_gust);

        let second = &snapshot.observations[1];
        assert_eq!("null-island", second.location);
        assert_eq!(None, second.onecall.current.humidity);
    }

    #[tokio::test]
    async fn test_fetch_fails_if_any_location_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/data/2.5/onecall").query_param("lat", "42.36");
                then.status(200).body(BOSTON);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/data/2.5/onecall").query_param("lat", "0");
                then.status(401).body(r#"{"cod": 401, "message": "Invalid API key"}"#);
            })
            .await;

        let settings = settings(&server, &[("boston", 42.36, -71.06), ("null-island", 0.0, 0.0)]);
        let client = OpenWeatherClient::new(&settings, Duration::from_secs(5)).unwrap();
        let err = client.fetch().await.unwrap_err();

        assert_eq!(FetchErrorKind::Rejected, err.kind());
    }

    #[tokio::test]
    async fn test_fetch_missing_coordinates() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/data/2.5/onecall");
                then.status(200).body(r#"{"current": {"temp": 300.0}}"#);
            })
            .await;

        let settings = settings(&server, &[("boston", 42.36, -71.06)]);
        let client = OpenWeatherClient::new(&settings, Duration::from_secs(5)).unwrap();
        let err = client.fetch().await.unwrap_err();

        assert_eq!(FetchErrorKind::Malformed, err.kind());
    }
}
