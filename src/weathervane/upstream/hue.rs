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

use crate::config::HueSettings;
use crate::upstream::{check_status, decode_json, endpoint, http_client, FetchError, FetchErrorKind, UpstreamClient};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::time::{Duration, SystemTime};
use tracing::{event, Level};

pub const TEMPERATURE_SENSOR: &str = "ZLLTemperature";
pub const LIGHT_LEVEL_SENSOR: &str = "ZLLLightLevel";
pub const PRESENCE_SENSOR: &str = "ZLLPresence";

/// A sensor attached to a Hue bridge, as returned by the `/sensors` endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Sensor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    pub uniqueid: Option<String>,
    #[serde(default)]
    pub state: SensorState,
    #[serde(default)]
    pub config: SensorConfig,
}

impl Sensor {
    /// Sensors that don't report reachability are assumed to be reachable.
    pub fn is_reachable(&self) -> bool {
        self.config.reachable.unwrap_or(true)
    }
}

/// Readings of a sensor. Which fields are present depends on the type of sensor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SensorState {
    /// Degrees celsius, fixed point with a scaling factor of 100.
    pub temperature: Option<i64>,
    /// Illuminance on a logarithmic scale, `10000 * log10(lux) + 1`.
    pub lightlevel: Option<i64>,
    pub dark: Option<bool>,
    pub daylight: Option<bool>,
    pub presence: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SensorConfig {
    pub on: Option<bool>,
    pub reachable: Option<bool>,
    /// Battery level, percent.
    pub battery: Option<f64>,
}

/// Every sensor known to the bridge at the time of a fetch, keyed by sensor ID.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HueSnapshot {
    pub sensors: BTreeMap<String, Sensor>,
    #[serde(skip)]
    pub fetched_at: SystemTime,
}

/// The bridge answers requests it doesn't accept (e.g. an unknown username) with
/// a successful status and a list of errors.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SensorsResponse {
    Sensors(BTreeMap<String, Sensor>),
    Errors(Vec<ErrorEntry>),
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    error: ApiError,
}

/// Error reported by the Hue bridge API itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub code: i64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (type {}, address {})", self.description, self.code, self.address)
    }
}

impl Error for ApiError {}

/// Client for the sensors of a single Hue bridge.
#[derive(Debug, Clone)]
pub struct HueClient {
    http: Client,
    sensors_url: Url,
}

impl HueClient {
    pub fn new(settings: &HueSettings, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout, Policy::none())?,
            sensors_url: endpoint(&settings.base_url, ["api", settings.username.as_str(), "sensors"]),
        })
    }
}

#[async_trait]
impl UpstreamClient for HueClient {
    type Snapshot = HueSnapshot;

    fn name(&self) -> &'static str {
        "hue"
    }

    async fn fetch(&self) -> Result<HueSnapshot, FetchError> {
        let res = self
            .http
            .get(self.sensors_url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest("unable to fetch hue sensors", e))?;

        let sensors = match decode_json(check_status(res)?).await? {
            SensorsResponse::Sensors(sensors) => sensors,
            SensorsResponse::Errors(mut errors) => {
                return Err(match errors.pop() {
                    Some(entry) => FetchError::KindMsgCause(
                        FetchErrorKind::Rejected,
                        "hue bridge rejected request",
                        Box::new(entry.error),
                    ),
                    None => FetchError::KindMsg(FetchErrorKind::Malformed, "empty hue bridge response"),
                });
            }
        };

        event!(
            Level::DEBUG,
            message = "fetched hue sensors",
            num_sensors = sensors.len(),
        );

        Ok(HueSnapshot {
            sensors,
            fetched_at: SystemTime::now(),
        })
    }
}
