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

use crate::config::NestSettings;
use crate::upstream::{check_status, decode_json, endpoint, http_client, FetchError, FetchErrorKind, UpstreamClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};
use tracing::{event, Level};

/// Maximum number of requests made while following redirects for a single fetch.
pub const MAX_REDIRECTS: usize = 10;

/// What the HVAC system is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacState {
    Heating,
    Cooling,
    Off,
    #[serde(other)]
    Unknown,
}

/// What the thermostat has been set to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HvacMode {
    Heat,
    Cool,
    HeatCool,
    Eco,
    Off,
    #[serde(other)]
    Unknown,
}

/// State of a single thermostat as reported by the Nest API.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Thermostat {
    pub device_id: String,
    pub name: Option<String>,
    pub is_online: Option<bool>,
    pub last_connection: Option<DateTime<Utc>>,
    pub ambient_temperature_c: Option<f64>,
    pub ambient_temperature_f: Option<f64>,
    pub humidity: Option<f64>,
    pub hvac_state: Option<HvacState>,
    pub hvac_mode: Option<HvacMode>,
    pub target_temperature_c: Option<f64>,
    pub target_temperature_f: Option<f64>,
    pub target_temperature_high_c: Option<f64>,
    pub target_temperature_high_f: Option<f64>,
    pub target_temperature_low_c: Option<f64>,
    pub target_temperature_low_f: Option<f64>,
    /// Estimated minutes to reach the target temperature, as a string like `~15`, `<5`, or `>120`.
    pub time_to_target: Option<String>,
}

impl Thermostat {
    /// Thermostats that don't report their connection status are assumed to be online.
    pub fn is_online(&self) -> bool {
        self.is_online.unwrap_or(true)
    }
}

/// Thermostats returned by a single fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestSnapshot {
    pub thermostats: Vec<Thermostat>,
    #[serde(skip)]
    pub fetched_at: SystemTime,
}

/// Client for the Nest thermostat API.
///
/// The API redirects clients to a different host. The bearer token has to be sent
/// to that host as well so redirects are followed here rather than by the HTTP
/// client, which drops authorization headers when the host changes.
#[derive(Debug, Clone)]
pub struct NestClient {
    http: Client,
    url: Url,
    access_token: String,
    single: bool,
}

impl NestClient {
    pub fn new(settings: &NestSettings, timeout: Duration) -> Result<Self, reqwest::Error> {
        let url = match &settings.thermostat_id {
            Some(id) => endpoint(&settings.api_url, ["devices", "thermostats", id.as_str()]),
            None => endpoint(&settings.api_url, ["devices", "thermostats"]),
        };

        Ok(Self {
            http: http_client(timeout, Policy::none())?,
            url,
            access_token: settings.access_token.clone(),
            single: settings.thermostat_id.is_some(),
        })
    }

    /// GET the configured URL, following up to `MAX_REDIRECTS` redirects with
    /// authentication intact.
    async fn get(&self) -> Result<Response, FetchError> {
        let mut url = self.url.clone();

        for _ in 0..MAX_REDIRECTS {
            let res = self
                .http
                .get(url.clone())
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest("unable to fetch nest thermostats", e))?;

            if !res.status().is_redirection() {
                return check_status(res);
            }

            let location = res
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(FetchError::KindMsg(
                    FetchErrorKind::Malformed,
                    "nest redirect without a location",
                ))?;

            url = url.join(location).map_err(|e| {
                FetchError::KindMsgCause(FetchErrorKind::Malformed, "invalid nest redirect location", Box::new(e))
            })?;

            event!(
                Level::DEBUG,
                message = "following nest redirect",
                status = res.status().as_u16(),
                location = %url,
            );
        }

        Err(FetchError::KindMsg(FetchErrorKind::Malformed, "too many nest redirects"))
    }
}

#[async_trait]
impl UpstreamClient for NestClient {
    type Snapshot = NestSnapshot;

    fn name(&self) -> &'static str {
        "nest"
    }

    async fn fetch(&self) -> Result<NestSnapshot, FetchError> {
        let res = self.get().await?;
        let thermostats = if self.single {
            vec![decode_json::<Thermostat>(res).await?]
        } else {
            decode_json::<BTreeMap<String, Thermostat>>(res)
                .await?
                .into_values()
                .collect()
        };

        event!(
            Level::DEBUG,
            message = "fetched nest thermostats",
            num_thermostats = thermostats.len(),
        );

        Ok(NestSnapshot {
            thermostats,
            fetched_at: SystemTime::now(),
        })
    }
}
