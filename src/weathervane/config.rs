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

//! Configuration file parsing and validation.
//!
//! The configuration is a single JSON file with one optional section per
//! integration. Sections are only validated when the integration they belong
//! to is selected, once at startup, producing the settings structs the rest of
//! the crate consumes.

use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{fs, io};

pub const DEFAULT_BACKOFF_SECS: u64 = 30;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HUE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_NEST_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_OPENWEATHER_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_NEST_API: &str = "https://developer-api.nest.com";
pub const DEFAULT_OPENWEATHER_API: &str = "https://api.openweathermap.org";

/// Error loading or validating the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, io::Error),
    Parse(serde_json::Error),
    MissingSection(&'static str),
    MissingField(&'static str),
    Invalid(&'static str, String),
}

impl ConfigError {
    /// Process exit code to use when this error prevents startup.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Io(_, _) | ConfigError::Parse(_) => 1,
            ConfigError::MissingSection(_) | ConfigError::MissingField(_) | ConfigError::Invalid(_, _) => 2,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "unable to read config {}: {}", path.display(), e),
            ConfigError::Parse(e) => write!(f, "unable to parse config: {}", e),
            ConfigError::MissingSection(section) => write!(f, "config is missing \"{}\" section", section),
            ConfigError::MissingField(field) => write!(f, "config is missing \"{}\"", field),
            ConfigError::Invalid(field, reason) => write!(f, "invalid value for \"{}\": {}", field, reason),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(_, ref e) => Some(e),
            ConfigError::Parse(ref e) => Some(e),
            _ => None,
        }
    }
}

/// Contents of the configuration file, as written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exporter: ExporterConfig,
    pub hue: Option<HueConfig>,
    pub nest: Option<NestConfig>,
    pub openweather: Option<OpenWeatherConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            backoff_secs: DEFAULT_BACKOFF_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HueConfig {
    #[serde(default)]
    pub ipaddress: String,
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_hue_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NestConfig {
    pub access_token: Option<AccessToken>,
    pub thermostat_id: Option<String>,
    #[serde(default = "default_nest_api")]
    pub api_url: String,
    #[serde(default = "default_nest_interval_secs")]
    pub interval_secs: u64,
}

/// Nest access token, either as a bare string or as the object returned by the
/// OAuth token exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AccessToken {
    Bare(String),
    Exchange { access_token: String },
}

impl AccessToken {
    pub fn value(&self) -> &str {
        match self {
            AccessToken::Bare(token) => token,
            AccessToken::Exchange { access_token } => access_token,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWeatherConfig {
    #[serde(default)]
    pub appid: String,
    #[serde(default)]
    pub locations: BTreeMap<String, LocationConfig>,
    #[serde(default = "default_openweather_api")]
    pub api_url: String,
    #[serde(default = "default_openweather_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LocationConfig {
    pub lat: f64,
    pub long: f64,
}

fn default_backoff_secs() -> u64 {
    DEFAULT_BACKOFF_SECS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_hue_interval_secs() -> u64 {
    DEFAULT_HUE_INTERVAL_SECS
}

fn default_nest_interval_secs() -> u64 {
    DEFAULT_NEST_INTERVAL_SECS
}

fn default_openweather_interval_secs() -> u64 {
    DEFAULT_OPENWEATHER_INTERVAL_SECS
}

fn default_nest_api() -> String {
    DEFAULT_NEST_API.to_owned()
}

fn default_openweather_api() -> String {
    DEFAULT_OPENWEATHER_API.to_owned()
}

/// Validated settings that apply regardless of integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExporterSettings {
    pub backoff: Duration,
    pub timeout: Duration,
}

/// Validated settings for polling a Hue bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HueSettings {
    pub base_url: Url,
    pub username: String,
    pub interval: Duration,
}

/// Validated settings for polling the Nest API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestSettings {
    pub api_url: Url,
    pub access_token: String,
    pub thermostat_id: Option<String>,
    pub interval: Duration,
}

/// Validated settings for polling the OpenWeather One Call API.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenWeatherSettings {
    pub api_url: Url,
    pub appid: String,
    pub locations: BTreeMap<String, LocationConfig>,
    pub interval: Duration,
}

impl Config {
    /// Read and parse the configuration file at `path`. No validation of individual
    /// integration sections is done here.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        contents.parse()
    }

    pub fn exporter(&self) -> Result<ExporterSettings, ConfigError> {
        Ok(ExporterSettings {
            backoff: seconds("exporter.backoff_secs", self.exporter.backoff_secs)?,
            timeout: seconds("exporter.timeout_secs", self.exporter.timeout_secs)?,
        })
    }

    pub fn hue(&self) -> Result<HueSettings, ConfigError> {
        let hue = self.hue.as_ref().ok_or(ConfigError::MissingSection("hue"))?;
        let ipaddress = required("hue.ipaddress", &hue.ipaddress)?;
        let username = required("hue.username", &hue.username)?;

        Ok(HueSettings {
            base_url: http_url("hue.ipaddress", &format!("http://{}", ipaddress))?,
            username: username.to_owned(),
            interval: seconds("hue.interval_secs", hue.interval_secs)?,
        })
    }

    pub fn nest(&self) -> Result<NestSettings, ConfigError> {
        let nest = self.nest.as_ref().ok_or(ConfigError::MissingSection("nest"))?;
        let token = nest
            .access_token
            .as_ref()
            .ok_or(ConfigError::MissingField("nest.access_token"))?;
        let access_token = required("nest.access_token", token.value())?;
        let thermostat_id = match nest.thermostat_id.as_deref().map(str::trim) {
            Some("") => return Err(ConfigError::MissingField("nest.thermostat_id")),
            other => other.map(str::to_owned),
        };

        Ok(NestSettings {
            api_url: http_url("nest.api_url", &nest.api_url)?,
            access_token: access_token.to_owned(),
            thermostat_id,
            interval: seconds("nest.interval_secs", nest.interval_secs)?,
        })
    }

    pub fn openweather(&self) -> Result<OpenWeatherSettings, ConfigError> {
        let owm = self
            .openweather
            .as_ref()
            .ok_or(ConfigError::MissingSection("openweather"))?;
        let appid = required("openweather.appid", &owm.appid)?;
        if owm.locations.is_empty() {
            return Err(ConfigError::MissingField("openweather.locations"));
        }

        for loc in owm.locations.values() {
            if !(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=180.0).contains(&loc.long) {
                return Err(ConfigError::Invalid(
                    "openweather.locations",
                    format!("coordinates out of range: {}, {}", loc.lat, loc.long),
                ));
            }
        }

        Ok(OpenWeatherSettings {
            api_url: http_url("openweather.api_url", &owm.api_url)?,
            appid: appid.to_owned(),
            locations: owm.locations.clone(),
            interval: seconds("openweather.interval_secs", owm.interval_secs)?,
        })
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(ConfigError::Parse)
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ConfigError::MissingField(field))
    } else {
        Ok(value)
    }
}

fn seconds(field: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        Err(ConfigError::Invalid(field, "must be greater than zero".to_owned()))
    } else {
        Ok(Duration::from_secs(secs))
    }
}

fn http_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid(field, e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(ConfigError::Invalid(field, format!("not an HTTP URL: {}", raw))),
    }
}

#[cfg(test)]
mod test {
    use super::{Config, ConfigError, LocationConfig};
    use std::io::Write;
    use std::time::Duration;

    const FULL: &str = r#"{
        "exporter": {"backoff_secs": 5},
        "hue": {"ipaddress": "192.168.1.20", "username": "abc123"},
        "nest": {"access_token": {"access_token": "c.token", "expires_in": 315360000}},
        "openweather": {
            "appid": "key",
            "interval_secs": 600,
            "locations": {"boston": {"lat": 42.36, "long": -71.06}}
        }
    }"#;

    #[test]
    fn test_exporter_defaults() {
        let cfg: Config = "{}".parse().unwrap();
        let settings = cfg.exporter().unwrap();

        assert_eq!(Duration::from_secs(30), settings.backoff);
        assert_eq!(Duration::from_secs(10), settings.timeout);
    }

    #[test]
    fn test_full_config() {
        let cfg: Config = FULL.parse().unwrap();

        let exporter = cfg.exporter().unwrap();
        assert_eq!(Duration::from_secs(5), exporter.backoff);

        let hue = cfg.hue().unwrap();
        assert_eq!("http://192.168.1.20/", hue.base_url.as_str());
        assert_eq!("abc123", hue.username);
        assert_eq!(Duration::from_secs(60), hue.interval);

        let nest = cfg.nest().unwrap();
        assert_eq!("c.token", nest.access_token);
        assert_eq!("https://developer-api.nest.com/", nest.api_url.as_str());
        assert_eq!(None, nest.thermostat_id);

        let owm = cfg.openweather().unwrap();
        assert_eq!(Duration::from_secs(600), owm.interval);
        assert_eq!(
            Some(&LocationConfig { lat: 42.36, long: -71.06 }),
            owm.locations.get("boston")
        );
    }

    #[test]
    fn test_bare_access_token() {
        let cfg: Config = r#"{"nest": {"access_token": "c.bare", "thermostat_id": "abc"}}"#.parse().unwrap();
        let nest = cfg.nest().unwrap();

        assert_eq!("c.bare", nest.access_token);
        assert_eq!(Some("abc".to_owned()), nest.thermostat_id);
    }

    #[test]
    fn test_missing_section() {
        let cfg: Config = "{}".parse().unwrap();
        let err = cfg.hue().unwrap_err();

        assert!(matches!(err, ConfigError::MissingSection("hue")));
        assert_eq!(2, err.exit_code());
    }

    #[test]
    fn test_missing_field() {
        let cfg: Config = r#"{"hue": {"ipaddress": "10.0.0.2", "username": "  "}}"#.parse().unwrap();
        assert!(matches!(cfg.hue().unwrap_err(), ConfigError::MissingField("hue.username")));

        let cfg: Config = r#"{"nest": {}}"#.parse().unwrap();
        assert!(matches!(cfg.nest().unwrap_err(), ConfigError::MissingField("nest.access_token")));

        let cfg: Config = r#"{"openweather": {"appid": "key"}}"#.parse().unwrap();
        assert!(matches!(
            cfg.openweather().unwrap_err(),
            ConfigError::MissingField("openweather.locations")
        ));
    }

    #[test]
    fn test_invalid_values() {
        let cfg: Config = r#"{"hue": {"ipaddress": "10.0.0.2", "username": "u", "interval_secs": 0}}"#
            .parse()
            .unwrap();
        assert!(matches!(cfg.hue().unwrap_err(), ConfigError::Invalid("hue.interval_secs", _)));

        let cfg: Config = r#"{"nest": {"access_token": "t", "api_url": "ftp://example.com"}}"#.parse().unwrap();
        assert!(matches!(cfg.nest().unwrap_err(), ConfigError::Invalid("nest.api_url", _)));

        let cfg: Config = r#"{"openweather": {"appid": "k", "locations": {"x": {"lat": 91.0, "long": 0.0}}}}"#
            .parse()
            .unwrap();
        assert!(matches!(
            cfg.openweather().unwrap_err(),
            ConfigError::Invalid("openweather.locations", _)
        ));
    }

    #[test]
    fn test_parse_error() {
        let err = "{not json".parse::<Config>().unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
        assert_eq!(1, err.exit_code());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert!(cfg.hue.is_some());
        assert!(cfg.nest.is_some());
        assert!(cfg.openweather.is_some());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("config.json")).unwrap_err();

        assert!(matches!(err, ConfigError::Io(_, _)));
        assert_eq!(1, err.exit_code());
    }
}
