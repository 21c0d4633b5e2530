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

//! Export smart home and weather API readings as Prometheus metrics.
//!
//! ## Features
//!
//! Weathervane polls a remote API on a fixed interval and exposes the most recent
//! readings as Prometheus metrics. One of the following APIs is polled per process:
//!
//! * `hue` - Temperature, light level, and motion sensors attached to a Philips Hue bridge.
//! * `nest` - Nest thermostats via the Nest developer API.
//! * `openweather` - Current weather at one or more locations via the OpenWeather One Call API.
//!
//! Readings are fetched in the background, *not* in response to Prometheus scrapes. Scrapes
//! are always answered with the readings from the most recent successful fetch. When a device
//! reports that it is unreachable or offline, its metrics are still exported but with a value
//! of `NaN`.
//!
//! The state returned by the most recent successful fetch is available as JSON at `/state`.
//! Both `/metrics` and `/state` include `Last-Modified` and `ETag` headers based on the time
//! readings were last published.
//!
//! If the remote API can't be reached, the fetch is retried every `30s` until it succeeds.
//! If the remote API rejects the request or returns something that can't be parsed, the
//! failure is logged and the next fetch happens at the usual time.
//!
//! The following metrics about weathervane itself are exported:
//!
//! * `weathervane_collections_total` - Total number of attempts to poll the remote API.
//! * `weathervane_errors_total` - Total errors by type (`unreachable`, `rejected`, `malformed`)
//!   while polling the remote API.
//! * `weathervane_retries_total` - Total number of fetches retried after a connection failure.
//! * `weathervane_last_update_timestamp` - UNIX timestamp of the last time readings were published.
//!
//! ## Build
//!
//! `weathervane` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Configure
//!
//! Weathervane reads a JSON configuration file, `config.json` by default. Only the section
//! for the API being polled is required.
//!
//! ```json
//! {
//!   "exporter": {"backoff_secs": 30, "timeout_secs": 10},
//!   "hue": {"ipaddress": "192.168.1.2", "username": "abcdef0123456789"},
//!   "nest": {"access_token": "c.abc123", "thermostat_id": "peyiJNo0IldT2YlIVtYaGQ"},
//!   "openweather": {
//!     "appid": "0123456789abcdef",
//!     "interval_secs": 300,
//!     "locations": {"boston": {"lat": 42.36, "long": -71.06}}
//!   }
//! }
//! ```
//!
//! ## Run
//!
//! ```text
//! ./target/release/weathervane --config config.json hue
//! ```
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed at `/metrics` on port `9103` (`hue`), `9111` (`nest`), or
//! `9102` (`openweather`). Once `weathervane` is running, configure scrapes of it by your
//! Prometheus server.
//!
//! ```yaml
//! # Sample config for Prometheus.
//!
//! global:
//!   scrape_interval:     1m
//!   evaluation_interval: 1m
//!   external_labels:
//!       monitor: 'my_prom'
//!
//! scrape_configs:
//!   - job_name: weathervane
//!     static_configs:
//!       - targets: ['example:9103']
//! ```
//!

pub mod config;
pub mod http;
pub mod metrics;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod translate;
pub mod upstream;
