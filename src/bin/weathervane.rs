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

use clap::{Parser, Subcommand};
use hyper::server::Server;
use hyper::service::{make_service_fn, service_fn};
use prometheus::Registry;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use std::{io, process};
use tokio::signal::unix::{self, SignalKind};
use tracing::{event, span, Instrument, Level};
use weathervane::config::{Config, ConfigError};
use weathervane::http::{http_route, RequestContext};
use weathervane::metrics::{ExporterMetrics, MetricSet, MetricsExposition};
use weathervane::retry::RetryGovernor;
use weathervane::scheduler::Scheduler;
use weathervane::state::LatestState;
use weathervane::translate::hue::HueTranslator;
use weathervane::translate::nest::NestTranslator;
use weathervane::translate::openweather::OpenWeatherTranslator;
use weathervane::upstream::hue::HueClient;
use weathervane::upstream::nest::NestClient;
use weathervane::upstream::openweather::OpenWeatherClient;

const DEFAULT_CONFIG: &str = "config.json";
const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const LOCALHOST: [u8; 4] = [127, 0, 0, 1];

/// Expose readings from smart home and weather APIs as Prometheus metrics
///
/// Poll a remote API on a fixed interval and expose the most recent readings as
/// Prometheus metrics. Readings are fetched in the background, not in response to
/// scrapes. Connection failures are retried until the API can be reached again,
/// other failures skip a single poll.
#[derive(Debug, Parser)]
#[clap(name = "weathervane", version = clap::crate_version!())]
struct WeathervaneApplication {
    /// Path to the JSON configuration file
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Address to bind to. By default, weathervane binds to a local address on a
    /// port that depends on the API being polled
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    #[command(subcommand)]
    integration: Integration,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Integration {
    /// Temperature, light level, and motion sensors of a Philips Hue bridge
    Hue,
    /// Nest thermostats
    Nest,
    /// Current weather at configured locations from OpenWeather
    Openweather,
}

impl Integration {
    fn default_bind(&self) -> SocketAddr {
        match self {
            Integration::Hue => (LOCALHOST, 9103).into(),
            Integration::Nest => (LOCALHOST, 9111).into(),
            Integration::Openweather => (LOCALHOST, 9102).into(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Integration::Hue => "hue",
            Integration::Nest => "nest",
            Integration::Openweather => "openweather",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = WeathervaneApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )?;

    let startup = Instant::now();
    let config = Config::load(&opts.config).unwrap_or_else(|e| config_failure(e));
    let exporter = config.exporter().unwrap_or_else(|e| config_failure(e));

    let registry = Registry::new();
    #[cfg(target_os = "linux")]
    registry
        .register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))
        .unwrap_or_else(|e| registry_failure(e));

    let metric_set = MetricSet::new();
    registry
        .register(Box::new(metric_set.clone()))
        .unwrap_or_else(|e| registry_failure(e));
    let exporter_metrics = ExporterMetrics::new(&registry).unwrap_or_else(|e| registry_failure(e));

    let latest = LatestState::new();
    let context = Arc::new(RequestContext::new(MetricsExposition::new(registry), latest.clone()));
    let service = make_service_fn(move |_| {
        let context = context.clone();

        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                http_route(req, context.clone()).instrument(span!(Level::DEBUG, "weathervane_request"))
            }))
        }
    });

    let bind = opts.bind.unwrap_or_else(|| opts.integration.default_bind());
    let server = Server::try_bind(&bind).unwrap_or_else(|e| {
        event!(
            Level::ERROR,
            message = "server failed to start",
            address = %bind,
            error = %e,
        );

        process::exit(1);
    });

    let governor = RetryGovernor::new(exporter.backoff);
    let scheduler = match opts.integration {
        Integration::Hue => {
            let settings = config.hue().unwrap_or_else(|e| config_failure(e));
            let client = HueClient::new(&settings, exporter.timeout).unwrap_or_else(|e| client_failure("hue", e));
            Scheduler::new(
                client,
                HueTranslator,
                governor,
                metric_set,
                latest,
                exporter_metrics,
                settings.interval,
            )
            .spawn()
        }
        Integration::Nest => {
            let settings = config.nest().unwrap_or_else(|e| config_failure(e));
            let client = NestClient::new(&settings, exporter.timeout).unwrap_or_else(|e| client_failure("nest", e));
            Scheduler::new(
                client,
                NestTranslator,
                governor,
                metric_set,
                latest,
                exporter_metrics,
                settings.interval,
            )
            .spawn()
        }
        Integration::Openweather => {
            let settings = config.openweather().unwrap_or_else(|e| config_failure(e));
            let client = OpenWeatherClient::new(&settings, exporter.timeout)
                .unwrap_or_else(|e| client_failure("openweather", e));
            Scheduler::new(
                client,
                OpenWeatherTranslator,
                governor,
                metric_set,
                latest,
                exporter_metrics,
                settings.interval,
            )
            .spawn()
        }
    };

    event!(
        Level::INFO,
        message = "server started",
        address = %bind,
        upstream = opts.integration.name(),
        backoff_secs = exporter.backoff.as_secs(),
        timeout_secs = exporter.timeout.as_secs(),
    );

    server
        .serve(service)
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    scheduler.abort();
    event!(
        Level::INFO,
        message = "server shutdown",
        runtime_secs = %startup.elapsed().as_secs(),
    );

    Ok(())
}

fn config_failure(e: ConfigError) -> ! {
    event!(
        Level::ERROR,
        message = "invalid configuration",
        error = %e,
    );

    process::exit(e.exit_code())
}

fn registry_failure(e: prometheus::Error) -> ! {
    event!(
        Level::ERROR,
        message = "failed to register metrics",
        error = %e,
    );

    process::exit(1)
}

fn client_failure(upstream: &'static str, e: reqwest::Error) -> ! {
    event!(
        Level::ERROR,
        message = "failed to initialize upstream client",
        upstream = upstream,
        error = %e,
    );

    process::exit(1)
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
