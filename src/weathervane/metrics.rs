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

use crate::upstream::FetchErrorKind;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{event, Level};

/// Name and help text of a metric derived from upstream readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricDesc {
    pub name: &'static str,
    pub help: &'static str,
}

impl MetricDesc {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        MetricDesc { name, help }
    }
}

/// Label names and values identifying one series of a metric. Order of
/// insertion doesn't matter, labels are always kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One observed value of a metric series.
///
/// `NaN` is a meaningful value here: the series exists but its last known state
/// is unreachable or undefined.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub desc: MetricDesc,
    pub labels: Labels,
    pub value: f64,
    pub timestamp: SystemTime,
}

impl MetricSample {
    pub fn new(desc: MetricDesc, labels: Labels, value: f64, timestamp: SystemTime) -> Self {
        MetricSample {
            desc,
            labels,
            value,
            timestamp,
        }
    }

    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    fn key(&self) -> SeriesKey {
        SeriesKey {
            name: self.desc.name,
            labels: self.labels.clone(),
        }
    }
}

// Values compare bitwise so NaN samples compare equal to themselves.
impl PartialEq for MetricSample {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc
            && self.labels == other.labels
            && self.value.to_bits() == other.value.to_bits()
            && self.timestamp == other.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    name: &'static str,
    labels: Labels,
}

type Series = BTreeMap<SeriesKey, MetricSample>;

/// Immutable view of every series in a [`MetricSet`] as of the most recent publish.
#[derive(Debug, Clone, Default)]
pub struct MetricSetView {
    series: Arc<Series>,
}

impl MetricSetView {
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Samples ordered by metric name and then labels.
    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> {
        self.series.values()
    }

    pub fn get(&self, name: &'static str, labels: &Labels) -> Option<&MetricSample> {
        self.series.get(&SeriesKey {
            name,
            labels: labels.clone(),
        })
    }

    /// Convert each sample into a Prometheus gauge, grouped into one family per metric name.
    fn to_families(&self) -> Vec<MetricFamily> {
        let mut families: Vec<MetricFamily> = Vec::new();

        for sample in self.iter() {
            // Samples are sorted by name so a family is complete once the name changes.
            let start_family = families.last().map(|f| f.get_name() != sample.name()).unwrap_or(true);
            if start_family {
                let mut family = MetricFamily::default();
                family.set_name(sample.desc.name.to_owned());
                family.set_help(sample.desc.help.to_owned());
                family.set_field_type(MetricType::GAUGE);
                families.push(family);
            }

            let mut gauge = proto::Gauge::default();
            gauge.set_value(sample.value);

            let mut metric = Metric::default();
            metric.set_gauge(gauge);
            for (name, value) in sample.labels.iter() {
                let mut pair = LabelPair::default();
                pair.set_name(name.to_owned());
                pair.set_value(value.to_owned());
                metric.mut_label().push(pair);
            }

            if let Some(family) = families.last_mut() {
                family.mut_metric().push(metric);
            }
        }

        families
    }
}

/// The most recent value of every series derived from upstream readings.
///
/// Cloning a `MetricSet` produces another handle to the same underlying set. A
/// publish replaces the visible contents as a whole: readers see every sample
/// from a publish or none of them. Series are never removed once published.
#[derive(Debug, Clone, Default)]
pub struct MetricSet {
    current: Arc<RwLock<Arc<Series>>>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically overwrite the series for each of the given samples, returning
    /// the number of samples published.
    pub fn publish(&self, samples: Vec<MetricSample>) -> usize {
        let count = samples.len();
        let mut guard = self.write();
        // Clones the map only when a reader is still holding the previous view.
        let series = Arc::make_mut(&mut *guard);
        for sample in samples {
            series.insert(sample.key(), sample);
        }

        count
    }

    /// Current contents of the set. The view is unaffected by later publishes.
    pub fn view(&self) -> MetricSetView {
        MetricSetView {
            series: Arc::clone(&*self.read()),
        }
    }

    // Nothing panics while holding the write lock, a poisoned lock still guards a usable map.
    fn read(&self) -> RwLockReadGuard<'_, Arc<Series>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<Series>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Series in the set are only known at runtime so no descriptors are declared
/// up front. A registry accepts a single collector like this.
impl Collector for MetricSet {
    fn desc(&self) -> Vec<&Desc> {
        Vec::new()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.view().to_families()
    }
}

/// Metrics about the exporter itself: how many cycles it has run and how
/// fetching from the upstream API has been failing.
#[derive(Clone)]
pub struct ExporterMetrics {
    collections: IntCounter,
    errors: IntCounterVec,
    retries: IntCounter,
    last_update: Gauge,
}

impl ExporterMetrics {
    pub fn new(reg: &Registry) -> Result<Self, prometheus::Error> {
        let collections = IntCounter::new("weathervane_collections_total", "Number of attempted collection cycles")?;
        let errors = IntCounterVec::new(
            Opts::new("weathervane_errors_total", "Number of failed upstream fetches by type"),
            &["kind"],
        )?;
        let retries = IntCounter::new(
            "weathervane_retries_total",
            "Number of upstream fetches retried after a connection failure",
        )?;
        let last_update = Gauge::new(
            "weathervane_last_update_timestamp",
            "Timestamp of last successful publish of upstream readings",
        )?;

        // Make each kind of error visible as zero before it happens.
        for kind in FetchErrorKind::ALL {
            errors.with_label_values(&[kind.as_label()]);
        }

        reg.register(Box::new(collections.clone()))?;
        reg.register(Box::new(errors.clone()))?;
        reg.register(Box::new(retries.clone()))?;
        reg.register(Box::new(last_update.clone()))?;

        Ok(Self {
            collections,
            errors,
            retries,
            last_update,
        })
    }

    pub fn record_cycle(&self) {
        self.collections.inc();
    }

    pub fn record_error(&self, kind: FetchErrorKind) {
        self.errors.with_label_values(&[kind.as_label()]).inc();
    }

    pub fn record_retry(&self) {
        self.retries.inc();
    }

    pub fn record_publish(&self) {
        // If we can't get the number of seconds since the epoch, skip the update
        let _ = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| self.last_update.set(d.as_secs_f64()));
    }

    pub fn collections_total(&self) -> u64 {
        self.collections.get()
    }

    pub fn errors_total(&self, kind: FetchErrorKind) -> u64 {
        self.errors.with_label_values(&[kind.as_label()]).get()
    }

    pub fn retries_total(&self) -> u64 {
        self.retries.get()
    }
}

/// Error exposing Prometheus metrics in the text exposition format.
#[derive(Debug)]
pub enum ExpositionError {
    Encoding(&'static str, Box<dyn Error + Send + Sync + 'static>),
}

impl fmt::Display for ExpositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpositionError::Encoding(msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for ExpositionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExpositionError::Encoding(_, ref e) => Some(e.as_ref()),
        }
    }
}

/// Wrapper that exposes metrics from a Prometheus registry in the text exposition format.
///
/// Gathering never waits on an upstream API: the registry only holds the
/// exporter's own metrics and the already published [`MetricSet`].
#[derive(Debug, Clone)]
pub struct MetricsExposition {
    registry: Registry,
}

impl MetricsExposition {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Collect all metrics from the registry and encode them in the Prometheus text exposition
    /// format, returning an error if metrics couldn't be encoded for some reason.
    pub fn encoded_text(&self) -> Result<Vec<u8>, ExpositionError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        event!(
            Level::DEBUG,
            message = "encoding metric families to text exposition format",
            num_metrics = metric_families.len(),
        );

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ExpositionError::Encoding("unable to encode Prometheus metrics", Box::new(e)))
            .map(|_| buffer)
    }
}
