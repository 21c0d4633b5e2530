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

//! Periodic fetch, translate, and publish cycles.
//!
//! A [`Scheduler`] runs one cycle at a time for a single upstream. Cycles are
//! started on a fixed cadence that doesn't drift with the time each cycle
//! takes: the next start is one interval after the previous *scheduled* start.
//! A cycle that runs past the next start is followed immediately by another
//! one, but missed starts are never queued up behind it.

use crate::metrics::{ExporterMetrics, MetricSet};
use crate::retry::RetryGovernor;
use crate::state::LatestState;
use crate::translate::Translator;
use crate::upstream::{FetchErrorKind, UpstreamClient};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{event, span, Instrument, Level};

/// When the next cycle starts and how far apart cycles are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    next_fire: Instant,
    interval: Duration,
}

impl ScheduleState {
    pub fn new(first_fire: Instant, interval: Duration) -> Self {
        ScheduleState {
            next_fire: first_fire,
            interval,
        }
    }

    pub fn next_fire(&self) -> Instant {
        self.next_fire
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Move to the next start after a cycle completed at `now`. The next start is
    /// one interval after the previous one unless that's already in the past, in
    /// which case it's `now`.
    pub fn advance(&mut self, now: Instant) {
        let next = self.next_fire + self.interval;
        self.next_fire = if next < now { now } else { next };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the next start.
    Idle,
    /// A cycle is in progress, including any retries of its fetch.
    Running,
}

/// Result of a single cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The fetch succeeded and this many samples were published.
    Published(usize),
    /// The fetch failed with an error that isn't retried, nothing was published.
    Skipped(FetchErrorKind),
}

/// Drives fetch, translate, and publish cycles for one upstream client.
///
/// Only one cycle runs at a time. Changes of [`Phase`] can be followed from
/// other tasks with [`Scheduler::watch_phase`].
pub struct Scheduler<C, T> {
    client: C,
    translator: T,
    governor: RetryGovernor,
    metric_set: MetricSet,
    latest: LatestState,
    metrics: ExporterMetrics,
    state: ScheduleState,
    phase_tx: watch::Sender<Phase>,
    phase_rx: watch::Receiver<Phase>,
}

impl<C, T> Scheduler<C, T>
where
    C: UpstreamClient,
    T: Translator<Snapshot = C::Snapshot>,
{
    /// Create a new scheduler whose first cycle starts immediately.
    pub fn new(
        client: C,
        translator: T,
        governor: RetryGovernor,
        metric_set: MetricSet,
        latest: LatestState,
        metrics: ExporterMetrics,
        interval: Duration,
    ) -> Self {
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);

        Scheduler {
            client,
            translator,
            governor,
            metric_set,
            latest,
            metrics,
            state: ScheduleState::new(Instant::now(), interval),
            phase_tx,
            phase_rx,
        }
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        *self.phase_rx.borrow()
    }

    /// Receiver that sees each change of phase, usable after the scheduler has
    /// been moved to its own task.
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase_rx.clone()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Wait for the next scheduled start and run a single cycle.
    pub async fn tick(&mut self) -> CycleOutcome {
        tokio::time::sleep_until(self.state.next_fire()).await;

        self.set_phase(Phase::Running);
        let outcome = self
            .cycle()
            .instrument(span!(Level::DEBUG, "weathervane_cycle", upstream = self.client.name()))
            .await;
        self.set_phase(Phase::Idle);

        self.state.advance(Instant::now());
        outcome
    }

    /// Run cycles forever.
    pub async fn run(mut self) {
        loop {
            self.tick().await;
        }
    }

    fn set_phase(&self, phase: Phase) {
        event!(
            Level::DEBUG,
            message = "scheduler phase changed",
            upstream = self.client.name(),
            phase = ?phase,
        );

        // The scheduler holds a receiver itself so this can't fail
        let _ = self.phase_tx.send(phase);
    }

    async fn cycle(&self) -> CycleOutcome {
        let start = Instant::now();
        self.metrics.record_cycle();

        match self.governor.fetch(&self.client, &self.metrics).await {
            Ok(snapshot) => {
                let samples = self.translator.translate(&snapshot);
                let count = self.metric_set.publish(samples);
                self.metrics.record_publish();

                if let Err(e) = self.latest.update(&snapshot, SystemTime::now()) {
                    event!(
                        Level::WARN,
                        message = "unable to encode upstream state",
                        upstream = self.client.name(),
                        error = %e,
                    );
                }

                event!(
                    Level::DEBUG,
                    message = "published upstream samples",
                    upstream = self.client.name(),
                    num_samples = count,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                );

                CycleOutcome::Published(count)
            }
            Err(e) => {
                event!(
                    Level::ERROR,
                    message = "upstream fetch failed, skipping cycle",
                    upstream = self.client.name(),
                    kind = e.kind().as_label(),
                    error = %e,
                );

                CycleOutcome::Skipped(e.kind())
            }
        }
    }
}

impl<C, T> Scheduler<C, T>
where
    C: UpstreamClient + 'static,
    T: Translator<Snapshot = C::Snapshot> + 'static,
{
    /// Run cycles forever on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
