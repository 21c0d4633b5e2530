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

use crate::metrics::ExporterMetrics;
use crate::upstream::{FetchError, FetchErrorKind, UpstreamClient};
use std::fmt;
use std::time::Duration;
use tracing::{event, Level};

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(30);

/// What to do about a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Wait for the backoff and try the same fetch again.
    Retry,
    /// Give up and hand the error to the caller.
    Surface,
}

/// Retry connectivity failures, surface everything else. A remote API that
/// can't be reached may come back, one that rejects requests or sends garbage
/// won't start behaving differently because it was asked again.
pub fn retry_unreachable(e: &FetchError) -> Disposition {
    match e.kind() {
        FetchErrorKind::Unreachable => Disposition::Retry,
        FetchErrorKind::Rejected | FetchErrorKind::Malformed => Disposition::Surface,
    }
}

/// Retry policy applied to each fetch of a cycle.
///
/// Retries are unbounded: a fetch that keeps failing with a retryable error
/// keeps the cycle running until the upstream recovers.
#[derive(Clone, Copy)]
pub struct RetryGovernor {
    backoff: Duration,
    classify: fn(&FetchError) -> Disposition,
}

impl RetryGovernor {
    pub fn new(backoff: Duration) -> Self {
        Self::with_classifier(backoff, retry_unreachable)
    }

    pub fn with_classifier(backoff: Duration, classify: fn(&FetchError) -> Disposition) -> Self {
        RetryGovernor { backoff, classify }
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Fetch from the client until it succeeds or fails with an error that
    /// shouldn't be retried. Every failed attempt is counted by kind.
    pub async fn fetch<C>(&self, client: &C, metrics: &ExporterMetrics) -> Result<C::Snapshot, FetchError>
    where
        C: UpstreamClient + ?Sized,
    {
        loop {
            let e = match client.fetch().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => e,
            };

            metrics.record_error(e.kind());
            if (self.classify)(&e) == Disposition::Surface {
                return Err(e);
            }

            event!(
                Level::WARN,
                message = "upstream fetch failed, retrying after backoff",
                upstream = client.name(),
                kind = e.kind().as_label(),
                backoff_secs = self.backoff.as_secs_f64(),
                error = %e,
            );

            metrics.record_retry();
            tokio::time::sleep(self.backoff).await;
        }
    }
}

impl Default for RetryGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF)
    }
}

impl fmt::Debug for RetryGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryGovernor")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
