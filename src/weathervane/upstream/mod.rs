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

//! Clients for the remote APIs that weathervane polls.
//!
//! Each integration implements [`UpstreamClient`]: one call to `fetch` makes one
//! logical request against the remote API and returns an immutable snapshot or a
//! typed [`FetchError`]. Clients never retry, that policy lives in
//! [`crate::retry::RetryGovernor`].

pub mod hue;
pub mod nest;
pub mod openweather;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::time::Duration;

const USER_AGENT: &str = concat!("weathervane/", env!("CARGO_PKG_VERSION"));

/// A remote API that can be asked for its current state.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// State returned by a single successful fetch.
    type Snapshot: Serialize + Send + 'static;

    /// Short name of the integration, used for logging.
    fn name(&self) -> &'static str;

    /// Make one logical request for the current state of the upstream API.
    async fn fetch(&self) -> Result<Self::Snapshot, FetchError>;
}

/// Broad categories of failures fetching from an upstream API.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum FetchErrorKind {
    /// The API could not be reached: connection refused, DNS, timeouts.
    Unreachable,
    /// The API answered but refused the request: non-2xx status or bad credentials.
    Rejected,
    /// The API answered with something that isn't the expected shape.
    Malformed,
}

impl FetchErrorKind {
    pub const ALL: [FetchErrorKind; 3] = [
        FetchErrorKind::Unreachable,
        FetchErrorKind::Rejected,
        FetchErrorKind::Malformed,
    ];

    pub fn as_label(&self) -> &'static str {
        match self {
            FetchErrorKind::Unreachable => "unreachable",
            FetchErrorKind::Rejected => "rejected",
            FetchErrorKind::Malformed => "malformed",
        }
    }
}

/// Error fetching the current state of an upstream API
#[derive(Debug)]
pub enum FetchError {
    Status(u16),
    KindMsg(FetchErrorKind, &'static str),
    KindMsgCause(FetchErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Status(_) => FetchErrorKind::Rejected,
            FetchError::KindMsg(kind, _) => *kind,
            FetchError::KindMsgCause(kind, _, _) => *kind,
        }
    }

    /// Classify an error from the HTTP client based on where in the request it happened.
    pub(crate) fn from_reqwest(msg: &'static str, e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FetchError::Status(status.as_u16());
        }

        let kind = if e.is_decode() || e.is_redirect() || e.is_builder() {
            FetchErrorKind::Malformed
        } else {
            // Connect errors, timeouts, and connections dropped mid-body are
            // all failures to talk to the upstream at all.
            FetchErrorKind::Unreachable
        };

        FetchError::KindMsgCause(kind, msg, Box::new(e))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Status(code) => write!(f, "unexpected response status {}", code),
            FetchError::KindMsg(_, msg) => msg.fmt(f),
            FetchError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FetchError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Build an HTTP client that applies `timeout` to connecting and to each complete request.
pub fn http_client(timeout: Duration, redirects: Policy) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(timeout)
        .timeout(timeout)
        .redirect(redirects)
        .build()
}

/// Return a copy of `base` with `segments` appended to its path, percent-encoding each.
pub(crate) fn endpoint<I>(base: &Url, segments: I) -> Url
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut url = base.clone();
    // Only fails for URLs that can't have a path (`mailto:`, `data:`), which
    // configuration validation never lets through.
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }

    url
}

/// Turn a non-2xx response into an error, passing others through untouched.
pub(crate) fn check_status(res: Response) -> Result<Response, FetchError> {
    let status = res.status();
    if status.is_success() {
        Ok(res)
    } else {
        Err(FetchError::Status(status.as_u16()))
    }
}

/// Read the entire body of a response and parse it as JSON.
///
/// Failing to read the body is a connectivity problem while failing to parse it
/// means the upstream sent us something unexpected.
pub(crate) async fn decode_json<T>(res: Response) -> Result<T, FetchError>
where
    T: DeserializeOwned,
{
    let body = res
        .bytes()
        .await
        .map_err(|e| FetchError::from_reqwest("unable to read response body", e))?;

    serde_json::from_slice(&body)
        .map_err(|e| FetchError::KindMsgCause(FetchErrorKind::Malformed, "unable to parse response body", Box::new(e)))
}

#[cfg(test)]
mod test {
    use super::{endpoint, FetchError, FetchErrorKind};
    use reqwest::Url;

    #[test]
    fn test_fetch_error_kind_status() {
        let e = FetchError::Status(401);
        assert_eq!(FetchErrorKind::Rejected, e.kind());
        assert_eq!("unexpected response status 401", e.to_string());
    }

    #[test]
    fn test_fetch_error_kind_labels() {
        let labels: Vec<&str> = FetchErrorKind::ALL.iter().map(|k| k.as_label()).collect();
        assert_eq!(vec!["unreachable", "rejected", "malformed"], labels);
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let base = Url::parse("http://192.168.1.10").unwrap();
        let url = endpoint(&base, ["api", "user name", "sensors"]);

        assert_eq!("http://192.168.1.10/api/user%20name/sensors", url.as_str());
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = Url::parse("http://localhost:8080/prefix/").unwrap();
        let url = endpoint(&base, ["devices", "thermostats"]);

        assert_eq!("http://localhost:8080/prefix/devices/thermostats", url.as_str());
    }
}
