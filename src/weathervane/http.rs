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

use crate::metrics::MetricsExposition;
use crate::state::LatestState;
use chrono::{DateTime, Utc};
use hyper::header::{CONTENT_TYPE, ETAG, LAST_MODIFIED};
use hyper::http::response::Builder;
use hyper::http::Error as HttpError;
use hyper::{Body, Method, Request, Response, StatusCode};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{event, Level};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";
const HTML_FORMAT: &str = "text/html; charset=utf-8";
const JSON_FORMAT: &str = "application/json; charset=utf-8";

/// Served from `/state` before anything has been fetched.
const EMPTY_STATE: &str = "{}";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Weathervane Exporter</title></head>
<body>
<h1>Weathervane Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/state">State</a></p>
</body>
</html>
"#;

/// Global state shared between all HTTP requests via Arc.
#[derive(Debug)]
pub struct RequestContext {
    exposition: MetricsExposition,
    latest: LatestState,
}

impl RequestContext {
    pub fn new(exposition: MetricsExposition, latest: LatestState) -> Self {
        RequestContext { exposition, latest }
    }
}

/// Route a request to the index page, the metrics endpoint, or the upstream state.
///
/// Metrics and state are always served from what has already been published, a
/// request never waits for an upstream fetch. Both carry `Last-Modified` and `ETag`
/// headers for the time of the last publish once there has been one.
pub async fn http_route(req: Request<Body>, context: Arc<RequestContext>) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let res = match (&method, path.as_ref()) {
        (&Method::GET, "/") => http_body(StatusCode::OK, HTML_FORMAT, None, Body::from(INDEX_HTML)),

        (&Method::GET, "/metrics") => {
            let updated = context.latest.updated();
            match context.exposition.encoded_text() {
                Ok(buffer) => http_body(StatusCode::OK, TEXT_FORMAT, updated, Body::from(buffer)),
                Err(e) => {
                    event!(
                        Level::ERROR,
                        message = "error scraping metrics",
                        error = %e,
                    );

                    Ok(http_status_no_body(StatusCode::INTERNAL_SERVER_ERROR))
                }
            }
        }

        (&Method::GET, "/state") => match context.latest.current() {
            Some(doc) => http_body(StatusCode::OK, JSON_FORMAT, Some(doc.updated()), Body::from(doc.body())),
            None => http_body(StatusCode::OK, JSON_FORMAT, None, Body::from(EMPTY_STATE)),
        },

        (_, "/") | (_, "/metrics") | (_, "/state") => Ok(http_status_no_body(StatusCode::METHOD_NOT_ALLOWED)),

        _ => Ok(http_status_no_body(StatusCode::NOT_FOUND)),
    };

    Ok(res.unwrap_or_else(|e| {
        event!(
            Level::ERROR,
            message = "error building response",
            path = %path,
            error = %e,
        );

        http_status_no_body(StatusCode::INTERNAL_SERVER_ERROR)
    }))
}

/// Format a time as an HTTP date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Quoted entity tag derived from a `Last-Modified` value.
pub fn entity_tag(last_modified: &str) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(last_modified.as_bytes())))
}

fn with_last_modified(builder: Builder, updated: Option<SystemTime>) -> Builder {
    match updated {
        Some(t) => {
            let last_modified = http_date(t);
            let etag = entity_tag(&last_modified);
            builder.header(LAST_MODIFIED, last_modified).header(ETAG, etag)
        }
        None => builder,
    }
}

fn http_body(
    code: StatusCode,
    content_type: &'static str,
    updated: Option<SystemTime>,
    body: Body,
) -> Result<Response<Body>, HttpError> {
    let builder = Response::builder().status(code).header(CONTENT_TYPE, content_type);
    with_last_modified(builder, updated).body(body)
}

fn http_status_no_body(code: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = code;
    res
}
