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

//! The most recently fetched upstream state, encoded as JSON.

use hyper::body::Bytes;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

/// Upstream state from a single fetch along with when it was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDocument {
    updated: SystemTime,
    body: Bytes,
}

impl StateDocument {
    pub fn updated(&self) -> SystemTime {
        self.updated
    }

    /// JSON encoded upstream state.
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }
}

/// Shared handle to the state from the most recent successful fetch.
///
/// Updates replace the whole document. Readers hold on to the document they
/// got for as long as they need it without blocking later updates.
#[derive(Debug, Clone, Default)]
pub struct LatestState {
    current: Arc<RwLock<Option<Arc<StateDocument>>>>,
}

impl LatestState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `snapshot` as JSON and make it the current document. The current
    /// document is left as-is if encoding fails.
    pub fn update<S>(&self, snapshot: &S, updated: SystemTime) -> Result<(), serde_json::Error>
    where
        S: Serialize + ?Sized,
    {
        let body = Bytes::from(serde_json::to_vec(snapshot)?);
        let doc = Arc::new(StateDocument { updated, body });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(doc);
        Ok(())
    }

    /// The current document, `None` until the first update.
    pub fn current(&self) -> Option<Arc<StateDocument>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// When the current document was published, `None` until the first update.
    pub fn updated(&self) -> Option<SystemTime> {
        self.current().map(|d| d.updated())
    }
}
