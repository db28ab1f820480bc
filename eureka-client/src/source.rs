// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Snapshot sources.
//!
//! A source owns a background task that refreshes a value once per poll interval and exposes
//! the outcome of the most recent refresh to any number of readers.
//!
//! Every refresh overwrites the snapshot, failed ones included: after a failed refresh the
//! source reports no value until a later refresh succeeds. Readers never wait on a refresh in
//! progress.

use std::{
    fmt::Display,
    future::Future,
    sync::{Arc, RwLock},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    model::{Application, Instance},
    query::InstanceQueryOptions,
    schedule::schedule,
};

type Slot<T> = Arc<RwLock<Option<Arc<T>>>>;

/// Latest outcome of a periodic fetch.
///
/// The background task is stopped by [`SnapshotSource::stop`] or when the source is dropped.
pub struct SnapshotSource<T> {
    latest: Slot<T>,
    cancel: CancellationToken,
}

impl<T> Default for SnapshotSource<T> {
    /// An inert source that never holds a value.
    fn default() -> Self {
        Self {
            latest: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
        }
    }
}

impl<T> Drop for SnapshotSource<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T: Send + Sync + 'static> SnapshotSource<T> {
    /// Starts refreshing the snapshot with `produce` every `period`.
    ///
    /// With `await_first`, one fetch completes before this returns. Its outcome is stored even if
    /// it failed, and the periodic refreshes start regardless.
    pub async fn start<E, P, Fut>(
        name: impl Into<String>,
        period: Duration,
        mut produce: P,
        await_first: bool,
    ) -> Self
    where
        E: Display + Send + 'static,
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let name = name.into();
        let latest: Slot<T> = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();

        if await_first {
            store(&name, &latest, produce().await);
        }

        tracing::debug!(source = %name, ?period, await_first, "Starting snapshot source");
        let task_latest = latest.clone();
        tokio::spawn(schedule(
            period,
            produce,
            move |result| store(&name, &task_latest, result),
            cancel.clone(),
        ));

        Self { latest, cancel }
    }

    /// Returns the most recently stored value.
    ///
    /// `None` if no fetch has completed yet or the most recent fetch failed.
    pub fn latest(&self) -> Option<Arc<T>> {
        self.latest.read().expect("lock poisoned").clone()
    }

    /// Stops the background refreshes. Safe to call any number of times.
    ///
    /// The last stored value remains readable.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

fn store<T, E: Display>(name: &str, latest: &RwLock<Option<Arc<T>>>, result: Result<T, E>) {
    let value = match result {
        Ok(value) => Some(Arc::new(value)),
        Err(e) => {
            tracing::warn!(source = %name, err = %e, "Refresh failed, clearing snapshot");
            None
        }
    };
    *latest.write().expect("lock poisoned") = value;
}

/// Periodically refreshed view of one application.
#[derive(Default)]
pub struct AppSource(pub(crate) SnapshotSource<Application>);

impl AppSource {
    /// Returns the latest application, see [`SnapshotSource::latest`].
    pub fn latest(&self) -> Option<Arc<Application>> {
        self.0.latest()
    }

    /// Copies the latest application into `dst`. Returns false, leaving `dst` untouched, if no
    /// application is available.
    pub fn copy_latest_to(&self, dst: &mut Application) -> bool {
        match self.0.latest() {
            Some(app) => {
                dst.clone_from(&app);
                true
            }
            None => false,
        }
    }

    /// Selects the instances of the latest application matching `options`, without copying the
    /// application. `None` if no application is available.
    pub fn latest_instances(&self, options: &InstanceQueryOptions) -> Option<Vec<Arc<Instance>>> {
        let app = self.0.latest()?;
        Some(options.select(std::slice::from_ref(&*app)).into_owned())
    }

    /// Stops refreshing, see [`SnapshotSource::stop`].
    pub fn stop(&self) {
        self.0.stop();
    }
}

/// Periodically refreshed set of instances matching a query.
///
/// A successful refresh matching no instances yields an empty set, which is distinct from no
/// set being available.
#[derive(Default)]
pub struct InstanceSetSource(pub(crate) SnapshotSource<Vec<Arc<Instance>>>);

impl InstanceSetSource {
    /// Returns the latest instance set, see [`SnapshotSource::latest`].
    pub fn latest(&self) -> Option<Arc<Vec<Arc<Instance>>>> {
        self.0.latest()
    }

    /// Stops refreshing, see [`SnapshotSource::stop`].
    pub fn stop(&self) {
        self.0.stop();
    }
}
