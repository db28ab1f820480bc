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
//! In-process fake of the Eureka registry REST API.
//!
//! The registry keeps applications in memory and answers in the JSON or XML dialect named by
//! the request's `Accept` header, using the client's own codec. It is good enough to exercise
//! the client end to end, but does not implement leases, deltas or replication.

use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use eureka_client::{
    codec::{CodecError, WireFormat},
    model::{Application, Applications, Instance, StatusType},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Path prefix of the registry API.
pub const API_BASE: &str = "eureka/v2";

#[derive(Default)]
struct RegistryState {
    applications: Mutex<BTreeMap<String, Vec<Instance>>>,
    heartbeats: Mutex<HashMap<String, usize>>,
    requests: AtomicUsize,
}

impl RegistryState {
    fn with_instance<T>(
        &self,
        app: &str,
        id: &str,
        f: impl FnOnce(&mut Instance) -> T,
    ) -> Option<T> {
        let mut applications = self.applications.lock().expect("lock poisoned");
        applications
            .get_mut(app)?
            .iter_mut()
            .find(|instance| instance.id() == id)
            .map(f)
    }

    fn snapshot(&self, keep: impl Fn(&Instance) -> bool) -> Applications {
        let applications = self.applications.lock().expect("lock poisoned");
        let applications = applications
            .iter()
            .filter_map(|(name, instances)| {
                let instances: Vec<_> = instances
                    .iter()
                    .filter(|instance| keep(instance))
                    .cloned()
                    .map(Arc::new)
                    .collect();
                (!instances.is_empty()).then(|| {
                    Application {
                        name: name.clone(),
                        instances,
                    }
                })
            })
            .collect();
        Applications {
            versions_delta: 1,
            apps_hashcode: String::new(),
            applications,
        }
    }
}

/// A running fake registry. Stops serving when dropped.
pub struct FakeRegistry {
    state: Arc<RegistryState>,
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl FakeRegistry {
    /// Starts serving on an ephemeral port on localhost.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(RegistryState::default());
        let cancel = CancellationToken::new();

        let router = Router::new().nest(&format!("/{API_BASE}"), api(state.clone()));
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            tracing::info!(%addr, "Starting fake registry");
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "Fake registry unexpectedly stopped");
            }
        });

        Ok(Self {
            state,
            addr,
            cancel,
        })
    }

    /// Base URL of the registry API.
    pub fn service_url(&self) -> Url {
        Url::parse(&format!("http://{}/{API_BASE}", self.addr))
            .expect("It is safe to format a SocketAddr as a URL")
    }

    /// Registers `instance` directly, bypassing the API.
    pub fn insert(&self, instance: Instance) {
        let mut applications = self.state.applications.lock().expect("lock poisoned");
        let instances = applications.entry(instance.app.clone()).or_default();
        let id = instance.id().into_owned();
        match instances.iter_mut().find(|existing| existing.id() == id) {
            Some(existing) => *existing = instance,
            None => instances.push(instance),
        }
    }

    /// Returns the registered instance `id` of `app`.
    pub fn instance(&self, app: &str, id: &str) -> Option<Instance> {
        self.state.with_instance(app, id, |instance| instance.clone())
    }

    /// Number of heartbeats received for instance `id`.
    pub fn heartbeats(&self, id: &str) -> usize {
        let heartbeats = self.state.heartbeats.lock().expect("lock poisoned");
        heartbeats.get(id).copied().unwrap_or_default()
    }

    /// Number of requests served so far.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

impl Drop for FakeRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn api(state: Arc<RegistryState>) -> Router {
    Router::new()
        .route("/apps", get(get_apps))
        .route("/apps/{app}", get(get_app).post(register))
        .route(
            "/apps/{app}/{id}",
            get(get_instance).put(heartbeat).delete(deregister),
        )
        .route("/apps/{app}/{id}/status", put(update_status))
        .route("/apps/{app}/{id}/metadata", put(add_metadata))
        .route("/vips/{address}", get(get_vip))
        .route("/svips/{address}", get(get_svip))
        .with_state(state)
}

/// Format named by the `name` header, JSON if absent or unknown.
fn negotiate(headers: &HeaderMap, name: header::HeaderName) -> WireFormat {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(WireFormat::from_media_type)
        .unwrap_or_default()
}

fn respond(format: WireFormat, body: Result<Vec<u8>, CodecError>) -> Response {
    match body {
        Ok(body) => ([(header::CONTENT_TYPE, format.content_type())], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn count(state: &RegistryState) {
    state.requests.fetch_add(1, Ordering::SeqCst);
}

async fn get_apps(State(state): State<Arc<RegistryState>>, headers: HeaderMap) -> Response {
    count(&state);
    let format = negotiate(&headers, header::ACCEPT);
    respond(format, format.encode_applications(&state.snapshot(|_| true)))
}

async fn get_app(
    State(state): State<Arc<RegistryState>>,
    Path(app): Path<String>,
    headers: HeaderMap,
) -> Response {
    count(&state);
    let format = negotiate(&headers, header::ACCEPT);
    let applications = state.applications.lock().expect("lock poisoned");
    match applications.get(&app) {
        Some(instances) => {
            let application = Application {
                name: app.clone(),
                instances: instances.iter().cloned().map(Arc::new).collect(),
            };
            respond(format, format.encode_application(&application))
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_instance(
    State(state): State<Arc<RegistryState>>,
    Path((app, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    count(&state);
    let format = negotiate(&headers, header::ACCEPT);
    match state.with_instance(&app, &id, |instance| format.encode_instance(instance)) {
        Some(body) => respond(format, body),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn register(
    State(state): State<Arc<RegistryState>>,
    Path(app): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    count(&state);
    let format = negotiate(&headers, header::CONTENT_TYPE);
    let mut instance = match format.decode_instance(&body) {
        Ok(instance) => instance,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting invalid registration");
            return StatusCode::BAD_REQUEST;
        }
    };
    if instance.host_name.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    instance.app = app;

    let mut applications = state.applications.lock().expect("lock poisoned");
    let instances = applications.entry(instance.app.clone()).or_default();
    let id = instance.id().into_owned();
    match instances.iter_mut().find(|existing| existing.id() == id) {
        Some(existing) => *existing = instance,
        None => instances.push(instance),
    }
    StatusCode::NO_CONTENT
}

async fn deregister(
    State(state): State<Arc<RegistryState>>,
    Path((app, id)): Path<(String, String)>,
) -> StatusCode {
    count(&state);
    let mut applications = state.applications.lock().expect("lock poisoned");
    let Some(instances) = applications.get_mut(&app) else {
        return StatusCode::NOT_FOUND;
    };
    let before = instances.len();
    instances.retain(|instance| instance.id() != id);
    if instances.len() == before {
        return StatusCode::NOT_FOUND;
    }
    if instances.is_empty() {
        applications.remove(&app);
    }
    StatusCode::OK
}

async fn heartbeat(
    State(state): State<Arc<RegistryState>>,
    Path((app, id)): Path<(String, String)>,
) -> StatusCode {
    count(&state);
    if state.with_instance(&app, &id, |_| ()).is_none() {
        return StatusCode::NOT_FOUND;
    }
    *state
        .heartbeats
        .lock()
        .expect("lock poisoned")
        .entry(id)
        .or_default() += 1;
    StatusCode::OK
}

#[derive(Deserialize)]
struct StatusQuery {
    value: String,
}

async fn update_status(
    State(state): State<Arc<RegistryState>>,
    Path((app, id)): Path<(String, String)>,
    Query(query): Query<StatusQuery>,
) -> StatusCode {
    count(&state);
    let Ok(status) = query.value.parse::<StatusType>() else {
        return StatusCode::BAD_REQUEST;
    };
    match state.with_instance(&app, &id, |instance| instance.status = status) {
        Some(()) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    }
}

async fn add_metadata(
    State(state): State<Arc<RegistryState>>,
    Path((app, id)): Path<(String, String)>,
    Query(entries): Query<HashMap<String, String>>,
) -> StatusCode {
    count(&state);
    let updated = state.with_instance(&app, &id, |instance| {
        for (key, value) in entries {
            instance.set_metadata_string(key, value);
        }
    });
    match updated {
        Some(()) => StatusCode::OK,
        // The real registry fails metadata updates of unknown instances with a 500.
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn get_vip(
    State(state): State<Arc<RegistryState>>,
    Path(address): Path<String>,
    headers: HeaderMap,
) -> Response {
    count(&state);
    let format = negotiate(&headers, header::ACCEPT);
    respond(
        format,
        format.encode_applications(&state.snapshot(|instance| instance.vip_address == address)),
    )
}

async fn get_svip(
    State(state): State<Arc<RegistryState>>,
    Path(address): Path<String>,
    headers: HeaderMap,
) -> Response {
    count(&state);
    let format = negotiate(&headers, header::ACCEPT);
    respond(
        format,
        format.encode_applications(&state.snapshot(|instance| instance.secure_vip_address == address)),
    )
}
