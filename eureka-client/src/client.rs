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
//! Client for the registry REST API.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use eureka_sdk_utils::backoff::ExponentialBackoff;
use reqwest::{
    ClientBuilder, Method, StatusCode,
    header::{ACCEPT, CONTENT_TYPE},
};
use url::Url;

use crate::{
    codec::WireFormat,
    error::{HttpOperation, RegistryError},
    model::{Application, Applications, Instance, StatusType, UniqueId},
    selector::ServiceUrlSelector,
};

/// Operations of the registry REST API.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetches one application. Fails with [`RegistryError::AppNotFound`] if it is not
    /// registered.
    async fn fetch_application(&self, name: &str) -> Result<Application, RegistryError>;

    /// Fetches all registered applications.
    async fn fetch_all_applications(&self) -> Result<Applications, RegistryError>;

    /// Fetches the applications with instances registered under a (secure) VIP address.
    async fn fetch_vip_address(
        &self,
        address: &str,
        secure: bool,
    ) -> Result<Applications, RegistryError>;

    /// Fetches one instance of an application.
    async fn fetch_instance(&self, app: &str, id: &str) -> Result<Instance, RegistryError>;

    /// Registers an instance, or replaces its registration.
    async fn register(&self, instance: &Instance) -> Result<(), RegistryError>;

    /// Removes the registration of an instance.
    async fn deregister(&self, instance: &Instance) -> Result<(), RegistryError>;

    /// Renews the lease of an instance.
    async fn heartbeat(&self, instance: &Instance) -> Result<(), RegistryError>;

    /// Sets the status of a registered instance.
    async fn update_status(
        &self,
        instance: &Instance,
        status: StatusType,
    ) -> Result<(), RegistryError>;

    /// Adds a metadata entry to a registered instance.
    async fn add_metadata(
        &self,
        instance: &Instance,
        key: &str,
        value: &str,
    ) -> Result<(), RegistryError>;
}

/// [`RegistryClient`] talking HTTP to the server picked by a [`ServiceUrlSelector`].
///
/// Bodies are JSON unless another [`WireFormat`] is set.
pub struct HttpRegistryClient {
    client: reqwest::Client,
    selector: ServiceUrlSelector,
    format: WireFormat,
    backoff: ExponentialBackoff,
    retries: u32,
    unique_id: Option<UniqueId>,
}

impl HttpRegistryClient {
    /// Creates a client with the given per request `timeout`. Requests failing in transit are
    /// retried up to `retries` times.
    pub fn new(
        selector: ServiceUrlSelector,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self, reqwest::Error> {
        let client = ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self {
            client,
            selector,
            format: WireFormat::default(),
            backoff: ExponentialBackoff::new(0.1, 5.0, 2.0, 0.1),
            retries,
            unique_id: None,
        })
    }

    /// Sets the wire encoding of request and response bodies.
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Returns the wire encoding in use.
    pub fn wire_format(&self) -> WireFormat {
        self.format
    }

    /// Attaches `unique_id` to every decoded instance.
    pub fn with_unique_id(mut self, unique_id: UniqueId) -> Self {
        self.unique_id = Some(unique_id);
        self
    }

    /// Replaces the backoff between retries.
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the server selector.
    pub fn selector(&self) -> &ServiceUrlSelector {
        &self.selector
    }

    async fn request(
        &self,
        op: HttpOperation,
        method: Method,
        path: &[&str],
        query: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<(StatusCode, Bytes), RegistryError> {
        let method = &method;
        let media_type = self.format.content_type();
        self.backoff
            .retry_attempts(self.retries, is_transient, move || {
                async move {
                    let base = self.selector.select_service_url().await?;
                    let url = endpoint(&base, path)?;
                    tracing::trace!(%op, %method, %url, "Sending registry request");

                    let mut request = self
                        .client
                        .request(method.clone(), url)
                        .header(ACCEPT, media_type);
                    if !query.is_empty() {
                        request = request.query(query);
                    }
                    if let Some(body) = body {
                        request = request.header(CONTENT_TYPE, media_type).body(body.to_vec());
                    }

                    let transport = |source| RegistryError::Transport { op, source };
                    let response = request.send().await.map_err(transport)?;
                    let status = response.status();
                    let body = response.bytes().await.map_err(transport)?;
                    Ok::<_, RegistryError>((status, body))
                }
            })
            .await
    }

    async fn get(&self, path: &[&str]) -> Result<(StatusCode, Bytes), RegistryError> {
        self.request(HttpOperation::Retrieval, Method::GET, path, &[], None)
            .await
    }

    async fn update(
        &self,
        op: HttpOperation,
        method: Method,
        path: &[&str],
        query: &[(&str, &str)],
        body: Option<&[u8]>,
        expected: StatusCode,
    ) -> Result<(), RegistryError> {
        let (status, body) = self.request(op, method, path, query, body).await?;
        if status != expected {
            tracing::warn!(%op, %status, "Registry request failed");
            return Err(RegistryError::UnsuccessfulResponse { op, status, body });
        }
        Ok(())
    }

    fn stamp(&self, instance: &mut Instance) {
        if let Some(unique_id) = &self.unique_id {
            instance.unique_id = Some(unique_id.clone());
        }
    }

    fn stamp_application(&self, application: &mut Application) {
        if self.unique_id.is_some() {
            for instance in &mut application.instances {
                self.stamp(Arc::make_mut(instance));
            }
        }
    }
}

#[async_trait::async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch_application(&self, name: &str) -> Result<Application, RegistryError> {
        let (status, body) = self.get(&["apps", name]).await?;
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(RegistryError::AppNotFound(name.to_string())),
            status => {
                return Err(RegistryError::UnsuccessfulResponse {
                    op: HttpOperation::Retrieval,
                    status,
                    body,
                });
            }
        }

        let mut application = self.format.decode_application(&body).map_err(|source| {
            RegistryError::Decode {
                context: "application",
                body: body.clone(),
                source,
            }
        })?;
        self.stamp_application(&mut application);
        Ok(application)
    }

    async fn fetch_all_applications(&self) -> Result<Applications, RegistryError> {
        let body = expect_ok(self.get(&["apps"]).await?)?;
        self.decode_applications(body)
    }

    async fn fetch_vip_address(
        &self,
        address: &str,
        secure: bool,
    ) -> Result<Applications, RegistryError> {
        let collection = if secure { "svips" } else { "vips" };
        let body = expect_ok(self.get(&[collection, address]).await?)?;
        self.decode_applications(body)
    }

    async fn fetch_instance(&self, app: &str, id: &str) -> Result<Instance, RegistryError> {
        let body = expect_ok(self.get(&["apps", app, id]).await?)?;
        let mut instance = self.format.decode_instance(&body).map_err(|source| {
            RegistryError::Decode {
                context: "instance",
                body: body.clone(),
                source,
            }
        })?;
        self.stamp(&mut instance);
        Ok(instance)
    }

    async fn register(&self, instance: &Instance) -> Result<(), RegistryError> {
        let body = self.format.encode_instance(instance).map_err(RegistryError::Encode)?;
        tracing::debug!(app = %instance.app, id = %instance.id(), "Registering instance");
        self.update(
            HttpOperation::Registration,
            Method::POST,
            &["apps", instance.app.as_str()],
            &[],
            Some(&body),
            StatusCode::NO_CONTENT,
        )
        .await
    }

    async fn deregister(&self, instance: &Instance) -> Result<(), RegistryError> {
        let id = instance.id();
        tracing::debug!(app = %instance.app, %id, "Deregistering instance");
        self.update(
            HttpOperation::Deregistration,
            Method::DELETE,
            &["apps", instance.app.as_str(), &*id],
            &[],
            None,
            StatusCode::OK,
        )
        .await
    }

    async fn heartbeat(&self, instance: &Instance) -> Result<(), RegistryError> {
        let id = instance.id();
        self.update(
            HttpOperation::LeaseRenewal,
            Method::PUT,
            &["apps", instance.app.as_str(), &*id],
            &[],
            None,
            StatusCode::OK,
        )
        .await
    }

    async fn update_status(
        &self,
        instance: &Instance,
        status: StatusType,
    ) -> Result<(), RegistryError> {
        let id = instance.id();
        self.update(
            HttpOperation::StatusUpdate,
            Method::PUT,
            &["apps", instance.app.as_str(), &*id, "status"],
            &[("value", status.as_str())],
            None,
            StatusCode::OK,
        )
        .await
    }

    async fn add_metadata(
        &self,
        instance: &Instance,
        key: &str,
        value: &str,
    ) -> Result<(), RegistryError> {
        let id = instance.id();
        self.update(
            HttpOperation::MetadataUpdate,
            Method::PUT,
            &["apps", instance.app.as_str(), &*id, "metadata"],
            &[(key, value)],
            None,
            StatusCode::OK,
        )
        .await
    }
}

impl HttpRegistryClient {
    fn decode_applications(&self, body: Bytes) -> Result<Applications, RegistryError> {
        let mut applications = self.format.decode_applications(&body).map_err(|source| {
            RegistryError::Decode {
                context: "applications",
                body: body.clone(),
                source,
            }
        })?;
        for application in &mut applications.applications {
            self.stamp_application(application);
        }
        Ok(applications)
    }
}

fn expect_ok((status, body): (StatusCode, Bytes)) -> Result<Bytes, RegistryError> {
    if status != StatusCode::OK {
        return Err(RegistryError::UnsuccessfulResponse {
            op: HttpOperation::Retrieval,
            status,
            body,
        });
    }
    Ok(body)
}

/// Connect failures and timeouts.
fn is_transient(error: &RegistryError) -> bool {
    match error {
        RegistryError::Transport { source, .. } => source.is_connect() || source.is_timeout(),
        _ => false,
    }
}

/// Appends percent-encoded `segments` to the path of `base`.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, RegistryError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_segments() {
        let cases: [(&str, &[&str], &str); 4] = [
            (
                "http://eureka:8080/eureka/v2",
                &["apps"],
                "http://eureka:8080/eureka/v2/apps",
            ),
            (
                "http://eureka:8080/eureka/v2/",
                &["apps", "A"],
                "http://eureka:8080/eureka/v2/apps/A",
            ),
            (
                "http://eureka:8080",
                &["vips", "v.example"],
                "http://eureka:8080/vips/v.example",
            ),
            (
                "http://eureka:8080/",
                &["apps", "a b", "i/1"],
                "http://eureka:8080/apps/a%20b/i%2F1",
            ),
        ];
        for (base, segments, expected) in cases {
            let url = endpoint(&Url::parse(base).unwrap(), segments).unwrap();
            assert_eq!(url.as_str(), expected, "{base} {segments:?}");
        }
    }

    #[test]
    fn endpoint_rejects_opaque_base() {
        let base = Url::parse("mailto:eureka@example.com").unwrap();
        assert!(matches!(
            endpoint(&base, &["apps"]),
            Err(RegistryError::InvalidUrl(_))
        ));
    }

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(!is_transient(&RegistryError::NoServiceUrls));
        assert!(!is_transient(&RegistryError::AppNotFound("A".into())));
    }

    #[tokio::test]
    #[test_log::test]
    async fn missing_urls_fail_without_retry() {
        let selector = ServiceUrlSelector::new(Vec::new());
        let client = HttpRegistryClient::new(selector, Duration::from_secs(1), 3).unwrap();
        assert!(matches!(
            client.fetch_all_applications().await,
            Err(RegistryError::NoServiceUrls)
        ));
    }

    #[tokio::test]
    #[test_log::test]
    async fn refused_connection_is_a_transport_error() {
        // Nothing listens on port 1.
        let selector = ServiceUrlSelector::new(vec![Url::parse("http://127.0.0.1:1/").unwrap()]);
        let client = HttpRegistryClient::new(selector, Duration::from_secs(1), 2)
            .unwrap()
            .with_backoff(ExponentialBackoff::new(0.01, 0.01, 1.0, 0.0));

        let err = client.fetch_application("A").await.unwrap_err();
        assert!(
            matches!(err, RegistryError::Transport { op: HttpOperation::Retrieval, .. }),
            "{err:?}"
        );
        assert!(is_transient(&err));
    }
}
