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
//! Connection to a registry.
//!
//! [`EurekaConnection`] is the entry point of the crate. It offers one-shot queries, the
//! instance lifecycle operations, and two ways of following a query over time:
//! - Update streams ([`UpdateStream`]) deliver the outcome of every poll, coalesced so that a
//!   slow consumer only sees the most recent one.
//! - Sources ([`AppSource`], [`InstanceSetSource`]) keep the outcome of the most recent poll
//!   for any number of readers.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    client::{HttpRegistryClient, RegistryClient},
    config::{Config, ConfigError},
    discovery::{DiscoveryError, DnsDiscovery, HickoryTxtResolver, RegionSource},
    error::RegistryError,
    model::{Application, Instance, StatusType},
    query::{InstanceQueryOption, InstanceQueryOptions},
    selector::ServiceUrlSelector,
    source::{AppSource, InstanceSetSource, SnapshotSource},
    updates::{AppUpdate, InstanceSetUpdate, UpdateStream},
};

/// Errors raised while setting up a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A configured service URL could not be parsed.
    #[error("invalid service URL {url:?}: {source}")]
    InvalidServiceUrl {
        /// The offending URL.
        url: String,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },
    /// DNS discovery could not be set up.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// The HTTP client could not be created.
    #[error("failed to create HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Connection to a registry.
#[derive(Clone)]
pub struct EurekaConnection {
    client: Arc<dyn RegistryClient>,
    poll_interval: Duration,
}

impl EurekaConnection {
    /// Creates a connection using `client`, polling every `poll_interval` for scheduled
    /// updates.
    pub fn new(client: Arc<dyn RegistryClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Creates an HTTP connection from a configuration.
    ///
    /// Unset values are filled with their defaults before the configuration is validated, see
    /// [`Config::fill_defaults`].
    pub fn from_config(config: &Config) -> Result<Self, ConnectionError> {
        let mut config = config.clone();
        config.fill_defaults();
        config.validate()?;
        let eureka = &config.eureka;

        let urls = eureka
            .service_urls
            .iter()
            .map(|url| {
                Url::parse(url).map_err(|source| {
                    ConnectionError::InvalidServiceUrl {
                        url: url.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let selector = if eureka.use_dns_for_service_urls {
            let discovery = DnsDiscovery::new(
                Arc::new(HickoryTxtResolver::from_system_conf()?),
                &eureka.dns_discovery_zone,
                eureka.server_port,
                &eureka.server_url_base,
                RegionSource::from_config(config.aws.region.as_deref()),
            );
            ServiceUrlSelector::with_discovery(urls, discovery)
        } else {
            ServiceUrlSelector::new(urls)
        };

        let client = HttpRegistryClient::new(selector, eureka.connect_timeout(), eureka.retries)?
            .with_wire_format(eureka.wire_format);
        tracing::info!(
            dns_discovery = eureka.use_dns_for_service_urls,
            wire_format = ?eureka.wire_format,
            poll_interval = ?eureka.poll_interval(),
            "Created registry connection"
        );
        Ok(Self::new(Arc::new(client), eureka.poll_interval()))
    }

    /// The period of scheduled updates.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Fetches one application.
    pub async fn get_app(&self, name: &str) -> Result<Application, RegistryError> {
        self.client.fetch_application(name).await
    }

    /// Fetches all applications, keyed by name.
    pub async fn get_apps(&self) -> Result<HashMap<String, Application>, RegistryError> {
        Ok(self.client.fetch_all_applications().await?.into_map())
    }

    /// Fetches one instance of an application.
    pub async fn get_instance(&self, app: &str, id: &str) -> Result<Instance, RegistryError> {
        self.client.fetch_instance(app, id).await
    }

    /// Fetches the instances registered under a VIP address that match `options`.
    pub async fn get_instances_by_vip_address<I>(
        &self,
        address: &str,
        secure: bool,
        options: I,
    ) -> Result<Vec<Arc<Instance>>, RegistryError>
    where
        I: IntoIterator,
        I::Item: Into<Option<InstanceQueryOption>>,
    {
        let options = InstanceQueryOptions::new(options)?;
        let applications = self.client.fetch_vip_address(address, secure).await?;
        Ok(options.select_owned(applications.applications))
    }

    /// Fetches the instances of an application that match `options`.
    pub async fn get_app_instances<I>(
        &self,
        name: &str,
        options: I,
    ) -> Result<Vec<Arc<Instance>>, RegistryError>
    where
        I: IntoIterator,
        I::Item: Into<Option<InstanceQueryOption>>,
    {
        let options = InstanceQueryOptions::new(options)?;
        let application = self.client.fetch_application(name).await?;
        Ok(options.select_owned(vec![application]))
    }

    /// Registers an instance.
    pub async fn register_instance(&self, instance: &Instance) -> Result<(), RegistryError> {
        self.client.register(instance).await
    }

    /// Registers an instance again, e.g. after the registry lost it.
    ///
    /// The status of `instance` is set to [`StatusType::Up`] first, unless it is
    /// [`StatusType::OutOfService`].
    pub async fn reregister_instance(&self, instance: &mut Instance) -> Result<(), RegistryError> {
        if instance.status != StatusType::OutOfService {
            instance.status = StatusType::Up;
        }
        self.client.register(instance).await
    }

    /// Removes the registration of an instance.
    pub async fn deregister_instance(&self, instance: &Instance) -> Result<(), RegistryError> {
        self.client.deregister(instance).await
    }

    /// Renews the lease of an instance.
    pub async fn heartbeat_instance(&self, instance: &Instance) -> Result<(), RegistryError> {
        self.client.heartbeat(instance).await
    }

    /// Sets the status of an instance in the registry, then on `instance`.
    pub async fn update_instance_status(
        &self,
        instance: &mut Instance,
        status: StatusType,
    ) -> Result<(), RegistryError> {
        self.client.update_status(instance, status).await?;
        instance.status = status;
        Ok(())
    }

    /// Adds a metadata entry to an instance in the registry, then on `instance`.
    pub async fn add_metadata_string(
        &self,
        instance: &mut Instance,
        key: &str,
        value: &str,
    ) -> Result<(), RegistryError> {
        self.client.add_metadata(instance, key, value).await?;
        instance.set_metadata_string(key, value);
        Ok(())
    }

    /// Delivers the outcome of fetching application `name` once per poll interval, until
    /// `cancel` fires or the stream is dropped.
    ///
    /// With `await_first`, the first outcome is available when this returns.
    pub async fn schedule_app_updates(
        &self,
        name: &str,
        await_first: bool,
        cancel: CancellationToken,
    ) -> UpdateStream<AppUpdate> {
        UpdateStream::start(
            self.poll_interval,
            app_producer(self.client.clone(), name.to_string()),
            await_first,
            cancel,
        )
        .await
    }

    /// Delivers the instances of a VIP address matching `options` once per poll interval,
    /// until `cancel` fires or the stream is dropped.
    ///
    /// Fails without starting anything if `options` are invalid.
    pub async fn schedule_vip_address_updates<I>(
        &self,
        address: &str,
        secure: bool,
        await_first: bool,
        cancel: CancellationToken,
        options: I,
    ) -> Result<UpdateStream<InstanceSetUpdate>, RegistryError>
    where
        I: IntoIterator,
        I::Item: Into<Option<InstanceQueryOption>>,
    {
        let options = InstanceQueryOptions::new(options)?;
        Ok(UpdateStream::start(
            self.poll_interval,
            vip_producer(self.client.clone(), address.to_string(), secure, options),
            await_first,
            cancel,
        )
        .await)
    }

    /// Keeps the latest state of application `name`.
    pub async fn new_app_source(&self, name: &str, await_first: bool) -> AppSource {
        AppSource(
            SnapshotSource::start(
                format!("app {name}"),
                self.poll_interval,
                app_producer(self.client.clone(), name.to_string()),
                await_first,
            )
            .await,
        )
    }

    /// Keeps the latest set of instances of a VIP address matching `options`.
    pub async fn new_instance_set_source_for_vip_address<I>(
        &self,
        address: &str,
        secure: bool,
        await_first: bool,
        options: I,
    ) -> Result<InstanceSetSource, RegistryError>
    where
        I: IntoIterator,
        I::Item: Into<Option<InstanceQueryOption>>,
    {
        let options = InstanceQueryOptions::new(options)?;
        Ok(InstanceSetSource(
            SnapshotSource::start(
                format!("vip {address}"),
                self.poll_interval,
                vip_producer(self.client.clone(), address.to_string(), secure, options),
                await_first,
            )
            .await,
        ))
    }

    /// Keeps the latest set of instances of application `name` matching `options`.
    pub async fn new_instance_set_source_for_app<I>(
        &self,
        name: &str,
        await_first: bool,
        options: I,
    ) -> Result<InstanceSetSource, RegistryError>
    where
        I: IntoIterator,
        I::Item: Into<Option<InstanceQueryOption>>,
    {
        let options = InstanceQueryOptions::new(options)?;
        Ok(InstanceSetSource(
            SnapshotSource::start(
                format!("app {name}"),
                self.poll_interval,
                app_instances_producer(self.client.clone(), name.to_string(), options),
                await_first,
            )
            .await,
        ))
    }
}

type Fetch<T> = Pin<Box<dyn Future<Output = Result<T, RegistryError>> + Send>>;

fn app_producer(
    client: Arc<dyn RegistryClient>,
    name: String,
) -> impl FnMut() -> Fetch<Application> + Send + 'static {
    move || -> Fetch<Application> {
        let client = client.clone();
        let name = name.clone();
        Box::pin(async move { client.fetch_application(&name).await })
    }
}

fn app_instances_producer(
    client: Arc<dyn RegistryClient>,
    name: String,
    options: InstanceQueryOptions,
) -> impl FnMut() -> Fetch<Vec<Arc<Instance>>> + Send + 'static {
    let mut fetch = app_producer(client, name);
    move || -> Fetch<Vec<Arc<Instance>>> {
        let fetched = fetch();
        let options = options.clone();
        Box::pin(async move {
            let application = fetched.await?;
            Ok::<_, RegistryError>(options.select_owned(vec![application]))
        })
    }
}

fn vip_producer(
    client: Arc<dyn RegistryClient>,
    address: String,
    secure: bool,
    options: InstanceQueryOptions,
) -> impl FnMut() -> Fetch<Vec<Arc<Instance>>> + Send + 'static {
    move || -> Fetch<Vec<Arc<Instance>>> {
        let client = client.clone();
        let address = address.clone();
        let options = options.clone();
        Box::pin(async move {
            let applications = client.fetch_vip_address(&address, secure).await?;
            Ok::<_, RegistryError>(options.select_owned(applications.applications))
        })
    }
}
