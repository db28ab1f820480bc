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
//! DNS based discovery of registry servers.
//!
//! Servers are published as TXT records in two levels:
//! - `txt.<region>.<domain>.` lists the zone names of a region.
//! - `txt.<zone>.` lists the server host names of a zone.
//!
//! Each discovered host becomes the base URL `http://<host>:<port>/<url_base>`.

use std::{sync::Arc, time::Duration};

use eureka_sdk_utils::backoff::{BackoffConfig, ExponentialBackoff};
use hickory_resolver::{
    ResolveError, Resolver,
    name_server::TokioConnectionProvider,
    proto::rr::{Record, RecordType},
};
use thiserror::Error;
use url::Url;

/// Lower bound for the time a discovery result is considered fresh.
pub const MIN_TTL: Duration = Duration::from_secs(60);
/// TTL assumed when a DNS answer carries none.
const DEFAULT_TTL: Duration = Duration::from_secs(120);
/// Total time a single lookup is retried for.
pub const DEFAULT_MAX_RETRY_ELAPSED: Duration = Duration::from_secs(15 * 60);
/// Region used when none is configured and the instance metadata service is unreachable.
pub const DEFAULT_REGION: &str = "us-east-1";
/// AWS instance metadata endpoint reporting the availability zone.
pub const AVAILABILITY_ZONE_URL: &str =
    "http://169.254.169.254/latest/meta-data/placement/availability-zone";

const DEFAULT_LOOKUP_BACKOFF: BackoffConfig = BackoffConfig {
    minimum_delay_secs: 0.5,
    maximum_delay_secs: 60.0,
    factor: 1.5,
    jitter_secs: 0.5,
};
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors raised during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The system resolver configuration could not be loaded.
    #[error("failed to create DNS resolver: {0}")]
    ResolverSetup(#[source] ResolveError),
    /// A TXT lookup failed.
    #[error("TXT lookup of {name} failed: {source}")]
    Lookup {
        /// Queried name.
        name: String,
        /// Underlying resolver error.
        #[source]
        source: ResolveError,
    },
    /// The lookup succeeded but returned no records.
    #[error("no discovery TXT record returned for name={0}")]
    NoRecords(String),
    /// The resulting name is not usable as a domain.
    #[error("invalid domain name: {0:?}")]
    InvalidDomain(String),
}

/// Strings of the TXT records of a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecords {
    /// Record strings, split on whitespace.
    pub records: Vec<String>,
    /// Time to live of the answer.
    pub ttl: Duration,
}

/// Resolves TXT records.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TxtResolver: Send + Sync {
    /// Looks up the TXT records of the fully qualified name `fqdn`.
    async fn lookup_txt(&self, fqdn: &str) -> Result<TxtRecords, DiscoveryError>;
}

/// [`TxtResolver`] backed by the system resolver configuration.
pub struct HickoryTxtResolver {
    resolver: Resolver<TokioConnectionProvider>,
}

impl HickoryTxtResolver {
    /// Creates a resolver from the system configuration (`/etc/resolv.conf` on unix).
    pub fn from_system_conf() -> Result<Self, DiscoveryError> {
        let resolver = Resolver::builder_tokio()
            .map_err(DiscoveryError::ResolverSetup)?
            .build();
        Ok(Self { resolver })
    }
}

#[async_trait::async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn lookup_txt(&self, fqdn: &str) -> Result<TxtRecords, DiscoveryError> {
        let lookup = self
            .resolver
            .txt_lookup(fqdn)
            .await
            .map_err(|source| {
                DiscoveryError::Lookup {
                    name: fqdn.to_string(),
                    source,
                }
            })?;

        let ttl = txt_ttl(lookup.as_lookup().record_iter());
        let records: Vec<String> = lookup
            .iter()
            .flat_map(|txt| txt.txt_data().iter())
            .flat_map(|data| {
                String::from_utf8_lossy(data)
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();

        if records.is_empty() {
            return Err(DiscoveryError::NoRecords(fqdn.to_string()));
        }
        Ok(TxtRecords { records, ttl })
    }
}

/// Where the region of the deployment comes from.
#[derive(Debug, Clone)]
pub enum RegionSource {
    /// A fixed region.
    Fixed(String),
    /// The availability zone reported by the instance metadata endpoint, without its zone
    /// letter. Falls back to [`DEFAULT_REGION`].
    InstanceMetadata(Url),
}

impl RegionSource {
    /// Uses `region` if set, the default instance metadata endpoint otherwise.
    pub fn from_config(region: Option<&str>) -> Self {
        match region {
            Some(region) if !region.is_empty() => RegionSource::Fixed(region.to_string()),
            _ => {
                match Url::parse(AVAILABILITY_ZONE_URL) {
                    Ok(url) => RegionSource::InstanceMetadata(url),
                    Err(_) => RegionSource::Fixed(DEFAULT_REGION.to_string()),
                }
            }
        }
    }

    async fn resolve(&self, http: &reqwest::Client) -> String {
        match self {
            RegionSource::Fixed(region) => region.clone(),
            RegionSource::InstanceMetadata(url) => {
                match availability_zone(http, url).await {
                    Ok(zone) => region_of_zone(&zone).to_string(),
                    Err(e) => {
                        tracing::warn!(err = %e, default = DEFAULT_REGION, "Could not retrieve availability zone");
                        DEFAULT_REGION.to_string()
                    }
                }
            }
        }
    }
}

async fn availability_zone(http: &reqwest::Client, url: &Url) -> Result<String, reqwest::Error> {
    let response = http
        .get(url.clone())
        .timeout(METADATA_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    Ok(response.text().await?.trim().to_string())
}

/// Strips the zone letter from an availability zone, e.g. `us-west-2b` becomes `us-west-2`.
fn region_of_zone(zone: &str) -> &str {
    let mut chars = zone.chars();
    chars.next_back();
    chars.as_str()
}

fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Discovers registry servers through DNS.
pub struct DnsDiscovery {
    resolver: Arc<dyn TxtResolver>,
    domain: String,
    port: u16,
    url_base: String,
    region: RegionSource,
    http: reqwest::Client,
    backoff: ExponentialBackoff,
    max_retry_elapsed: Duration,
}

impl DnsDiscovery {
    /// Creates a discovery for servers below `domain`.
    pub fn new(
        resolver: Arc<dyn TxtResolver>,
        domain: impl Into<String>,
        port: u16,
        url_base: impl Into<String>,
        region: RegionSource,
    ) -> Self {
        Self {
            resolver,
            domain: domain.into(),
            port,
            url_base: url_base.into(),
            region,
            http: reqwest::Client::new(),
            backoff: ExponentialBackoff::new_from_config(DEFAULT_LOOKUP_BACKOFF),
            max_retry_elapsed: DEFAULT_MAX_RETRY_ELAPSED,
        }
    }

    /// Sets the retry behavior of single lookups.
    pub fn with_retry(mut self, backoff: ExponentialBackoff, max_elapsed: Duration) -> Self {
        self.backoff = backoff;
        self.max_retry_elapsed = max_elapsed;
        self
    }

    /// Returns the discovered server base URLs and how long they stay fresh.
    ///
    /// Fails if the region's zone list cannot be resolved. Zones whose server list cannot be
    /// resolved are skipped. The freshness is the TTL of the zone list, at least [`MIN_TTL`].
    pub async fn discover(&self) -> Result<(Vec<Url>, Duration), DiscoveryError> {
        let region = self.region.resolve(&self.http).await;
        let name = format!("txt.{region}.{}", fqdn(&self.domain));
        if self.domain.is_empty() || name.contains("..") {
            return Err(DiscoveryError::InvalidDomain(name));
        }

        let zones = self.retrying_lookup(&name).await?;
        let mut urls = Vec::new();
        for zone in &zones.records {
            let hosts = match self.retrying_lookup(&format!("txt.{}", fqdn(zone))).await {
                Ok(hosts) => hosts,
                Err(e) => {
                    tracing::warn!(%zone, err = %e, "Skipping zone, server lookup failed");
                    continue;
                }
            };
            for host in hosts.records {
                let url = format!("http://{host}:{}/{}", self.port, self.url_base);
                match Url::parse(&url) {
                    Ok(url) => urls.push(url),
                    Err(e) => tracing::warn!(%url, err = %e, "Skipping invalid server URL"),
                }
            }
        }

        let ttl = zones.ttl.max(MIN_TTL);
        tracing::debug!(%region, servers = urls.len(), ?ttl, "Finished DNS discovery");
        Ok((urls, ttl))
    }

    async fn retrying_lookup(&self, name: &str) -> Result<TxtRecords, DiscoveryError> {
        self.backoff
            .retry_for(self.max_retry_elapsed, || self.resolver.lookup_txt(name))
            .await
    }
}

/// TTL of the first TXT record of an answer. Records of other types, such as a CNAME chain in
/// front of the TXT records, are skipped.
fn txt_ttl<'a>(mut records: impl Iterator<Item = &'a Record>) -> Duration {
    records
        .find(|record| record.record_type() == RecordType::TXT)
        .map(|record| Duration::from_secs(record.ttl().into()))
        .unwrap_or(DEFAULT_TTL)
}
