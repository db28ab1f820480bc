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
//! Registry server selection.
//!
//! The selector picks one base URL uniformly at random from the known set. With DNS discovery
//! enabled the known set is refreshed at most once per discovery TTL: a single-slot gate is
//! claimed by the refreshing caller and stays claimed until the TTL of a successful refresh has
//! passed. A failed refresh releases the gate right away and keeps the known set.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use rand::Rng;
use tokio::time::Instant;
use url::Url;

use crate::{discovery::DnsDiscovery, error::RegistryError};

/// Chooses the registry server for each request.
pub struct ServiceUrlSelector {
    urls: ArcSwap<Vec<Url>>,
    discovery: Option<Arc<DnsDiscovery>>,
    gate: Arc<AtomicBool>,
}

impl ServiceUrlSelector {
    /// Selects from a fixed set of URLs.
    pub fn new(urls: Vec<Url>) -> Self {
        Self {
            urls: ArcSwap::from_pointee(urls),
            discovery: None,
            gate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Refreshes the set of URLs through `discovery`. `urls` are used until the first refresh
    /// succeeds.
    pub fn with_discovery(urls: Vec<Url>, discovery: DnsDiscovery) -> Self {
        Self {
            discovery: Some(Arc::new(discovery)),
            ..Self::new(urls)
        }
    }

    /// Returns the currently known URLs.
    pub fn urls(&self) -> Arc<Vec<Url>> {
        self.urls.load_full()
    }

    /// Returns a base URL chosen uniformly at random from the known set.
    ///
    /// Runs a discovery refresh first if discovery is enabled and the gate is free.
    pub async fn select_service_url(&self) -> Result<Url, RegistryError> {
        if let Some(discovery) = &self.discovery {
            self.refresh(discovery).await;
        }

        let urls = self.urls.load();
        if urls.is_empty() {
            tracing::error!("No registry service URLs configured or discovered");
            return Err(RegistryError::NoServiceUrls);
        }
        let index = rand::rng().random_range(0..urls.len());
        Ok(urls[index].clone())
    }

    async fn refresh(&self, discovery: &DnsDiscovery) {
        let Some(gate) = GateGuard::claim(&self.gate) else {
            return;
        };

        match discovery.discover().await {
            Ok((urls, ttl)) if !urls.is_empty() => {
                tracing::info!(servers = urls.len(), ?ttl, "Discovered registry servers");
                self.urls.store(Arc::new(urls));
                gate.hold_for(ttl);
            }
            Ok(_) => {
                tracing::warn!("DNS discovery found no registry servers, keeping known URLs");
            }
            Err(e) => {
                tracing::warn!(err = %e, "DNS discovery failed, keeping known URLs");
            }
        }
    }
}

/// A claimed discovery gate. Released on drop unless handed to [`GateGuard::hold_for`].
struct GateGuard {
    gate: Option<Arc<AtomicBool>>,
}

impl GateGuard {
    fn claim(gate: &Arc<AtomicBool>) -> Option<Self> {
        gate.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                gate: Some(gate.clone()),
            })
    }

    /// Keeps the gate claimed for `ttl`, counted from now.
    fn hold_for(mut self, ttl: Duration) {
        if let Some(gate) = self.gate.take() {
            let release_at = Instant::now() + ttl;
            tokio::spawn(async move {
                tokio::time::sleep_until(release_at).await;
                gate.store(false, Ordering::Release);
                tracing::debug!("Discovery gate released");
            });
        }
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use eureka_sdk_utils::backoff::ExponentialBackoff;

    use super::*;
    use crate::discovery::{DiscoveryError, MockTxtResolver, RegionSource, TxtRecords};

    const TTL: Duration = Duration::from_secs(90);

    fn urls(urls: &[&str]) -> Vec<Url> {
        urls.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    /// Discovery answering with the hosts returned by `hosts`, counting region lookups.
    fn discovery(
        hosts: impl Fn(usize) -> Result<Vec<&'static str>, ()> + Send + Sync + 'static,
    ) -> (Arc<AtomicUsize>, DnsDiscovery) {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let r = refreshes.clone();
        let mut resolver = MockTxtResolver::new();
        resolver.expect_lookup_txt().returning(move |name: &str| {
            if name == "txt.eu-west-1.example.com." {
                let n = r.fetch_add(1, Ordering::SeqCst);
                return match hosts(n) {
                    Ok(_) => {
                        Ok(TxtRecords {
                            records: vec![format!("zone{n}.example.com")],
                            ttl: TTL,
                        })
                    }
                    Err(()) => Err(DiscoveryError::NoRecords(name.to_string())),
                };
            }
            let n: usize = name
                .trim_start_matches("txt.zone")
                .trim_end_matches(".example.com.")
                .parse()
                .unwrap();
            Ok(TxtRecords {
                records: hosts(n).unwrap().into_iter().map(str::to_string).collect(),
                ttl: TTL,
            })
        });
        let discovery = DnsDiscovery::new(
            Arc::new(resolver),
            "example.com",
            8080,
            "eureka/v2",
            RegionSource::Fixed("eu-west-1".to_string()),
        )
        .with_retry(ExponentialBackoff::new(1.0, 1.0, 1.0, 0.0), Duration::ZERO);
        (refreshes, discovery)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn picks_every_known_url() {
        let selector = ServiceUrlSelector::new(urls(&[
            "http://a:8080/eureka/v2",
            "http://b:8080/eureka/v2",
            "http://c:8080/eureka/v2",
        ]));

        let mut seen = HashSet::new();
        for _ in 0..300 {
            seen.insert(selector.select_service_url().await.unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    #[test_log::test]
    async fn empty_set_is_an_error() {
        let selector = ServiceUrlSelector::new(Vec::new());
        assert!(matches!(
            selector.select_service_url().await,
            Err(RegistryError::NoServiceUrls)
        ));
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn refreshes_at_most_once_per_ttl() {
        let (refreshes, discovery) = discovery(|_| Ok(vec!["10.0.0.1"]));
        let selector = ServiceUrlSelector::with_discovery(Vec::new(), discovery);

        for _ in 0..5 {
            let url = selector.select_service_url().await.unwrap();
            assert_eq!(url.as_str(), "http://10.0.0.1:8080/eureka/v2");
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        settle().await;
        selector.select_service_url().await.unwrap();
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        selector.select_service_url().await.unwrap();
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn gate_is_released_one_ttl_after_the_refresh() {
        let (refreshes, discovery) = discovery(|_| Ok(vec!["10.0.0.1"]));
        let selector = ServiceUrlSelector::with_discovery(Vec::new(), discovery);

        selector.select_service_url().await.unwrap();
        // Let the full TTL pass before the release task gets to run.
        tokio::time::advance(TTL).await;
        settle().await;

        selector.select_service_url().await.unwrap();
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn concurrent_callers_share_one_refresh() {
        let (refreshes, discovery) = discovery(|_| Ok(vec!["10.0.0.1", "10.0.0.2"]));
        let selector = Arc::new(ServiceUrlSelector::with_discovery(
            urls(&["http://static:8080/eureka/v2"]),
            discovery,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let selector = selector.clone();
                tokio::spawn(async move { selector.select_service_url().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(selector.urls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn failed_refresh_keeps_urls_and_releases_gate() {
        let (refreshes, discovery) = discovery(|_| Err(()));
        let selector = ServiceUrlSelector::with_discovery(
            urls(&["http://static:8080/eureka/v2"]),
            discovery,
        );

        for i in 1..=3 {
            let url = selector.select_service_url().await.unwrap();
            assert_eq!(url.host_str(), Some("static"));
            assert_eq!(refreshes.load(Ordering::SeqCst), i);
        }
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn empty_refresh_counts_as_failure() {
        let (refreshes, discovery) =
            discovery(|n| if n == 0 { Ok(vec![]) } else { Ok(vec!["10.0.0.7"]) });
        let selector = ServiceUrlSelector::with_discovery(
            urls(&["http://static:8080/eureka/v2"]),
            discovery,
        );

        let url = selector.select_service_url().await.unwrap();
        assert_eq!(url.host_str(), Some("static"));

        let url = selector.select_service_url().await.unwrap();
        assert_eq!(url.host_str(), Some("10.0.0.7"));
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn refresh_failure_with_nothing_known_is_an_error() {
        let (_, discovery) = discovery(|_| Err(()));
        let selector = ServiceUrlSelector::with_discovery(Vec::new(), discovery);
        assert!(matches!(
            selector.select_service_url().await,
            Err(RegistryError::NoServiceUrls)
        ));
    }
}
