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
//! Coalescing update streams.
//!
//! Updates are published into a single slot that always holds the newest update not yet taken
//! by the consumer. Publishing never waits for the consumer. A consumer that falls behind skips
//! straight to the most recent update.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    error::RegistryError,
    model::{Application, Instance},
    schedule::schedule,
};

/// Outcome of a scheduled application fetch.
pub type AppUpdate = Result<Application, Arc<RegistryError>>;

/// Outcome of a scheduled instance query.
pub type InstanceSetUpdate = Result<Vec<Arc<Instance>>, Arc<RegistryError>>;

/// Receiving end of a coalescing update stream.
///
/// The background task stops when the cancellation token passed at creation fires or when the
/// stream is dropped.
#[derive(Debug)]
pub struct UpdateStream<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> UpdateStream<T> {
    /// Waits for the next update.
    ///
    /// Returns `None` once the background task has stopped and the last update was taken.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(update) = self.rx.borrow_and_update().clone() {
                return Some(update);
            }
        }
    }
}

impl<V, E> UpdateStream<Result<V, Arc<E>>>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Starts publishing the outcome of `produce` every `period`.
    ///
    /// With `await_first`, one fetch completes and is published before this returns.
    pub(crate) async fn start<P, Fut>(
        period: Duration,
        mut produce: P,
        await_first: bool,
        cancel: CancellationToken,
    ) -> Self
    where
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        if await_first {
            tx.send_replace(Some(produce().await.map_err(Arc::new)));
        }

        let tx = Arc::new(tx);
        let publish = tx.clone();
        let ticks = schedule(
            period,
            produce,
            move |result| {
                publish.send_replace(Some(result.map_err(Arc::new)));
            },
            cancel,
        );
        tokio::spawn(async move {
            tokio::select! {
                _ = ticks => tracing::debug!("Update stream cancelled"),
                _ = tx.closed() => tracing::debug!("Update stream dropped by all receivers"),
            }
        });

        Self { rx }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const PERIOD: Duration = Duration::from_secs(30);

    async fn tick() {
        tokio::time::advance(PERIOD).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    /// Producer yielding 0, 1, 2, ... and failing on every fifth call.
    fn counter() -> (
        Arc<AtomicUsize>,
        impl FnMut() -> std::future::Ready<Result<usize, String>> + Send + 'static,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let produce = move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n % 5 == 4 { Err(format!("fail {n}")) } else { Ok(n) })
        };
        (calls, produce)
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn await_first_is_available_immediately() {
        let (_, produce) = counter();
        let cancel = CancellationToken::new();
        let mut stream = UpdateStream::start(PERIOD, produce, true, cancel.clone()).await;
        assert_eq!(stream.recv().await.unwrap().unwrap(), 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn slow_consumer_sees_only_latest() {
        let (calls, produce) = counter();
        let cancel = CancellationToken::new();
        let mut stream = UpdateStream::start(PERIOD, produce, false, cancel.clone()).await;

        for _ in 0..3 {
            tick().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3, "producer never waits on the consumer");
        assert_eq!(stream.recv().await.unwrap().unwrap(), 2);

        tick().await;
        tick().await;
        let err = stream.recv().await.unwrap().unwrap_err();
        assert_eq!(*err, "fail 4");

        cancel.cancel();
        tokio::task::yield_now().await;
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn pending_update_survives_cancellation() {
        let (_, produce) = counter();
        let cancel = CancellationToken::new();
        let mut stream = UpdateStream::start(PERIOD, produce, false, cancel.clone()).await;

        tick().await;
        cancel.cancel();
        tick().await;

        assert_eq!(stream.recv().await.unwrap().unwrap(), 0);
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn dropping_the_stream_stops_the_task() {
        let (calls, produce) = counter();
        let stream = UpdateStream::start(PERIOD, produce, false, CancellationToken::new()).await;

        tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(stream);
        tick().await;
        tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
