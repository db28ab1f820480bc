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
//! Periodic fetching.

use std::{future::Future, time::Duration};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Calls `produce` once per `period` and hands every result to `consume`, until `cancel` fires.
///
/// The first call happens one period after `schedule` is called, not after the returned future
/// is first polled. Cancellation is only observed between ticks: a `produce` call in flight
/// completes and its result is still consumed. When a tick and cancellation are ready at the
/// same time, cancellation wins.
pub fn schedule<T, E, P, Fut, C>(
    period: Duration,
    mut produce: P,
    mut consume: C,
    cancel: CancellationToken,
) -> impl Future<Output = ()>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(Result<T, E>),
{
    let start = Instant::now() + period;
    async move {
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let result = produce().await;
                    consume(result);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    const PERIOD: Duration = Duration::from_secs(30);

    /// Lets spawned tasks run until they block on the timer again.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn produces_once_per_period() {
        let calls = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let calls = calls.clone();
            let results = results.clone();
            let cancel = cancel.clone();
            async move {
                schedule(
                    PERIOD,
                    || {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if n % 2 == 0 { Ok(n) } else { Err(format!("fail {n}")) }
                        }
                    },
                    |res| results.lock().unwrap().push(res),
                    cancel,
                )
                .await
            }
        });

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0, "no call before the first period");

        tokio::time::advance(PERIOD).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        for _ in 0..2 {
            tokio::time::advance(PERIOD).await;
            settle().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        cancel.cancel();
        task.await.unwrap();

        tokio::time::advance(PERIOD * 3).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *results.lock().unwrap(),
            vec![Ok(0), Err("fail 1".to_string()), Ok(2)]
        );
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn in_flight_result_is_delivered_after_cancel() {
        let consumed = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let inner_cancel = cancel.clone();
        let c = consumed.clone();
        let task = tokio::spawn(schedule(
            PERIOD,
            move || {
                let inner_cancel = inner_cancel.clone();
                async move {
                    // Cancel while this call is running.
                    inner_cancel.cancel();
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, ()>(())
                }
            },
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            cancel.clone(),
        ));

        tokio::time::advance(PERIOD).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        task.await.unwrap();
        assert_eq!(consumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn period_is_measured_from_the_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let c = calls.clone();
        let ticks = schedule(
            PERIOD,
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ()>(()) }
            },
            |_| {},
            cancel.clone(),
        );

        // The future is not polled until a full period has passed.
        tokio::time::advance(PERIOD).await;
        let task = tokio::spawn(ticks);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn cancelled_before_first_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let c = calls.clone();
        schedule(
            PERIOD,
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ()>(()) }
            },
            |_| {},
            cancel,
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
