//! External time reference and the deduplicating fetch in front of it.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// A reference wall-clock reading anchored on device uptime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceTime {
    pub time: DateTime<Utc>,
    pub uptime: Duration,
}

impl ReferenceTime {
    pub fn new(time: DateTime<Utc>, uptime: Duration) -> Self {
        Self { time, uptime }
    }

    /// Reference time at the given device uptime.
    pub fn now(&self, uptime: Duration) -> DateTime<Utc> {
        let elapsed = uptime.saturating_sub(self.uptime);
        self.time + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Age at the given uptime; `None` when the uptime precedes the capture.
    pub fn age(&self, uptime: Duration) -> Option<Duration> {
        uptime.checked_sub(self.uptime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeReferenceError {
    #[error("i/o error: {0}")]
    Io(String),
    #[error("time reference request timed out")]
    Timeout,
    #[error("invalid time reference response: {0}")]
    InvalidResponse(&'static str),
    #[error("time reference server is not synchronized")]
    Unsynchronized,
    #[error("shared time reference fetch was abandoned")]
    Abandoned,
}

impl From<std::io::Error> for TimeReferenceError {
    fn from(err: std::io::Error) -> Self {
        TimeReferenceError::Io(err.to_string())
    }
}

pub type FetchResult = Result<ReferenceTime, TimeReferenceError>;

/// An NTP-like source of reference time.
pub trait TimeReferenceClient: Send + Sync {
    fn fetch(&self) -> impl Future<Output = FetchResult> + Send;
}

#[derive(Debug, Default)]
struct FetchState {
    cached: Option<ReferenceTime>,
    in_flight: Option<broadcast::Sender<FetchResult>>,
}

/// Fetch-if-needed front for a [`TimeReferenceClient`].
///
/// A recent successful result is served from cache. Otherwise at most one
/// fetch runs at a time and every caller arriving meanwhile receives its
/// result.
pub struct ReferenceFetcher<C> {
    client: C,
    max_age: Duration,
    state: Mutex<FetchState>,
}

impl<C: TimeReferenceClient> ReferenceFetcher<C> {
    pub fn new(client: C, max_age: Duration) -> Self {
        Self {
            client,
            max_age,
            state: Mutex::new(FetchState::default()),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cached(&self) -> Option<ReferenceTime> {
        self.lock().cached
    }

    pub async fn fetch_if_needed(&self, uptime: Duration) -> FetchResult {
        let waiter = {
            let mut state = self.lock();
            if let Some(cached) = state.cached {
                if cached.age(uptime).is_some_and(|age| age < self.max_age) {
                    debug!("serving cached reference time");
                    return Ok(cached);
                }
            }

            match &state.in_flight {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    state.in_flight = Some(sender);
                    None
                }
            }
        };

        if let Some(mut receiver) = waiter {
            debug!("joining reference time fetch already in flight");
            return receiver
                .recv()
                .await
                .unwrap_or(Err(TimeReferenceError::Abandoned));
        }

        let mut guard = InFlightGuard { fetcher: self, armed: true };
        let result = self.client.fetch().await;
        guard.armed = false;

        let sender = {
            let mut state = self.lock();
            if let Ok(reference) = &result {
                state.cached = Some(*reference);
            }
            state.in_flight.take()
        };
        if let Some(sender) = sender {
            // No receivers is fine: nobody else was waiting.
            let _ = sender.send(result.clone());
        }

        result
    }

    fn lock(&self) -> MutexGuard<'_, FetchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases waiters when the leading fetch is dropped before completing.
struct InFlightGuard<'a, C: TimeReferenceClient> {
    fetcher: &'a ReferenceFetcher<C>,
    armed: bool,
}

impl<C: TimeReferenceClient> Drop for InFlightGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            // Dropping the sender closes the channel; waiters see `Abandoned`.
            self.fetcher.lock().in_flight.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        fetches: AtomicUsize,
    }

    impl TimeReferenceClient for CountingClient {
        async fn fetch(&self) -> FetchResult {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
            Ok(ReferenceTime::new(time, Duration::from_secs(10)))
        }
    }

    #[test]
    fn test_reference_now_advances_with_uptime() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let reference = ReferenceTime::new(time, Duration::from_secs(100));
        assert_eq!(reference.now(Duration::from_secs(130)), time + chrono::Duration::seconds(30));
        // Uptime before capture never moves the reference backwards.
        assert_eq!(reference.now(Duration::from_secs(50)), time);
        assert_eq!(reference.age(Duration::from_secs(50)), None);
    }

    #[tokio::test]
    async fn test_cache_expires_after_max_age() {
        let fetcher = ReferenceFetcher::new(
            CountingClient { fetches: AtomicUsize::new(0) },
            Duration::from_secs(300),
        );

        fetcher.fetch_if_needed(Duration::from_secs(10)).await.unwrap();
        fetcher.fetch_if_needed(Duration::from_secs(200)).await.unwrap();
        assert_eq!(fetcher.client().fetches.load(Ordering::SeqCst), 1);

        fetcher.fetch_if_needed(Duration::from_secs(310)).await.unwrap();
        assert_eq!(fetcher.client().fetches.load(Ordering::SeqCst), 2);
    }
}
