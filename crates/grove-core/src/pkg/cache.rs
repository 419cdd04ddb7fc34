//! Session-scoped packument cache.
//!
//! One fetch per package name: concurrent callers share the in-flight
//! request and observe the same result. Successes live for the cache's
//! lifetime; failures are dropped so the next caller retries.

use super::error::PkgError;
use super::manifest::Packument;
use super::registry::Fetcher;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Default bound on concurrent packument fetches.
pub const DEFAULT_CONCURRENCY: usize = 32;

type FetchResult = Result<Arc<Packument>, PkgError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

enum Slot {
    Ready(Arc<Packument>),
    InFlight { generation: u64, fetch: SharedFetch },
}

/// Packument cache with in-flight de-duplication.
pub struct PackumentCache {
    fetcher: Arc<dyn Fetcher>,
    slots: Mutex<HashMap<String, Slot>>,
    fetches: Arc<AtomicUsize>,
    generation: AtomicU64,
    concurrency: usize,
}

impl fmt::Debug for PackumentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackumentCache")
            .field("fetcher", &self.fetcher)
            .field("fetches", &self.fetch_count())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl PackumentCache {
    /// Create an empty cache in front of `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            slots: Mutex::new(HashMap::new()),
            fetches: Arc::new(AtomicUsize::new(0)),
            generation: AtomicU64::new(0),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Bound concurrent fetches issued by [`Self::prefetch`].
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Number of calls made to the underlying fetcher.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Fetch the packument for `name`, at most once per name.
    ///
    /// # Errors
    /// Returns the fetcher's `NotFound` or `RegistryError` unchanged.
    pub async fn fetch(&self, name: &str) -> FetchResult {
        let (generation, fetch) = {
            let mut slots = self.slots.lock().await;
            match slots.get(name) {
                Some(Slot::Ready(packument)) => return Ok(Arc::clone(packument)),
                Some(Slot::InFlight { generation, fetch }) => (*generation, fetch.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let fetch = self.start(name);
                    slots.insert(
                        name.to_string(),
                        Slot::InFlight {
                            generation,
                            fetch: fetch.clone(),
                        },
                    );
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut slots = self.slots.lock().await;
        let current = matches!(
            slots.get(name),
            Some(Slot::InFlight { generation: g, .. }) if *g == generation
        );
        if current {
            match &result {
                Ok(packument) => {
                    slots.insert(name.to_string(), Slot::Ready(Arc::clone(packument)));
                }
                Err(e) => {
                    debug!(name = %name, error = %e, "packument fetch failed");
                    slots.remove(name);
                }
            }
        }
        result
    }

    fn start(&self, name: &str) -> SharedFetch {
        let fetcher = Arc::clone(&self.fetcher);
        let fetches = Arc::clone(&self.fetches);
        let name = name.to_string();
        async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            fetcher.packument(&name).await.map(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Fetch many names concurrently, bounded by the configured concurrency.
    ///
    /// Results come back in completion order.
    pub async fn prefetch<I>(&self, names: I) -> Vec<(String, FetchResult)>
    where
        I: IntoIterator<Item = String>,
    {
        stream::iter(names)
            .map(|name| async move {
                let result = self.fetch(&name).await;
                (name, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}
