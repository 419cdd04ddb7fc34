//! In-memory registry for tests.

use super::error::PkgError;
use super::manifest::{Packument, VersionManifest};
use super::registry::Fetcher;
use super::version::parse_version;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A `Fetcher` serving packuments from memory and counting calls.
#[derive(Debug, Default)]
pub struct MockRegistry {
    packuments: HashMap<String, Packument>,
    failures: HashMap<String, PkgError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `name@version` with prod dependencies. `latest` follows the
    /// highest stable version unless set with [`Self::tag`].
    pub fn publish(self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
        let mut manifest = VersionManifest::new(name, version);
        for (dep, range) in deps {
            manifest = manifest.with_dependency(dep, range);
        }
        self.publish_manifest(manifest)
    }

    pub fn publish_manifest(mut self, mut manifest: VersionManifest) -> Self {
        let name = manifest.name.clone();
        let version = manifest.version.clone();
        if manifest.dist.tarball.is_none() {
            manifest.dist.tarball = Some(format!(
                "https://registry.test/{name}/-/{name}-{version}.tgz"
            ));
            manifest.dist.integrity = Some(format!("sha512-{name}-{version}"));
        }

        let packument = self.packuments.entry(name.clone()).or_insert_with(|| Packument {
            name: name.clone(),
            ..Packument::default()
        });
        packument.versions.insert(version.clone(), manifest);

        let new = parse_version(&version).unwrap();
        let replace = new.pre.is_empty()
            && packument
                .latest()
                .and_then(parse_version)
                .map_or(true, |current| new > current);
        if replace {
            packument.dist_tags.insert("latest".to_string(), version);
        }
        self
    }

    pub fn tag(mut self, name: &str, tag: &str, version: &str) -> Self {
        if let Some(packument) = self.packuments.get_mut(name) {
            packument
                .dist_tags
                .insert(tag.to_string(), version.to_string());
        }
        self
    }

    pub fn fail(mut self, name: &str, error: PkgError) -> Self {
        self.failures.insert(name.to_string(), error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|n| *n == name).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockRegistry {
    fn packument<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Packument, PkgError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(name.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(err) = self.failures.get(name) {
                return Err(err.clone());
            }
            self.packuments
                .get(name)
                .cloned()
                .ok_or_else(|| PkgError::not_found(name))
        })
    }
}
