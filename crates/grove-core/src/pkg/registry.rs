//! npm registry client.

use super::error::PkgError;
use super::manifest::Packument;
use super::spec::url_encoded_name;
use crate::version::user_agent;
use futures::future::BoxFuture;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override registry URL.
pub const REGISTRY_ENV: &str = "GROVE_NPM_REGISTRY";

/// Abbreviated-metadata accept header; full documents are accepted as fallback.
const CORGI_ACCEPT: &str =
    "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

/// Source of packuments.
///
/// The resolver only ever talks to a `Fetcher`, so tests substitute an
/// in-memory registry.
pub trait Fetcher: Send + Sync + std::fmt::Debug {
    /// Fetch the packument for `name`.
    ///
    /// Implementations map a 404 to `NotFound` and every other failure to
    /// `RegistryError`.
    fn packument<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Packument, PkgError>>;
}

/// Registry client for fetching package metadata.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        // a base without trailing slash would drop its last path segment on join
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent())
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { base_url, http })
    }

    /// URL of the packument document for `name`.
    ///
    /// # Errors
    /// Returns an error if the name cannot be joined onto the base URL.
    pub fn packument_url(&self, name: &str) -> Result<Url, PkgError> {
        self.base_url
            .join(&url_encoded_name(name))
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))
    }

    /// Fetch and decode the packument for a package.
    ///
    /// # Errors
    /// Returns `NotFound` on 404 and `RegistryError` for any other failure.
    pub async fn fetch_packument(&self, name: &str) -> Result<Packument, PkgError> {
        let url = self.packument_url(name)?;
        debug!(name = %name, url = %url, "fetching packument");

        let response = self
            .http
            .get(url.as_str())
            .header(reqwest::header::ACCEPT, CORGI_ACCEPT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PkgError::not_found(name));
        }

        if !response.status().is_success() {
            return Err(PkgError::registry(format!(
                "Registry returned status {} for '{name}'",
                response.status()
            )));
        }

        let body = response.bytes().await?;
        let mut packument: Packument = serde_json::from_slice(&body)
            .map_err(|e| PkgError::registry(format!("Invalid packument for '{name}': {e}")))?;
        if packument.name.is_empty() {
            packument.name = name.to_string();
        }
        Ok(packument)
    }
}

impl Fetcher for RegistryClient {
    fn packument<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Packument, PkgError>> {
        Box::pin(self.fetch_packument(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::ErrorKind;

    #[test]
    fn test_client_creation() {
        let client = RegistryClient::new(DEFAULT_REGISTRY);
        assert!(client.is_ok());
    }

    #[test]
    fn test_client_invalid_url() {
        let client = RegistryClient::new("not-a-url");
        assert!(client.is_err());
    }

    #[test]
    fn test_packument_url_encodes_scope() {
        let client = RegistryClient::new("http://localhost:4873/npm").unwrap();
        assert_eq!(
            client.packument_url("@types/node").unwrap().as_str(),
            "http://localhost:4873/npm/@types%2Fnode"
        );
        assert_eq!(
            client.packument_url("react").unwrap().as_str(),
            "http://localhost:4873/npm/react"
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_registry_error() {
        // port 9 (discard) is never an npm registry
        let client = RegistryClient::new("http://127.0.0.1:9/").unwrap();
        let err = client.fetch_packument("left-pad").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegistryError);
    }
}
