//! Typed registry metadata and manifest records.
//!
//! Packuments come from the registry and manifests from `package.json`; both
//! share [`VersionManifest`]. Dependency maps keep declaration order so edge
//! discovery is deterministic.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A root `package.json` shares the shape of a published version manifest.
pub type Manifest = VersionManifest;

/// Distribution metadata for one published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
}

/// Per-peer metadata from `peerDependenciesMeta`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMeta {
    #[serde(default)]
    pub optional: bool,
}

/// One published version's declared edges and dist metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "string_map")]
    pub dependencies: IndexMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    pub dev_dependencies: IndexMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    pub optional_dependencies: IndexMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    pub peer_dependencies: IndexMap<String, String>,
    #[serde(default, deserialize_with = "peer_meta_map")]
    pub peer_dependencies_meta: IndexMap<String, PeerMeta>,
    #[serde(default)]
    pub dist: Dist,
    #[serde(default, deserialize_with = "string_map")]
    pub scripts: IndexMap<String, String>,
    #[serde(default)]
    pub has_install_script: bool,
}

impl VersionManifest {
    /// Create a bare manifest with a name and version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Builder helper for tests and fixtures.
    #[must_use]
    pub fn with_dependency(mut self, name: &str, range: &str) -> Self {
        self.dependencies.insert(name.to_string(), range.to_string());
        self
    }

    /// Whether installing this version runs an install-time script.
    #[must_use]
    pub fn has_install_script(&self) -> bool {
        self.has_install_script
            || ["preinstall", "install", "postinstall"]
                .iter()
                .any(|s| self.scripts.contains_key(*s))
    }

    /// Integrity digest, falling back to the legacy sha1 shasum.
    #[must_use]
    pub fn integrity(&self) -> Option<String> {
        self.dist
            .integrity
            .clone()
            .or_else(|| self.dist.shasum.as_ref().map(|s| format!("sha1-{s}")))
    }
}

/// Registry metadata for one package name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packument {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "dist-tags", default, deserialize_with = "string_map")]
    pub dist_tags: IndexMap<String, String>,
    #[serde(default)]
    pub versions: IndexMap<String, VersionManifest>,
}

impl Packument {
    /// Version the `latest` dist-tag points at.
    #[must_use]
    pub fn latest(&self) -> Option<&str> {
        self.dist_tags.get("latest").map(String::as_str)
    }

    /// All published version strings in registry order.
    pub fn version_keys(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }
}

/// Accept an object of strings; drop non-string values and non-object sections.
///
/// Old registry documents carry arrays or nulls in dependency slots; those
/// declare nothing rather than poisoning the whole packument.
fn string_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        _ => IndexMap::new(),
    })
}

fn peer_meta_map<'de, D>(deserializer: D) -> Result<IndexMap<String, PeerMeta>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let optional = v
                    .get("optional")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                (k, PeerMeta { optional })
            })
            .collect(),
        _ => IndexMap::new(),
    })
}
