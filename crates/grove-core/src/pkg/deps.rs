//! Declared dependency edges.
//!
//! Reads `package.json` files and turns manifest dependency sections into an
//! ordered list of [`PackageSpec`]s.

use super::error::{codes, PkgError};
use super::manifest::{Manifest, VersionManifest};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// Dependency sections checked for shape errors, in manifest order.
const SECTIONS: [&str; 4] = [
    "dependencies",
    "devDependencies",
    "optionalDependencies",
    "peerDependencies",
];

/// Which section an edge was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DepKind {
    Prod,
    Dev,
    Optional,
    Peer,
    PeerOptional,
}

impl DepKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Dev => "dev",
            Self::Optional => "optional",
            Self::Peer => "peer",
            Self::PeerOptional => "peerOptional",
        }
    }

    #[must_use]
    pub fn is_peer(self) -> bool {
        matches!(self, Self::Peer | Self::PeerOptional)
    }

    /// Missing targets of these kinds are not errors.
    #[must_use]
    pub fn is_optional(self) -> bool {
        matches!(self, Self::Optional | Self::PeerOptional)
    }

    /// Manifest section this kind is written to.
    #[must_use]
    pub fn section(self) -> &'static str {
        match self {
            Self::Prod => "dependencies",
            Self::Dev => "devDependencies",
            Self::Optional => "optionalDependencies",
            Self::Peer | Self::PeerOptional => "peerDependencies",
        }
    }
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to resolve one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageSpec {
    pub name: String,
    /// Range, tag, or any other spec string as declared.
    pub range: String,
    pub kind: DepKind,
}

impl PackageSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, range: impl Into<String>, kind: DepKind) -> Self {
        Self {
            name: name.into(),
            range: range.into(),
            kind,
        }
    }
}

/// Which optional sections [`load_edges`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeOptions {
    pub include_dev: bool,
    pub include_optional: bool,
    pub include_peer: bool,
}

impl EdgeOptions {
    /// Every section: what the root of a tree declares.
    #[must_use]
    pub fn all() -> Self {
        Self {
            include_dev: true,
            include_optional: true,
            include_peer: true,
        }
    }

    /// What an installed package declares: everything but dev.
    #[must_use]
    pub fn transitive() -> Self {
        Self {
            include_dev: false,
            include_optional: true,
            include_peer: true,
        }
    }
}

/// Collect declared edges from a manifest.
///
/// Order is dependencies, optionalDependencies, devDependencies,
/// peerDependencies, each in manifest key order. The first occurrence of a
/// name wins.
#[must_use]
pub fn load_edges(manifest: &VersionManifest, options: EdgeOptions) -> Vec<PackageSpec> {
    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    let mut push = |name: &String, range: &String, kind: DepKind| {
        if seen.insert(name.clone()) {
            edges.push(PackageSpec::new(name.clone(), range.clone(), kind));
        }
    };

    for (name, range) in &manifest.dependencies {
        push(name, range, DepKind::Prod);
    }
    if options.include_optional {
        for (name, range) in &manifest.optional_dependencies {
            push(name, range, DepKind::Optional);
        }
    }
    if options.include_dev {
        for (name, range) in &manifest.dev_dependencies {
            push(name, range, DepKind::Dev);
        }
    }
    if options.include_peer {
        for (name, range) in &manifest.peer_dependencies {
            let optional = manifest
                .peer_dependencies_meta
                .get(name)
                .is_some_and(|m| m.optional);
            let kind = if optional {
                DepKind::PeerOptional
            } else {
                DepKind::Peer
            };
            push(name, range, kind);
        }
    }

    edges
}

/// A manifest read from disk plus the entries that had to be dropped.
#[derive(Debug, Clone, Default)]
pub struct LoadedManifest {
    pub manifest: Manifest,
    /// Errors encountered during extraction.
    pub errors: Vec<PkgDepError>,
}

/// Error encountered while extracting a dependency.
#[derive(Debug, Clone)]
pub struct PkgDepError {
    /// Package name (if known).
    pub name: String,
    /// Error code.
    pub code: &'static str,
    /// Error message.
    pub message: String,
}

impl PkgDepError {
    /// Create a new dependency error.
    #[must_use]
    pub fn new(name: impl Into<String>, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code,
            message: message.into(),
        }
    }

    /// Create an invalid range error.
    #[must_use]
    pub fn invalid_range(name: &str, actual_type: &str) -> Self {
        Self::new(
            name,
            codes::PKG_DEP_RANGE_INVALID,
            format!("expected string, got {actual_type}"),
        )
    }

    /// Create an invalid section error.
    #[must_use]
    pub fn invalid_section(section: &str, actual_type: &str) -> Self {
        Self::new(
            section,
            codes::PKG_PACKAGE_JSON_INVALID,
            format!("'{section}' must be an object, got {actual_type}"),
        )
    }
}

/// Read a package.json file.
///
/// Malformed dependency entries are dropped and reported in
/// [`LoadedManifest::errors`] rather than failing the whole read.
///
/// # Errors
/// Returns `PkgError` if the file cannot be read or parsed as a JSON object.
pub fn read_manifest(package_json_path: &Path) -> Result<LoadedManifest, PkgError> {
    let content = match fs::read_to_string(package_json_path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PkgError::package_json_not_found(package_json_path));
        }
        Err(e) => return Err(PkgError::package_json_invalid(format!("Failed to read: {e}"))),
    };

    let pkg_json: Value = serde_json::from_str(&content)
        .map_err(|e| PkgError::package_json_invalid(format!("Invalid JSON: {e}")))?;

    let root = pkg_json
        .as_object()
        .ok_or_else(|| PkgError::package_json_invalid("package.json must be a JSON object"))?;

    let mut errors = Vec::new();
    for section in SECTIONS {
        check_section(root, section, &mut errors);
    }

    let manifest: Manifest = serde_json::from_value(pkg_json)
        .map_err(|e| PkgError::package_json_invalid(format!("Invalid manifest: {e}")))?;

    Ok(LoadedManifest { manifest, errors })
}

/// Record shape errors in one dependency section.
fn check_section(
    root: &serde_json::Map<String, Value>,
    section: &str,
    errors: &mut Vec<PkgDepError>,
) {
    let Some(section_value) = root.get(section) else {
        return;
    };

    let Some(section_obj) = section_value.as_object() else {
        errors.push(PkgDepError::invalid_section(
            section,
            json_type_name(section_value),
        ));
        return;
    };

    for (name, range_value) in section_obj {
        if !range_value.is_string() {
            errors.push(PkgDepError::invalid_range(
                name,
                json_type_name(range_value),
            ));
        }
    }
}

/// Get a human-readable type name for a JSON value.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
