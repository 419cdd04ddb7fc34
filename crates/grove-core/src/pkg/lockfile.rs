//! Lockfile encoding, decoding and migration.
//!
//! ## File Format
//!
//! Lockfiles are written in the version 2 shape: a flat `packages` map keyed
//! by install location, root first under `""`.
//!
//! ```json
//! {
//!   "name": "my-project",
//!   "version": "1.0.0",
//!   "lockfileVersion": 2,
//!   "requires": true,
//!   "packages": {
//!     "": { "name": "my-project", "dependencies": { "a": "^1.0.0" } },
//!     "node_modules/a": { "version": "1.2.0", "resolved": "...", "integrity": "..." }
//!   }
//! }
//! ```
//!
//! Version 1 files (nested `dependencies` blocks with `requires`) are migrated
//! to the same in-memory shape on read. Version 3 files are read like
//! version 2.

use super::deps::{DepKind, EdgeOptions, PackageSpec};
use super::error::PkgError;
use super::manifest::{Manifest, PeerMeta};
use super::spec::ParsedSpec;
use super::tree::{DependencyGraph, NodeId, TreeNode};
use super::deps::load_edges;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lockfile version this crate writes.
pub const CURRENT_LOCKFILE_VERSION: u32 = 2;

/// Default lockfile name.
pub const PACKAGE_LOCK: &str = "package-lock.json";

/// Publishable lockfile name; takes precedence over [`PACKAGE_LOCK`].
pub const SHRINKWRAP: &str = "npm-shrinkwrap.json";

/// Lockfile kept inside `node_modules` describing what is installed.
pub const HIDDEN_LOCKFILE: &str = "node_modules/.package-lock.json";

/// How a graph relates to the lockfile it came from or is going to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileMeta {
    /// Shape the graph will be written in.
    pub lockfile_version: u32,
    /// Version found on disk; 0 when nothing was read.
    pub original_lockfile_version: u32,
    pub hidden_lockfile: bool,
    pub loaded_from_disk: bool,
    pub filename: String,
}

impl Default for LockfileMeta {
    fn default() -> Self {
        Self {
            lockfile_version: CURRENT_LOCKFILE_VERSION,
            original_lockfile_version: 0,
            hidden_lockfile: false,
            loaded_from_disk: false,
            filename: PACKAGE_LOCK.to_string(),
        }
    }
}

/// One entry of the `packages` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockPackage {
    /// Root name, or the real package name of an aliased install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub link: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dev: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub peer: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub extraneous: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_install_script: bool,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dev_dependencies: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub optional_dependencies: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub peer_dependencies: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub peer_dependencies_meta: IndexMap<String, PeerMeta>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !b
}

impl LockPackage {
    /// Declared edges in `load_edges` order.
    fn specs(&self) -> Vec<PackageSpec> {
        let mut specs = Vec::new();
        let sections = [
            (&self.dependencies, DepKind::Prod),
            (&self.optional_dependencies, DepKind::Optional),
            (&self.dev_dependencies, DepKind::Dev),
        ];
        for (section, kind) in sections {
            for (name, range) in section {
                specs.push(PackageSpec::new(name.clone(), range.clone(), kind));
            }
        }
        for (name, range) in &self.peer_dependencies {
            let kind = if self.peer_dependencies_meta.get(name).is_some_and(|m| m.optional) {
                DepKind::PeerOptional
            } else {
                DepKind::Peer
            };
            specs.push(PackageSpec::new(name.clone(), range.clone(), kind));
        }
        specs
    }

    fn record_edges(&mut self, node: &TreeNode) {
        for spec in node.specs() {
            let (name, range) = (spec.name.clone(), spec.range.clone());
            match spec.kind {
                DepKind::Prod => self.dependencies.insert(name, range),
                DepKind::Dev => self.dev_dependencies.insert(name, range),
                DepKind::Optional => self.optional_dependencies.insert(name, range),
                DepKind::Peer => self.peer_dependencies.insert(name, range),
                DepKind::PeerOptional => {
                    self.peer_dependencies_meta
                        .insert(name.clone(), PeerMeta { optional: true });
                    self.peer_dependencies.insert(name, range)
                }
            };
        }
    }
}

/// A version 1 `dependencies` entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDep {
    version: String,
    #[serde(default)]
    resolved: Option<String>,
    #[serde(default)]
    integrity: Option<String>,
    #[serde(default)]
    dev: bool,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    requires: IndexMap<String, String>,
    #[serde(default)]
    dependencies: IndexMap<String, LegacyDep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLockfile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    packages: Option<BTreeMap<String, LockPackage>>,
    #[serde(default)]
    dependencies: Option<IndexMap<String, LegacyDep>>,
}

/// Decode a lockfile into a graph.
///
/// # Errors
/// Returns `CorruptLockfile` for invalid JSON, an unknown `lockfileVersion`,
/// or entries that cannot be placed.
pub fn decode(raw: &str) -> Result<DependencyGraph, PkgError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| PkgError::corrupt_lockfile(format!("Invalid lockfile JSON: {e}")))?;
    if !value.is_object() {
        return Err(PkgError::corrupt_lockfile("lockfile must be a JSON object"));
    }

    let version = value
        .get("lockfileVersion")
        .and_then(Value::as_u64)
        .filter(|v| (1..=3).contains(v))
        .ok_or_else(|| {
            PkgError::corrupt_lockfile(format!(
                "unsupported lockfileVersion: {}",
                value.get("lockfileVersion").unwrap_or(&Value::Null)
            ))
        })?;

    let lock: RawLockfile = serde_json::from_value(value)
        .map_err(|e| PkgError::corrupt_lockfile(format!("Invalid lockfile: {e}")))?;

    let mut graph = match (&lock.packages, &lock.dependencies) {
        (Some(packages), _) if version >= 2 => decode_packages(&lock, packages)?,
        (_, Some(deps)) => decode_legacy(&lock, deps)?,
        (Some(packages), None) => decode_packages(&lock, packages)?,
        (None, None) => DependencyGraph::new(
            lock.name.clone().unwrap_or_default(),
            lock.version.clone().unwrap_or_default(),
        ),
    };

    graph.meta = LockfileMeta {
        lockfile_version: CURRENT_LOCKFILE_VERSION,
        // lockfileVersion was range-checked above
        original_lockfile_version: u32::try_from(version).unwrap_or(CURRENT_LOCKFILE_VERSION),
        ..LockfileMeta::default()
    };
    Ok(graph)
}

/// Decode a lockfile, taking root edges from the project manifest.
///
/// Version 1 files only record resolved versions for the root, so the
/// manifest is the authority for root ranges.
///
/// # Errors
/// Same as [`decode`].
pub fn decode_with_root(
    raw: &str,
    manifest: &Manifest,
    options: EdgeOptions,
) -> Result<DependencyGraph, PkgError> {
    let mut graph = decode(raw)?;
    let root = graph.root();

    let names: Vec<String> = graph[root].edges_out.keys().cloned().collect();
    for name in &names {
        graph.unlink(root, name);
    }
    graph[root].edges_out.clear();
    graph[root].name.clone_from(&manifest.name);
    graph[root].version.clone_from(&manifest.version);
    for spec in load_edges(manifest, options) {
        graph.add_edge(root, spec);
    }
    graph.link_visible();
    Ok(graph)
}

/// Final `node_modules/` segment of a location: the package name.
fn name_from_location(location: &str) -> Option<(&str, &str)> {
    let idx = location.rfind("node_modules/")?;
    let name = &location[idx + "node_modules/".len()..];
    let parent = location[..idx].trim_end_matches('/');
    if name.is_empty() {
        return None;
    }
    Some((parent, name))
}

fn decode_packages(
    lock: &RawLockfile,
    packages: &BTreeMap<String, LockPackage>,
) -> Result<DependencyGraph, PkgError> {
    let root_entry = packages.get("");
    let name = root_entry
        .and_then(|r| r.name.clone())
        .or_else(|| lock.name.clone())
        .unwrap_or_default();
    let version = root_entry
        .and_then(|r| r.version.clone())
        .or_else(|| lock.version.clone())
        .unwrap_or_default();
    let mut graph = DependencyGraph::new(name, version);
    let root = graph.root();
    if let Some(entry) = root_entry {
        for spec in entry.specs() {
            graph.add_edge(root, spec);
        }
    }

    // BTreeMap order places every parent before its children
    for (location, entry) in packages {
        if location.is_empty() {
            continue;
        }
        if entry.link || !location.starts_with("node_modules/") {
            debug!(location = %location, "skipping non-registry lockfile entry");
            continue;
        }
        let (parent_loc, name) = name_from_location(location).ok_or_else(|| {
            PkgError::corrupt_lockfile(format!("invalid package location '{location}'"))
        })?;
        let parent = graph.at_location(parent_loc).ok_or_else(|| {
            PkgError::corrupt_lockfile(format!(
                "'{location}' is nested under missing '{parent_loc}'"
            ))
        })?;
        let version = entry.version.as_deref().ok_or_else(|| {
            PkgError::corrupt_lockfile(format!("'{location}' has no version"))
        })?;

        let id = graph.place(parent, name, version);
        let node = &mut graph[id];
        node.resolved.clone_from(&entry.resolved);
        node.integrity.clone_from(&entry.integrity);
        node.package_name = entry.name.clone().filter(|n| n != name);
        node.dev = entry.dev;
        node.optional = entry.optional;
        node.peer = entry.peer;
        node.extraneous = entry.extraneous;
        node.has_install_script = entry.has_install_script;
        for spec in entry.specs() {
            graph.add_edge(id, spec);
        }
    }

    graph.link_visible();
    Ok(graph)
}

fn decode_legacy(
    lock: &RawLockfile,
    deps: &IndexMap<String, LegacyDep>,
) -> Result<DependencyGraph, PkgError> {
    let mut graph = DependencyGraph::new(
        lock.name.clone().unwrap_or_default(),
        lock.version.clone().unwrap_or_default(),
    );
    let root = graph.root();

    // root ranges are not recorded; pin each top-level package to its version
    for (name, dep) in deps {
        let kind = if dep.dev {
            DepKind::Dev
        } else if dep.optional {
            DepKind::Optional
        } else {
            DepKind::Prod
        };
        graph.add_edge(root, PackageSpec::new(name.clone(), dep.version.clone(), kind));
    }

    place_legacy(&mut graph, root, deps, 0)?;
    graph.link_visible();
    mark_dangling_optional(&mut graph);
    Ok(graph)
}

/// Version 1 `requires` carry no dependency type. A required name with no
/// copy anywhere in the tree was an optional dependency that did not install.
fn mark_dangling_optional(graph: &mut DependencyGraph) {
    let root = graph.root();
    let dangling: Vec<(NodeId, String)> = graph
        .iter()
        .filter(|(id, _)| *id != root)
        .flat_map(|(id, node)| {
            node.edges_out
                .iter()
                .filter(|(_, edge)| edge.to.is_none() && edge.spec.kind == DepKind::Prod)
                .map(move |(name, _)| (id, name.clone()))
        })
        .collect();
    for (id, name) in dangling {
        if let Some(edge) = graph[id].edges_out.get_mut(&name) {
            edge.spec.kind = DepKind::Optional;
        }
    }
}

/// Nesting bound for version 1 trees; deeper files are treated as corrupt.
const MAX_LEGACY_DEPTH: usize = 100;

fn place_legacy(
    graph: &mut DependencyGraph,
    parent: NodeId,
    deps: &IndexMap<String, LegacyDep>,
    depth: usize,
) -> Result<(), PkgError> {
    if depth > MAX_LEGACY_DEPTH {
        return Err(PkgError::corrupt_lockfile("dependencies nested too deeply"));
    }
    for (name, dep) in deps {
        // aliases are written as `npm:real-name@version`
        let (version, package_name) = match dep.version.strip_prefix("npm:") {
            Some(_) => {
                let parsed = ParsedSpec::resolve(name, &dep.version).map_err(|e| {
                    PkgError::corrupt_lockfile(format!("bad alias for '{name}': {}", e.message()))
                })?;
                let real = parsed.registry_name().map(str::to_string);
                (parsed.registry_fetch_spec().to_string(), real)
            }
            None => (dep.version.clone(), None),
        };

        let id = graph.place(parent, name, &version);
        let node = &mut graph[id];
        node.resolved.clone_from(&dep.resolved);
        node.integrity.clone_from(&dep.integrity);
        node.dev = dep.dev;
        node.optional = dep.optional;
        node.package_name = package_name;
        for (req, range) in &dep.requires {
            graph.add_edge(id, PackageSpec::new(req.clone(), range.clone(), DepKind::Prod));
        }
        place_legacy(graph, id, &dep.dependencies, depth + 1)?;
    }
    Ok(())
}

/// Encode a graph in the version 2 shape.
///
/// Keys are ordered lexicographically by location; nodes carrying a
/// resolution error are left out.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn encode(graph: &DependencyGraph) -> Result<String, PkgError> {
    let root = &graph[graph.root()];
    let mut packages = Map::new();

    for (id, node) in graph.iter() {
        if node.error.is_some() {
            continue;
        }
        let mut entry = LockPackage::default();
        if id == graph.root() {
            entry.name = Some(node.name.clone()).filter(|n| !n.is_empty());
            entry.version = Some(node.version.clone()).filter(|v| !v.is_empty());
        } else {
            entry.name.clone_from(&node.package_name);
            entry.version = Some(node.version.clone());
            entry.resolved.clone_from(&node.resolved);
            entry.integrity.clone_from(&node.integrity);
            entry.dev = node.dev;
            entry.optional = node.optional;
            entry.peer = node.peer;
            entry.extraneous = node.extraneous;
            entry.has_install_script = node.has_install_script;
        }
        entry.record_edges(node);
        packages.insert(node.location.clone(), serde_json::to_value(entry)?);
    }

    let mut doc = Map::new();
    if !root.name.is_empty() {
        doc.insert("name".to_string(), Value::from(root.name.clone()));
    }
    if !root.version.is_empty() {
        doc.insert("version".to_string(), Value::from(root.version.clone()));
    }
    doc.insert(
        "lockfileVersion".to_string(),
        Value::from(CURRENT_LOCKFILE_VERSION),
    );
    doc.insert("requires".to_string(), Value::Bool(true));
    doc.insert("packages".to_string(), Value::Object(packages));

    let mut out = serde_json::to_string_pretty(&Value::Object(doc))?;
    out.push('\n');
    Ok(out)
}

/// Where a save should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameChoice {
    pub filename: &'static str,
    /// Existing `package-lock.json` to remove after a shrinkwrap save.
    pub rename_from: Option<PathBuf>,
}

/// Pick the lockfile name for `dir`.
///
/// An existing `npm-shrinkwrap.json` always wins. A shrinkwrap request with
/// only a `package-lock.json` present renames it.
#[must_use]
pub fn choose_filename(dir: &Path, shrinkwrap_requested: bool) -> FilenameChoice {
    let package_lock = dir.join(PACKAGE_LOCK);
    if dir.join(SHRINKWRAP).is_file() {
        return FilenameChoice {
            filename: SHRINKWRAP,
            rename_from: None,
        };
    }
    if shrinkwrap_requested {
        return FilenameChoice {
            filename: SHRINKWRAP,
            rename_from: package_lock.is_file().then_some(package_lock),
        };
    }
    FilenameChoice {
        filename: PACKAGE_LOCK,
        rename_from: None,
    }
}

/// Notice reported after saving to `filename`.
#[must_use]
pub fn save_notice(meta: &LockfileMeta, filename: &str) -> String {
    if meta.hidden_lockfile || !meta.loaded_from_disk {
        format!("created a lockfile as {filename}")
    } else if meta.original_lockfile_version < meta.lockfile_version {
        format!("{filename} updated to version {}", meta.lockfile_version)
    } else {
        format!("{filename} up to date")
    }
}

/// Load the virtual tree from `npm-shrinkwrap.json` or `package-lock.json`,
/// falling back to the hidden lockfile inside `node_modules`.
///
/// Root edges come from `package.json` when it exists. Returns `None` when
/// no lockfile exists.
///
/// # Errors
/// Returns `CorruptLockfile` for unreadable content and IO errors otherwise.
pub fn load_virtual(dir: &Path) -> Result<Option<DependencyGraph>, PkgError> {
    let candidates = [
        (SHRINKWRAP, SHRINKWRAP, false),
        (PACKAGE_LOCK, PACKAGE_LOCK, false),
        (HIDDEN_LOCKFILE, PACKAGE_LOCK, true),
    ];
    for (relative, filename, hidden) in candidates {
        let path = dir.join(relative);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(PkgError::io(format!("{}: {e}", path.display()))),
        };

        let manifest_path = dir.join("package.json");
        let mut graph = if manifest_path.is_file() {
            let loaded = super::deps::read_manifest(&manifest_path)?;
            decode_with_root(&raw, &loaded.manifest, EdgeOptions::all())?
        } else {
            decode(&raw)?
        };
        graph.meta.filename = filename.to_string();
        graph.meta.loaded_from_disk = true;
        graph.meta.hidden_lockfile = hidden;
        graph.root_path = Some(dir.to_path_buf());
        debug!(file = %path.display(), nodes = graph.len(), "loaded virtual tree");
        return Ok(Some(graph));
    }
    Ok(None)
}

/// Whether either project lockfile exists in `dir`.
#[must_use]
pub fn lockfile_exists(dir: &Path) -> bool {
    dir.join(SHRINKWRAP).is_file() || dir.join(PACKAGE_LOCK).is_file()
}

/// Encode and atomically write `graph` to `dir/filename`.
///
/// # Errors
/// Returns an error if encoding or writing fails.
pub fn save(graph: &DependencyGraph, dir: &Path, filename: &str) -> Result<PathBuf, PkgError> {
    let content = encode(graph)?;
    let path = dir.join(filename);
    grove_util::fs::atomic_write(&path, content.as_bytes())
        .map_err(|e| PkgError::io(format!("Failed to write {}: {e}", path.display())))?;
    Ok(path)
}

/// Compute a deterministic hash of an encoded lockfile.
///
/// Used to detect whether `node_modules` already matches the lockfile.
#[must_use]
pub fn lockfile_content_hash(encoded: &str) -> String {
    grove_util::hash::blake3_bytes(encoded.as_bytes())
}
