//! Actual tree: what is installed under `node_modules`.
//!
//! The scan mirrors Node's lookup layout: every package directory (scoped
//! ones one level deeper) becomes a node at its nested location, and its own
//! `node_modules` is scanned beneath it. Edges come from each package's
//! `package.json` and are linked to whatever the package would load.

use super::deps::{load_edges, read_manifest, EdgeOptions};
use super::error::PkgError;
use super::lockfile::{self, HIDDEN_LOCKFILE};
use super::tree::{DependencyGraph, NodeId};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Deepest `node_modules` nesting the scan follows.
const MAX_SCAN_DEPTH: usize = 64;

/// Source of the actual tree.
pub trait TreeReader {
    /// Read the installed tree rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if the root manifest exists but cannot be read.
    fn read_actual(&self, root: &Path) -> Result<DependencyGraph, PkgError>;
}

/// Reads the actual tree from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsTreeReader;

impl TreeReader for FsTreeReader {
    fn read_actual(&self, root: &Path) -> Result<DependencyGraph, PkgError> {
        let manifest_path = root.join("package.json");
        let mut graph = if manifest_path.is_file() {
            let loaded = read_manifest(&manifest_path)?;
            for err in &loaded.errors {
                warn!(path = %manifest_path.display(), error = %err.message, "ignoring invalid dependency entry");
            }
            DependencyGraph::from_manifest(&loaded.manifest, EdgeOptions::all())
        } else {
            DependencyGraph::new(String::new(), String::new())
        };
        graph.root_path = Some(root.to_path_buf());

        let root_id = graph.root();
        scan(&mut graph, root_id, &root.join("node_modules"), 0);

        copy_hidden_metadata(&mut graph, root);
        graph.link_visible();
        graph.compute_flags();
        debug!(root = %root.display(), nodes = graph.len(), "read actual tree");
        Ok(graph)
    }
}

fn scan(graph: &mut DependencyGraph, parent: NodeId, node_modules: &Path, depth: usize) {
    if depth > MAX_SCAN_DEPTH {
        warn!(path = %node_modules.display(), "node_modules nested too deeply, not scanning");
        return;
    }
    let Ok(entries) = fs::read_dir(node_modules) else {
        return;
    };

    let mut names: Vec<(String, std::path::PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }
        if name.starts_with('@') {
            let Ok(scoped) = fs::read_dir(&path) else { continue };
            for entry in scoped.flatten() {
                let pkg = entry.file_name().to_string_lossy().to_string();
                if !pkg.starts_with('.') && entry.path().is_dir() {
                    names.push((format!("{name}/{pkg}"), entry.path()));
                }
            }
        } else {
            names.push((name, path));
        }
    }
    names.sort();

    for (name, dir) in names {
        let manifest_path = dir.join("package.json");
        let loaded = match read_manifest(&manifest_path) {
            Ok(loaded) => loaded,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "skipping directory without a usable package.json");
                continue;
            }
        };
        let manifest = loaded.manifest;
        let id = graph.place(parent, &name, &manifest.version);
        {
            let node = &mut graph[id];
            node.has_install_script = manifest.has_install_script();
            node.package_name = Some(manifest.name.clone())
                .filter(|real| !real.is_empty() && *real != name);
        }
        for spec in load_edges(&manifest, EdgeOptions::transitive()) {
            graph.add_edge(id, spec);
        }
        scan(graph, id, &dir.join("node_modules"), depth + 1);
    }
}

/// Take `resolved`/`integrity` from the hidden lockfile where the installed
/// version still matches.
fn copy_hidden_metadata(graph: &mut DependencyGraph, root: &Path) {
    let Ok(raw) = fs::read_to_string(root.join(HIDDEN_LOCKFILE)) else {
        return;
    };
    let hidden = match lockfile::decode(&raw) {
        Ok(hidden) => hidden,
        Err(e) => {
            debug!(error = %e, "ignoring unreadable hidden lockfile");
            return;
        }
    };
    let ids: Vec<NodeId> = graph.iter().map(|(id, _)| id).collect();
    for id in ids {
        let Some(recorded) = hidden.at_location(&graph[id].location) else {
            continue;
        };
        let recorded = &hidden[recorded];
        if recorded.version == graph[id].version && !graph[id].is_root() {
            let node = &mut graph[id];
            node.resolved.clone_from(&recorded.resolved);
            node.integrity.clone_from(&recorded.integrity);
        }
    }
}
