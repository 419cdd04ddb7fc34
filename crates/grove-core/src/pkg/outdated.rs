//! Outdated package report.
//!
//! For every tracked edge, compares the installed version with the highest
//! version the declared range allows (`wanted`) and the `latest` dist-tag.

use super::cache::PackumentCache;
use super::deps::DepKind;
use super::error::{ErrorKind, PkgError};
use super::spec::ParsedSpec;
use super::tree::{DependencyGraph, NodeId};
use super::version::pick_manifest;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Options for [`outdated_report`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutdatedOptions {
    /// Check the edges of every installed package, not just the root.
    pub all: bool,
    /// Compare top-level global packages against `*`.
    pub global: bool,
    /// Only report these package names, at any depth.
    pub names: Vec<String>,
    /// Skip installed packages flagged with these kinds.
    pub omit: BTreeSet<DepKind>,
}

/// One outdated dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutdatedEntry {
    pub name: String,
    /// Installed version; `None` when the dependency is missing.
    pub current: Option<String>,
    pub wanted: String,
    pub latest: String,
    /// Install location of the current version.
    pub location: Option<String>,
    /// Package declaring the dependency.
    pub dependent: String,
    /// Manifest section of the declaration.
    #[serde(rename = "type")]
    pub kind: String,
}

/// An edge to check: a dependent, the declared name and its spec.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Tracked {
    from: NodeId,
    name: String,
    spec: String,
    kind: DepKind,
    to: Option<NodeId>,
}

/// Build the outdated report for an installed tree.
///
/// Entries are sorted by name, then dependent.
///
/// # Errors
/// Registry failures other than a missing package abort the report.
pub async fn outdated_report(
    actual: &DependencyGraph,
    cache: &PackumentCache,
    options: &OutdatedOptions,
) -> Result<Vec<OutdatedEntry>, PkgError> {
    let edges = tracked_edges(actual, options);
    let names: Vec<String> = edges
        .iter()
        .filter_map(|e| registry_target(&e.name, &e.spec).map(|(name, _)| name))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    // warm the cache; failures are handled per edge below
    cache.prefetch(names).await;

    let mut entries = Vec::new();
    for edge in edges {
        if let Some(entry) = check_edge(actual, cache, options, &edge).await? {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.dependent.cmp(&b.dependent)));
    Ok(entries)
}

fn tracked_edges(actual: &DependencyGraph, options: &OutdatedOptions) -> Vec<Tracked> {
    let root = actual.root();
    let edges_of = |id: NodeId| -> Vec<Tracked> {
        let node = &actual[id];
        if options.global && id == root {
            return node
                .children
                .iter()
                .map(|(name, child)| Tracked {
                    from: id,
                    name: name.clone(),
                    spec: "*".to_string(),
                    kind: DepKind::Prod,
                    to: Some(*child),
                })
                .collect();
        }
        node.edges_out
            .values()
            .map(|edge| Tracked {
                from: id,
                name: edge.spec.name.clone(),
                spec: edge.spec.range.clone(),
                kind: edge.spec.kind,
                to: edge.to,
            })
            .collect()
    };

    let mut tracked = BTreeSet::new();
    if options.names.is_empty() {
        let sources: Vec<NodeId> = if options.all {
            actual.iter().map(|(id, _)| id).collect()
        } else {
            vec![root]
        };
        for id in sources {
            tracked.extend(edges_of(id));
        }
    } else {
        // edges into every installed copy of a filtered name
        for name in &options.names {
            for target in actual.nodes_named(name) {
                for from in actual[target].edges_in.iter().copied() {
                    tracked.extend(edges_of(from).into_iter().filter(|e| e.to == Some(target)));
                }
                if options.global && actual[target].parent == Some(root) {
                    tracked.extend(edges_of(root).into_iter().filter(|e| e.to == Some(target)));
                }
            }
            // a declared but missing dependency still shows up
            tracked.extend(edges_of(root).into_iter().filter(|e| &e.name == name && e.to.is_none()));
        }
    }
    tracked.into_iter().collect()
}

/// Registry name and range of a spec, if it resolves through the registry.
fn registry_target(name: &str, spec: &str) -> Option<(String, String)> {
    let parsed = ParsedSpec::resolve(name, spec).ok()?;
    if !parsed.is_registry() {
        return None;
    }
    let range = parsed.registry_fetch_spec().to_string();
    Some((parsed.registry_name()?.to_string(), range))
}

async fn check_edge(
    actual: &DependencyGraph,
    cache: &PackumentCache,
    options: &OutdatedOptions,
    edge: &Tracked,
) -> Result<Option<OutdatedEntry>, PkgError> {
    let node = edge.to.and_then(|id| actual.get(id));
    if let Some(node) = node {
        let flagged = [
            (DepKind::Dev, node.dev),
            (DepKind::Optional, node.optional),
            (DepKind::Peer, node.peer),
            (DepKind::Prod, !node.dev && !node.optional && !node.peer),
        ];
        if flagged.iter().any(|(kind, set)| *set && options.omit.contains(kind)) {
            return Ok(None);
        }
    } else if edge.kind != DepKind::Prod {
        // only missing prod dependencies are worth reporting
        return Ok(None);
    }

    let Some((registry_name, range)) = registry_target(&edge.name, &edge.spec) else {
        debug!(name = %edge.name, spec = %edge.spec, "skipping non-registry dependency");
        return Ok(None);
    };

    let packument = match cache.fetch(&registry_name).await {
        Ok(p) => p,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(name = %registry_name, "not in registry, skipping");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let (wanted, latest) = match (pick_manifest(&packument, &range), pick_manifest(&packument, "*")) {
        (Ok(wanted), Ok(latest)) => (wanted.version.to_string(), latest.version.to_string()),
        _ => return Ok(None),
    };

    let current = node.map(|n| n.version.clone());
    if current.as_deref() == Some(wanted.as_str()) && wanted == latest {
        return Ok(None);
    }

    let from = &actual[edge.from];
    let dependent = if from.is_root() && options.global {
        "global".to_string()
    } else {
        from.name.clone()
    };
    Ok(Some(OutdatedEntry {
        name: edge.name.clone(),
        current,
        wanted,
        latest,
        location: node.map(|n| n.location.clone()),
        dependent,
        kind: edge.kind.section().to_string(),
    }))
}
