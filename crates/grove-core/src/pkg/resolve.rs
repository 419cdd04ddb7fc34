//! Dependency resolution.
//!
//! Builds a complete tree from a root manifest. Edges are processed in
//! breadth-first waves: every package name a wave needs is prefetched
//! concurrently, then the wave's edges are placed one at a time in discovery
//! order so identical inputs always produce identical trees.
//!
//! Placement hoists each new node as close to the root as it can go without
//! shadowing a conflicting same-name node, and nests it under the dependent
//! otherwise.

use super::cache::{PackumentCache, DEFAULT_CONCURRENCY};
use super::deps::{DepKind, EdgeOptions, PackageSpec};
use super::error::{ErrorKind, PkgError};
use super::manifest::{Manifest, Packument};
use super::spec::{ParsedSpec, SpecType};
use super::tree::{node_satisfies, DependencyGraph, NodeId, TreeNode};
use super::deps::load_edges;
use super::version::{pick_manifest, satisfies};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum concurrent packument fetches.
pub const MAX_CONCURRENT_FETCHES: usize = DEFAULT_CONCURRENCY;

/// Options for dependency resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Include root devDependencies.
    pub include_dev: bool,
    /// Include optionalDependencies.
    pub include_optional: bool,
    /// Install root peerDependencies.
    pub include_peer: bool,
    /// Fail on the first unresolvable dependency instead of collecting it.
    pub strict: bool,
    /// Fail on peer dependency conflicts instead of warning.
    pub strict_peer_deps: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            include_dev: true,
            include_optional: true,
            include_peer: true,
            strict: false,
            strict_peer_deps: false,
        }
    }
}

impl ResolveOptions {
    fn root_edges(self) -> EdgeOptions {
        EdgeOptions {
            include_dev: self.include_dev,
            include_optional: self.include_optional,
            include_peer: self.include_peer,
        }
    }
}

/// Result of resolving dependencies.
#[derive(Debug)]
pub struct ResolveResult {
    /// The resolved tree.
    pub graph: DependencyGraph,
    /// Per-node failures, also attached to error nodes in the graph.
    pub errors: Vec<PkgError>,
    /// Peer conflicts and dropped optional dependencies.
    pub warnings: Vec<PkgError>,
    /// Nodes placed.
    pub resolved_count: usize,
    /// Packuments fetched from the registry during this run.
    pub fetched_count: usize,
    /// Nodes taken from the prior tree without a registry lookup.
    pub reused_count: usize,
    /// Locations removed as unreachable.
    pub pruned: Vec<String>,
}

impl ResolveResult {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// An edge waiting to be resolved.
#[derive(Debug, Clone)]
struct Pending {
    from: NodeId,
    name: String,
}

/// What a new node will be built from.
#[derive(Debug)]
struct Choice {
    version: String,
    resolved: Option<String>,
    integrity: Option<String>,
    has_install_script: bool,
    specs: Vec<PackageSpec>,
}

impl Choice {
    fn from_prior(node: &TreeNode) -> Self {
        Self {
            version: node.version.clone(),
            resolved: node.resolved.clone(),
            integrity: node.integrity.clone(),
            has_install_script: node.has_install_script,
            specs: node
                .specs()
                .filter(|s| s.kind != DepKind::Dev)
                .cloned()
                .collect(),
        }
    }
}

/// Where a node for an edge should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// A same-name same-version node is already visible at this level.
    Existing(NodeId),
    /// Create a new child of this node.
    Under(NodeId),
}

type Fetched = HashMap<String, Result<Arc<Packument>, PkgError>>;

/// Resolve the dependency tree for `manifest`.
///
/// `prior` is a tree read from a lockfile: a node it holds is reused without
/// a registry lookup while its version still satisfies the declared range.
///
/// # Errors
/// Returns `RegistryError` for any registry failure, `NotFound` for a missing
/// non-optional package, and in strict modes the first per-node or peer error.
pub async fn resolve(
    manifest: &Manifest,
    cache: &PackumentCache,
    options: &ResolveOptions,
    prior: Option<&DependencyGraph>,
) -> Result<ResolveResult, PkgError> {
    let mut graph = DependencyGraph::from_manifest(manifest, options.root_edges());
    if let Some(prior) = prior {
        graph.meta = prior.meta.clone();
        graph.root_path.clone_from(&prior.root_path);
    }

    let root = graph.root();
    let queue = graph[root]
        .edges_out
        .keys()
        .map(|name| Pending {
            from: root,
            name: name.clone(),
        })
        .collect();

    let fetched_before = cache.fetch_count();
    let mut run = Resolution {
        cache,
        options,
        prior,
        graph,
        queue,
        errors: Vec::new(),
        warnings: Vec::new(),
        resolved_count: 0,
        reused_count: 0,
    };

    let mut wave = 0;
    while !run.queue.is_empty() {
        wave += 1;
        let batch: Vec<Pending> = run.queue.drain(..).collect();
        let fetched = run.prefetch(&batch).await;
        debug!(wave, edges = batch.len(), fetched = fetched.len(), "resolving wave");
        for pending in batch {
            run.process(pending, &fetched).await?;
        }
    }

    let pruned = run.graph.prune_unreachable();
    if !pruned.is_empty() {
        debug!(count = pruned.len(), "pruned unreachable nodes");
    }
    run.validate_peers()?;
    run.graph.compute_flags();

    info!(
        resolved = run.resolved_count,
        reused = run.reused_count,
        errors = run.errors.len(),
        "resolution complete"
    );

    Ok(ResolveResult {
        graph: run.graph,
        errors: run.errors,
        warnings: run.warnings,
        resolved_count: run.resolved_count,
        fetched_count: cache.fetch_count().saturating_sub(fetched_before),
        reused_count: run.reused_count,
        pruned,
    })
}

struct Resolution<'a> {
    cache: &'a PackumentCache,
    options: &'a ResolveOptions,
    prior: Option<&'a DependencyGraph>,
    graph: DependencyGraph,
    queue: VecDeque<Pending>,
    errors: Vec<PkgError>,
    warnings: Vec<PkgError>,
    resolved_count: usize,
    reused_count: usize,
}

impl<'a> Resolution<'a> {
    /// Fetch every registry name the batch may need, bounded and joined.
    async fn prefetch(&self, batch: &[Pending]) -> Fetched {
        let mut names: Vec<String> = Vec::new();
        for pending in batch {
            let Some(spec) = self.spec(pending) else { continue };
            if self.satisfied_visible(pending.from, spec).is_some()
                || self.reusable(pending.from, spec).is_some()
            {
                continue;
            }
            let Ok(parsed) = ParsedSpec::resolve(&spec.name, &spec.range) else {
                continue;
            };
            if let (true, Some(name)) = (parsed.is_registry(), parsed.registry_name()) {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        self.cache.prefetch(names).await.into_iter().collect()
    }

    fn spec(&self, pending: &Pending) -> Option<&PackageSpec> {
        self.graph
            .get(pending.from)?
            .edges_out
            .get(&pending.name)
            .map(|e| &e.spec)
    }

    /// The visible node for `spec.name` from `from`, if it satisfies.
    fn satisfied_visible(&self, from: NodeId, spec: &PackageSpec) -> Option<NodeId> {
        let visible = self.graph.resolve_visible(from, &spec.name)?;
        node_satisfies(&self.graph[visible], spec).then_some(visible)
    }

    /// A prior-tree node visible from the same place that still satisfies.
    fn reusable(&self, from: NodeId, spec: &PackageSpec) -> Option<&'a TreeNode> {
        let prior = self.prior?;
        let anchor = self
            .graph
            .ancestry(from)
            .into_iter()
            .find_map(|id| prior.at_location(&self.graph[id].location))?;
        let candidate = prior.resolve_visible(anchor, &spec.name)?;
        let node = &prior[candidate];
        (!node.is_root() && node_satisfies(node, spec)).then_some(node)
    }

    async fn process(&mut self, pending: Pending, fetched: &Fetched) -> Result<(), PkgError> {
        let Some(spec) = self.spec(&pending).cloned() else {
            // dependent was replaced after this edge was queued
            return Ok(());
        };
        let Pending { from, name } = pending;

        if let Some(visible) = self.satisfied_visible(from, &spec) {
            self.graph.link(from, &name, visible);
            return Ok(());
        }

        let choice = if let Some(node) = self.reusable(from, &spec) {
            self.reused_count += 1;
            Choice::from_prior(node)
        } else {
            match self.choose(from, &spec, fetched).await? {
                Some(choice) => choice,
                None => return Ok(()),
            }
        };

        match self.placement(from, &name, &choice.version) {
            Placement::Existing(id) => self.graph.link(from, &name, id),
            Placement::Under(parent) => self.place(parent, from, &spec, choice),
        }
        Ok(())
    }

    /// Pick a registry version for `spec`.
    ///
    /// Returns `None` when the edge was dropped or turned into an error node.
    async fn choose(
        &mut self,
        from: NodeId,
        spec: &PackageSpec,
        fetched: &Fetched,
    ) -> Result<Option<Choice>, PkgError> {
        let parsed = match ParsedSpec::resolve(&spec.name, &spec.range) {
            Ok(parsed) => parsed,
            Err(e) => return self.node_error(from, spec, e).map(|()| None),
        };
        let Some(registry_name) = parsed.registry_name().filter(|_| parsed.is_registry()) else {
            let err = PkgError::spec_type_not_supported(parsed.spec_type.as_str());
            return self.node_error(from, spec, err).map(|()| None);
        };

        let packument = match fetched.get(registry_name) {
            Some(result) => result.clone(),
            None => self.cache.fetch(registry_name).await,
        };
        let packument = match packument {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound && spec.kind.is_optional() => {
                self.drop_optional(spec, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let picked = match pick_manifest(&packument, parsed.registry_fetch_spec()) {
            Ok(picked) => picked,
            Err(e) if spec.kind.is_optional() => {
                self.drop_optional(spec, e);
                return Ok(None);
            }
            Err(_) => {
                let err = PkgError::no_matching_version(&spec.name, &spec.range);
                return self.node_error(from, spec, err).map(|()| None);
            }
        };

        let manifest = picked.manifest;
        Ok(Some(Choice {
            version: picked.version.to_string(),
            resolved: manifest.dist.tarball.clone(),
            integrity: manifest.integrity(),
            has_install_script: manifest.has_install_script(),
            specs: load_edges(manifest, EdgeOptions::transitive()),
        }))
    }

    fn drop_optional(&mut self, spec: &PackageSpec, err: PkgError) {
        warn!(name = %spec.name, range = %spec.range, error = %err, "skipping optional dependency");
        self.warnings.push(err);
    }

    /// Record a per-node failure as an error node nested under the dependent.
    fn node_error(&mut self, from: NodeId, spec: &PackageSpec, err: PkgError) -> Result<(), PkgError> {
        if self.options.strict {
            return Err(err);
        }
        warn!(name = %spec.name, range = %spec.range, error = %err, "could not resolve dependency");
        let id = self.graph.place(from, &spec.name, "");
        self.graph[id].error = Some(err.clone());
        self.graph.link(from, &spec.name, id);
        self.errors.push(err);
        Ok(())
    }

    /// Walk from the dependent toward the root looking for the shallowest
    /// level that can hold `name@version`.
    fn placement(&self, from: NodeId, name: &str, version: &str) -> Placement {
        let mut target = from;
        for level in self.graph.ancestry(from) {
            let node = &self.graph[level];
            if let Some(existing) = node.children.get(name).copied() {
                let same = &self.graph[existing];
                if same.error.is_none() && same.version == version {
                    return Placement::Existing(existing);
                }
                break;
            }
            // a level whose own edge this version would break cannot host it
            if level != from {
                if let Some(edge) = node.edges_out.get(name) {
                    if !edge_accepts(&edge.spec, version) {
                        break;
                    }
                }
            }
            target = level;
        }
        Placement::Under(target)
    }

    fn place(&mut self, parent: NodeId, from: NodeId, spec: &PackageSpec, choice: Choice) {
        let name = spec.name.as_str();
        let replaced = self.graph[parent].children.get(name).copied();
        let orphaned = match replaced {
            Some(old) => self.graph.remove_subtree(old),
            None => Vec::new(),
        };

        let id = self.graph.place(parent, name, &choice.version);
        let package_name = ParsedSpec::resolve(name, &spec.range)
            .ok()
            .and_then(|p| p.registry_name().map(str::to_string))
            .filter(|real| real != name);
        {
            let node = &mut self.graph[id];
            node.resolved = choice.resolved;
            node.integrity = choice.integrity;
            node.has_install_script = choice.has_install_script;
            node.package_name = package_name;
        }
        debug!(
            name = %name,
            version = %choice.version,
            location = %self.graph[id].location,
            "placed"
        );
        self.resolved_count += 1;

        for dep in choice.specs {
            let kind = dep.kind;
            let dep_name = dep.name.clone();
            self.graph.add_edge(id, dep);
            // peers are validated after placement, dev edges never install
            if matches!(kind, DepKind::Prod | DepKind::Optional) {
                self.requeue(id, dep_name);
            }
        }

        self.graph.link(from, name, id);
        for (dependent, edge) in orphaned {
            if dependent != from {
                self.requeue(dependent, edge);
            }
        }
        if parent != from {
            self.relink_shadowed(parent, id);
        }
    }

    fn requeue(&mut self, from: NodeId, name: String) {
        self.queue.push_back(Pending { from, name });
    }

    /// Re-point edges below `level` that now see `new` instead of a node
    /// further up. Unsatisfied ones go back on the queue.
    fn relink_shadowed(&mut self, level: NodeId, new: NodeId) {
        let name = self.graph[new].name.clone();
        let affected: Vec<NodeId> = self
            .graph
            .iter()
            .filter(|(id, node)| {
                *id != new
                    && self.graph.is_within(*id, level)
                    && node
                        .edges_out
                        .get(&name)
                        .is_some_and(|e| e.to.is_some_and(|to| to != new))
            })
            .map(|(id, _)| id)
            .collect();

        for id in affected {
            if self.graph.resolve_visible(id, &name) != Some(new) {
                continue;
            }
            let spec = self.graph[id].edges_out[&name].spec.clone();
            if node_satisfies(&self.graph[new], &spec) {
                self.graph.link(id, &name, new);
            } else {
                self.graph.unlink(id, &name);
                if !spec.kind.is_peer() {
                    debug!(name = %name, from = %self.graph[id].location, "edge shadowed, requeueing");
                    self.requeue(id, name.clone());
                }
            }
        }
    }

    /// Link peer edges of installed packages and check their ranges.
    fn validate_peers(&mut self) -> Result<(), PkgError> {
        let root = self.graph.root();
        let peers: Vec<(NodeId, PackageSpec)> = self
            .graph
            .iter()
            .filter(|(id, _)| *id != root)
            .flat_map(|(id, node)| {
                node.specs()
                    .filter(|s| s.kind.is_peer())
                    .cloned()
                    .map(move |s| (id, s))
            })
            .collect();

        for (id, spec) in peers {
            let dependent = {
                let node = &self.graph[id];
                format!("{}@{}", node.name, node.version)
            };
            match self.graph.resolve_visible(id, &spec.name) {
                Some(found) if found != id => {
                    self.graph.link(id, &spec.name, found);
                    if node_satisfies(&self.graph[found], &spec) {
                        continue;
                    }
                    let version = self.graph[found].version.clone();
                    let conflict = PkgError::peer_conflict(&dependent, &spec.name, &spec.range, &version);
                    if self.options.strict_peer_deps {
                        return Err(conflict.into_invalid_peer());
                    }
                    warn!(dependent = %dependent, peer = %spec.name, range = %spec.range, found = %version, "peer dependency conflict");
                    self.warnings.push(conflict);
                }
                _ if spec.kind == DepKind::PeerOptional => {}
                _ => {
                    warn!(dependent = %dependent, peer = %spec.name, range = %spec.range, "missing peer dependency");
                    self.warnings.push(PkgError::new(
                        ErrorKind::PeerConflict,
                        format!(
                            "{dependent} requires a peer of {}@{} but none is installed",
                            spec.name, spec.range
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Whether a node at `version` would satisfy `spec`, without building it.
fn edge_accepts(spec: &PackageSpec, version: &str) -> bool {
    match ParsedSpec::resolve(&spec.name, &spec.range) {
        Ok(parsed) if parsed.is_registry() => {
            let target = parsed.sub_spec.as_deref().unwrap_or(&parsed);
            match target.spec_type {
                SpecType::Version | SpecType::Range => satisfies(version, &target.fetch_spec),
                _ => true,
            }
        }
        _ => true,
    }
}
