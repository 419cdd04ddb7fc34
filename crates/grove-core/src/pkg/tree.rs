//! Arena-backed dependency tree.
//!
//! The graph owns every node; parents, children and edges refer to nodes by
//! [`NodeId`]. `edges_in` is a non-owning back-reference set used for
//! dependents lookup. Nodes leave the arena only through
//! [`DependencyGraph::remove_subtree`] or [`DependencyGraph::prune_unreachable`].

use super::deps::{load_edges, DepKind, EdgeOptions, PackageSpec};
use super::error::PkgError;
use super::lockfile::LockfileMeta;
use super::manifest::Manifest;
use super::spec::{ParsedSpec, SpecType};
use super::version::satisfies;
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

/// Index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A declared dependency and the node it currently resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub spec: PackageSpec,
    pub to: Option<NodeId>,
}

/// How well an edge is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    Valid,
    /// No node of that name is visible.
    Missing,
    /// A node is visible but does not satisfy the spec.
    Invalid,
}

/// A placed package instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeNode {
    pub name: String,
    pub version: String,
    /// Nested `node_modules` path; empty for the root.
    pub location: String,
    pub parent: Option<NodeId>,
    pub children: BTreeMap<String, NodeId>,
    pub edges_out: IndexMap<String, Edge>,
    pub edges_in: BTreeSet<NodeId>,
    pub extraneous: bool,
    pub dev: bool,
    pub optional: bool,
    pub peer: bool,
    pub resolved: Option<String>,
    pub integrity: Option<String>,
    /// Registry name when installed under an alias.
    pub package_name: Option<String>,
    pub has_install_script: bool,
    pub error: Option<PkgError>,
}

impl TreeNode {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Name the package is published under.
    #[must_use]
    pub fn registry_name(&self) -> &str {
        self.package_name.as_deref().unwrap_or(&self.name)
    }

    /// Specs of every declared edge, in declaration order.
    pub fn specs(&self) -> impl Iterator<Item = &PackageSpec> {
        self.edges_out.values().map(|e| &e.spec)
    }
}

/// Whether `node` fulfils `spec`.
///
/// Ranges are checked against the version; tags accept any healthy node;
/// non-registry specs cannot be checked offline and accept any healthy node.
#[must_use]
pub fn node_satisfies(node: &TreeNode, spec: &PackageSpec) -> bool {
    if node.error.is_some() {
        return false;
    }
    let Ok(parsed) = ParsedSpec::resolve(&spec.name, &spec.range) else {
        return false;
    };
    if parsed.registry_name() != Some(node.registry_name()) {
        return false;
    }
    let target = parsed.sub_spec.as_deref().unwrap_or(&parsed);
    match target.spec_type {
        SpecType::Version | SpecType::Range => satisfies(&node.version, &target.fetch_spec),
        _ => true,
    }
}

/// Dependency tree with lockfile metadata.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<NodeId, TreeNode>,
    next_id: usize,
    root: NodeId,
    by_name: BTreeMap<String, BTreeSet<NodeId>>,
    by_location: BTreeMap<String, NodeId>,
    pub meta: LockfileMeta,
    /// Project directory the tree was read from or will be written to.
    pub root_path: Option<PathBuf>,
}

impl Index<NodeId> for DependencyGraph {
    type Output = TreeNode;

    fn index(&self, id: NodeId) -> &TreeNode {
        &self.nodes[&id]
    }
}

impl IndexMut<NodeId> for DependencyGraph {
    fn index_mut(&mut self, id: NodeId) -> &mut TreeNode {
        self.nodes.get_mut(&id).unwrap_or_else(|| panic!("no node {id:?}"))
    }
}

impl DependencyGraph {
    /// A graph holding only a root node.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let root = NodeId(0);
        let node = TreeNode {
            name: name.into(),
            version: version.into(),
            ..TreeNode::default()
        };
        let mut graph = Self {
            nodes: BTreeMap::new(),
            next_id: 1,
            root,
            by_name: BTreeMap::new(),
            by_location: BTreeMap::new(),
            meta: LockfileMeta::default(),
            root_path: None,
        };
        graph.by_location.insert(String::new(), root);
        graph.nodes.insert(root, node);
        graph
    }

    /// A root node built from a manifest, with its declared edges.
    #[must_use]
    pub fn from_manifest(manifest: &Manifest, options: EdgeOptions) -> Self {
        let mut graph = Self::new(manifest.name.clone(), manifest.version.clone());
        let root = graph.root;
        for spec in load_edges(manifest, options) {
            graph.add_edge(root, spec);
        }
        graph
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Nodes in location order, root first.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> {
        self.by_location.values().map(|id| (*id, &self.nodes[id]))
    }

    /// Node placed at `location`.
    #[must_use]
    pub fn at_location(&self, location: &str) -> Option<NodeId> {
        self.by_location.get(location).copied()
    }

    /// Every node with the given name, shallowest location first.
    #[must_use]
    pub fn nodes_named(&self, name: &str) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .by_name
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_by_key(|id| (self.depth(*id), self.nodes[id].location.clone()));
        ids
    }

    /// Number of ancestors between `id` and the root.
    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = self.nodes[&id].parent;
        while let Some(p) = cur {
            depth += 1;
            cur = self.nodes[&p].parent;
        }
        depth
    }

    /// `id` and its ancestors, nearest first.
    #[must_use]
    pub fn ancestry(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut cur = self.nodes[&id].parent;
        while let Some(p) = cur {
            chain.push(p);
            cur = self.nodes[&p].parent;
        }
        chain
    }

    /// Whether `id` is `ancestor` or lies below it.
    #[must_use]
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        self.ancestry(id).contains(&ancestor)
    }

    /// On-disk directory for a node under `root_dir`.
    #[must_use]
    pub fn path_of(&self, root_dir: &Path, id: NodeId) -> PathBuf {
        let location = &self.nodes[&id].location;
        if location.is_empty() {
            root_dir.to_path_buf()
        } else {
            root_dir.join(location)
        }
    }

    /// Declare an edge on `from`. The first declaration of a name wins.
    pub fn add_edge(&mut self, from: NodeId, spec: PackageSpec) {
        self[from]
            .edges_out
            .entry(spec.name.clone())
            .or_insert(Edge { spec, to: None });
    }

    /// Create a node named `name` as a child of `parent`.
    ///
    /// Any existing same-name child is removed first, together with its
    /// subtree.
    pub fn place(&mut self, parent: NodeId, name: &str, version: &str) -> NodeId {
        if let Some(existing) = self.nodes[&parent].children.get(name).copied() {
            self.remove_subtree(existing);
        }

        let id = NodeId(self.next_id);
        self.next_id += 1;

        let parent_location = &self.nodes[&parent].location;
        let location = if parent_location.is_empty() {
            format!("node_modules/{name}")
        } else {
            format!("{parent_location}/node_modules/{name}")
        };

        let node = TreeNode {
            name: name.to_string(),
            version: version.to_string(),
            location: location.clone(),
            parent: Some(parent),
            ..TreeNode::default()
        };
        self.nodes.insert(id, node);
        self[parent].children.insert(name.to_string(), id);
        self.by_name.entry(name.to_string()).or_default().insert(id);
        self.by_location.insert(location, id);
        id
    }

    /// Remove `id` and everything nested under it.
    ///
    /// Returns the surviving `(dependent, name)` edges that pointed into the
    /// removed subtree; they are left unresolved.
    pub fn remove_subtree(&mut self, id: NodeId) -> Vec<(NodeId, String)> {
        if id == self.root || !self.nodes.contains_key(&id) {
            return Vec::new();
        }

        let mut doomed = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            doomed.insert(cur);
            stack.extend(self.nodes[&cur].children.values().copied());
        }

        let mut orphaned = Vec::new();
        for cur in &doomed {
            let node = &self.nodes[cur];
            let dependents: Vec<NodeId> = node.edges_in.iter().copied().collect();
            let targets: Vec<NodeId> = node.edges_out.values().filter_map(|e| e.to).collect();
            let name = node.name.clone();
            for from in dependents {
                if doomed.contains(&from) {
                    continue;
                }
                if let Some(edge) = self[from].edges_out.get_mut(&name) {
                    if edge.to == Some(*cur) {
                        edge.to = None;
                        orphaned.push((from, name.clone()));
                    }
                }
            }
            for to in targets {
                if let Some(target) = self.nodes.get_mut(&to) {
                    target.edges_in.remove(cur);
                }
            }
        }

        if let Some(parent) = self.nodes[&id].parent {
            let name = self.nodes[&id].name.clone();
            self[parent].children.remove(&name);
        }
        for cur in doomed {
            if let Some(node) = self.nodes.remove(&cur) {
                self.by_location.remove(&node.location);
                if let Some(set) = self.by_name.get_mut(&node.name) {
                    set.remove(&cur);
                    if set.is_empty() {
                        self.by_name.remove(&node.name);
                    }
                }
            }
        }
        orphaned
    }

    /// The node `from` would load for `name`: its own child, else the
    /// nearest ancestor's.
    #[must_use]
    pub fn resolve_visible(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let node = &self.nodes[&id];
            if let Some(child) = node.children.get(name) {
                return Some(*child);
            }
            cur = node.parent;
        }
        None
    }

    /// Point `from`'s edge for `name` at `to`.
    pub fn link(&mut self, from: NodeId, name: &str, to: NodeId) {
        self.unlink(from, name);
        if let Some(edge) = self[from].edges_out.get_mut(name) {
            edge.to = Some(to);
            self[to].edges_in.insert(from);
        }
    }

    /// Leave `from`'s edge for `name` unresolved.
    pub fn unlink(&mut self, from: NodeId, name: &str) {
        let old = self[from].edges_out.get_mut(name).and_then(|e| e.to.take());
        if let Some(old) = old {
            let still_used = self.nodes[&from]
                .edges_out
                .values()
                .any(|e| e.to == Some(old));
            if !still_used {
                if let Some(target) = self.nodes.get_mut(&old) {
                    target.edges_in.remove(&from);
                }
            }
        }
    }

    /// Link every unresolved edge to whatever node is visible.
    pub fn link_visible(&mut self) {
        let pending: Vec<(NodeId, String)> = self
            .nodes
            .iter()
            .flat_map(|(id, node)| {
                node.edges_out
                    .iter()
                    .filter(|(_, e)| e.to.is_none())
                    .map(|(name, _)| (*id, name.clone()))
            })
            .collect();
        for (from, name) in pending {
            if let Some(to) = self.resolve_visible(from, &name) {
                if to != from {
                    self.link(from, &name, to);
                }
            }
        }
    }

    /// Classify `from`'s edge for `name`.
    #[must_use]
    pub fn edge_state(&self, from: NodeId, name: &str) -> Option<EdgeState> {
        let edge = self.nodes[&from].edges_out.get(name)?;
        Some(match edge.to {
            None => EdgeState::Missing,
            Some(to) if node_satisfies(&self.nodes[&to], &edge.spec) => EdgeState::Valid,
            Some(_) => EdgeState::Invalid,
        })
    }

    /// Whether an edge of this kind keeps its target installed.
    fn installs(from_root: bool, kind: DepKind) -> bool {
        match kind {
            DepKind::Prod | DepKind::Optional => true,
            DepKind::Dev | DepKind::Peer | DepKind::PeerOptional => from_root,
        }
    }

    /// Remove every node not reachable from the root through installing
    /// edges. Returns the removed locations.
    pub fn prune_unreachable(&mut self) -> Vec<String> {
        let reachable = self.reachable();
        let mut removed = Vec::new();
        let unreachable: Vec<NodeId> = self
            .by_location
            .values()
            .copied()
            .filter(|id| !reachable.contains(id))
            .collect();
        for id in unreachable {
            if let Some(node) = self.nodes.get(&id) {
                removed.push(node.location.clone());
                self.remove_subtree(id);
            }
        }
        removed.sort();
        removed
    }

    fn reachable(&self) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::from([self.root]);
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            let from_root = id == self.root;
            for edge in self.nodes[&id].edges_out.values() {
                let Some(to) = edge.to else { continue };
                // peers of installed packages still keep their target alive
                if (Self::installs(from_root, edge.spec.kind) || edge.spec.kind.is_peer())
                    && seen.insert(to)
                {
                    queue.push_back(to);
                }
            }
        }
        seen
    }

    /// Recompute `dev`, `optional`, `peer` and `extraneous` for every node.
    ///
    /// A flag stays set only if every path from the root carries it: `dev`
    /// through a root dev edge, `optional` through any optional edge, `peer`
    /// through any peer edge. Nodes no path reaches are extraneous.
    pub fn compute_flags(&mut self) {
        let root = self.root;
        let mut reached = BTreeSet::new();
        for (id, node) in &mut self.nodes {
            let is_root = *id == root;
            node.dev = !is_root;
            node.optional = !is_root;
            node.peer = !is_root;
            node.extraneous = false;
        }

        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            let (dev, optional, peer) = {
                let n = &self.nodes[&id];
                (n.dev, n.optional, n.peer)
            };
            let edges: Vec<(NodeId, DepKind)> = self.nodes[&id]
                .edges_out
                .values()
                .filter_map(|e| e.to.map(|to| (to, e.spec.kind)))
                .collect();
            for (to, kind) in edges {
                if to == root || !(Self::installs(id == root, kind) || kind.is_peer()) {
                    continue;
                }
                let via_dev = if id == root { kind == DepKind::Dev } else { dev };
                let via_optional = optional || kind.is_optional();
                let via_peer = peer || kind.is_peer();

                let Some(target) = self.nodes.get_mut(&to) else {
                    continue;
                };
                let before = (target.dev, target.optional, target.peer);
                target.dev &= via_dev;
                target.optional &= via_optional;
                target.peer &= via_peer;
                let changed = before != (target.dev, target.optional, target.peer);
                if reached.insert(to) || changed {
                    queue.push_back(to);
                }
            }
        }

        for (id, node) in &mut self.nodes {
            if *id != root && !reached.contains(id) {
                node.extraneous = true;
                node.dev = false;
                node.optional = false;
                node.peer = false;
            }
        }
    }

    /// Every dependency name declared by any node.
    #[must_use]
    pub fn declared_names(&self) -> BTreeSet<String> {
        self.nodes
            .values()
            .flat_map(|n| n.edges_out.keys().cloned())
            .collect()
    }

    /// Check structural invariants; returns the first violation found.
    ///
    /// # Errors
    /// Describes the broken invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (id, node) in &self.nodes {
            if self.by_location.get(&node.location) != Some(id) {
                return Err(format!("{} is not indexed by location", node.location));
            }
            if let Some(parent) = node.parent {
                let Some(p) = self.nodes.get(&parent) else {
                    return Err(format!("{} has a missing parent", node.location));
                };
                if p.children.get(&node.name) != Some(id) {
                    return Err(format!("{} is not its parent's child", node.location));
                }
            } else if *id != self.root {
                return Err(format!("{} has no placement", node.location));
            }
            for (name, edge) in &node.edges_out {
                if let Some(to) = edge.to {
                    let Some(target) = self.nodes.get(&to) else {
                        return Err(format!("{} -> {name} points at a removed node", node.location));
                    };
                    if !target.edges_in.contains(id) {
                        return Err(format!("{} -> {name} lacks a back-reference", node.location));
                    }
                }
            }
            for from in &node.edges_in {
                let linked = self
                    .nodes
                    .get(from)
                    .is_some_and(|f| f.edges_out.values().any(|e| e.to == Some(*id)));
                if !linked {
                    return Err(format!("{} has a stale dependent", node.location));
                }
            }
        }
        Ok(())
    }
}
