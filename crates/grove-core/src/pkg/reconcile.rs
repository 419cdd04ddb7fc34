//! Virtual/actual tree reconciliation.
//!
//! Compares the tree a lockfile describes against the tree on disk and
//! produces the location-ordered operations that bring disk in line.

use super::tree::{DependencyGraph, TreeNode};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// What to do at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Remove,
    Update,
    Move,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Update => "update",
            Self::Move => "move",
        })
    }
}

/// One change between two trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub kind: OperationKind,
    /// Target location; the current location for a removal.
    pub location: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_version: Option<String>,
    /// Where a moved package currently lives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_location: Option<String>,
    /// Tarball to fetch for additions and updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl Operation {
    fn new(kind: OperationKind, location: &str, name: &str) -> Self {
        Self {
            kind,
            location: location.to_string(),
            name: name.to_string(),
            from_version: None,
            to_version: None,
            from_location: None,
            resolved: None,
            integrity: None,
        }
    }

    fn target(mut self, node: &TreeNode) -> Self {
        self.to_version = Some(node.version.clone());
        self.resolved.clone_from(&node.resolved);
        self.integrity.clone_from(&node.integrity);
        self
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OperationKind::Add => write!(
                f,
                "add {}@{} at {}",
                self.name,
                self.to_version.as_deref().unwrap_or(""),
                self.location
            ),
            OperationKind::Remove => write!(
                f,
                "remove {}@{} at {}",
                self.name,
                self.from_version.as_deref().unwrap_or(""),
                self.location
            ),
            OperationKind::Update => write!(
                f,
                "update {} {} -> {} at {}",
                self.name,
                self.from_version.as_deref().unwrap_or(""),
                self.to_version.as_deref().unwrap_or(""),
                self.location
            ),
            OperationKind::Move => write!(
                f,
                "move {}@{} {} -> {}",
                self.name,
                self.to_version.as_deref().unwrap_or(""),
                self.from_location.as_deref().unwrap_or(""),
                self.location
            ),
        }
    }
}

/// Options for [`diff_trees`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Remove every location only found on disk, even if some package in
    /// the virtual tree declares its name.
    pub prune: bool,
}

/// Operations that turn `actual` into `virtual_tree`.
///
/// Error nodes in either tree are ignored. The result is ordered by
/// location.
#[must_use]
pub fn diff_trees(
    virtual_tree: &DependencyGraph,
    actual: &DependencyGraph,
    options: DiffOptions,
) -> Vec<Operation> {
    let wanted = placed(virtual_tree);
    let present = placed(actual);

    let mut ops = Vec::new();
    let mut only_virtual: Vec<&TreeNode> = Vec::new();
    for (location, node) in &wanted {
        match present.get(location) {
            None => only_virtual.push(*node),
            Some(current) if differs(current, node) => {
                let mut op = Operation::new(OperationKind::Update, location, &node.name).target(node);
                op.from_version = Some(current.version.clone());
                ops.push(op);
            }
            Some(_) => {}
        }
    }
    let mut only_actual: Vec<&TreeNode> = present
        .iter()
        .filter(|(location, _)| !wanted.contains_key(*location))
        .map(|(_, node)| *node)
        .collect();

    // same package moving between locations is a rename, not remove + add
    let mut moved = BTreeSet::new();
    for target in &only_virtual {
        let source = only_actual
            .iter()
            .position(|node| node.name == target.name && !differs(node, target));
        if let Some(index) = source {
            let source = only_actual.remove(index);
            moved.insert(target.location.clone());
            let mut op = Operation::new(OperationKind::Move, &target.location, &target.name).target(target);
            op.from_location = Some(source.location.clone());
            ops.push(op);
        }
    }
    for node in only_virtual {
        if !moved.contains(&node.location) {
            ops.push(Operation::new(OperationKind::Add, &node.location, &node.name).target(node));
        }
    }

    let declared = virtual_tree.declared_names();
    for node in only_actual {
        if options.prune || !declared.contains(&node.name) {
            let mut op = Operation::new(OperationKind::Remove, &node.location, &node.name);
            op.from_version = Some(node.version.clone());
            ops.push(op);
        }
    }

    ops.sort_by(|a, b| a.location.cmp(&b.location).then(a.kind.cmp(&b.kind)));
    ops
}

fn placed(graph: &DependencyGraph) -> BTreeMap<&str, &TreeNode> {
    graph
        .iter()
        .filter(|(_, node)| !node.is_root() && node.error.is_none())
        .map(|(_, node)| (node.location.as_str(), node))
        .collect()
}

fn differs(a: &TreeNode, b: &TreeNode) -> bool {
    a.version != b.version || a.registry_name() != b.registry_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::lockfile::decode;

    fn tree(packages: &[(&str, &str)]) -> DependencyGraph {
        let entries: Vec<String> = packages
            .iter()
            .map(|(loc, version)| format!(r#""{loc}": {{ "version": "{version}" }}"#))
            .collect();
        let raw = format!(
            r#"{{ "lockfileVersion": 2, "packages": {{ "": {{ "name": "app", "dependencies": {{ "a": "*", "b": "*", "c": "*" }} }}{}{} }} }}"#,
            if entries.is_empty() { "" } else { "," },
            entries.join(",")
        );
        decode(&raw).unwrap()
    }

    fn summary(ops: &[Operation]) -> Vec<String> {
        ops.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_identical_trees_have_no_operations() {
        let t = tree(&[("node_modules/a", "1.0.0"), ("node_modules/a/node_modules/b", "1.0.0")]);
        assert!(diff_trees(&t, &t.clone(), DiffOptions::default()).is_empty());
    }

    #[test]
    fn test_add_update_remove() {
        let virtual_tree = tree(&[("node_modules/a", "2.0.0"), ("node_modules/b", "1.0.0")]);
        let actual = tree(&[
            ("node_modules/a", "1.0.0"),
            ("node_modules/stale", "0.1.0"),
        ]);

        let ops = diff_trees(&virtual_tree, &actual, DiffOptions::default());
        assert_eq!(
            summary(&ops),
            [
                "update a 1.0.0 -> 2.0.0 at node_modules/a",
                "add b@1.0.0 at node_modules/b",
                "remove stale@0.1.0 at node_modules/stale",
            ]
        );
    }

    #[test]
    fn test_declared_names_kept_unless_pruning() {
        let virtual_tree = tree(&[("node_modules/a", "1.0.0")]);
        // c is declared by the root but not placed in the virtual tree
        let actual = tree(&[("node_modules/a", "1.0.0"), ("node_modules/c", "1.0.0")]);

        assert!(diff_trees(&virtual_tree, &actual, DiffOptions::default()).is_empty());
        let ops = diff_trees(&virtual_tree, &actual, DiffOptions { prune: true });
        assert_eq!(summary(&ops), ["remove c@1.0.0 at node_modules/c"]);
    }

    #[test]
    fn test_relocation_is_a_move() {
        let virtual_tree = tree(&[("node_modules/a", "1.0.0"), ("node_modules/b", "1.0.0")]);
        let actual = tree(&[
            ("node_modules/a", "1.0.0"),
            ("node_modules/a/node_modules/b", "1.0.0"),
        ]);

        let ops = diff_trees(&virtual_tree, &actual, DiffOptions::default());
        assert_eq!(
            summary(&ops),
            ["move b@1.0.0 node_modules/a/node_modules/b -> node_modules/b"]
        );
        assert_eq!(ops[0].from_location.as_deref(), Some("node_modules/a/node_modules/b"));
    }

    #[test]
    fn test_against_empty_tree_adds_everything_in_order() {
        let virtual_tree = tree(&[
            ("node_modules/b", "1.0.0"),
            ("node_modules/a", "1.0.0"),
            ("node_modules/a/node_modules/b", "2.0.0"),
        ]);
        let empty = DependencyGraph::new("app", "1.0.0");

        let ops = diff_trees(&virtual_tree, &empty, DiffOptions::default());
        let locations: Vec<&str> = ops.iter().map(|o| o.location.as_str()).collect();
        assert_eq!(
            locations,
            ["node_modules/a", "node_modules/a/node_modules/b", "node_modules/b"]
        );
        assert!(ops.iter().all(|o| o.kind == OperationKind::Add));
    }

    #[test]
    fn test_operation_serializes_compactly() {
        let virtual_tree = tree(&[("node_modules/a", "1.0.0")]);
        let empty = DependencyGraph::new("app", "1.0.0");
        let ops = diff_trees(&virtual_tree, &empty, DiffOptions::default());
        let json = serde_json::to_value(&ops[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "add",
                "location": "node_modules/a",
                "name": "a",
                "toVersion": "1.0.0"
            })
        );
    }
}
