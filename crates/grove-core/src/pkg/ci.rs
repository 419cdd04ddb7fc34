//! Clean-room install planning.
//!
//! `ci` installs exactly what the lockfile says into an emptied
//! `node_modules`. Everything here is checked before any registry access so
//! a misconfigured run fails fast.

use super::error::PkgError;
use super::lockfile::{load_virtual, lockfile_exists};
use super::reconcile::{diff_trees, DiffOptions, Operation};
use super::tree::DependencyGraph;
use std::path::{Path, PathBuf};
use tracing::info;

/// Lifecycle events run by a clean install, in order.
pub const LIFECYCLE_EVENTS: [&str; 7] = [
    "preinstall",
    "install",
    "postinstall",
    "prepublish",
    "preprepare",
    "prepare",
    "postprepare",
];

/// Options for [`ci_plan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CiOptions {
    pub global: bool,
    pub ignore_scripts: bool,
}

/// What a clean install will do.
#[derive(Debug)]
pub struct CiPlan {
    /// Tree read from the lockfile.
    pub virtual_tree: DependencyGraph,
    /// Every package to install, location-ordered.
    pub operations: Vec<Operation>,
    /// Root lifecycle events to run after reification.
    pub lifecycle_events: Vec<&'static str>,
    /// Directory whose contents are cleared first.
    pub node_modules: PathBuf,
    /// Always false: `ci` never rewrites the lockfile.
    pub save: bool,
}

/// Plan a clean install of `dir` from its lockfile.
///
/// # Errors
/// Returns `GlobalNotSupported` in global mode, `MissingLockfile` when
/// neither `npm-shrinkwrap.json` nor `package-lock.json` exists, and
/// `CorruptLockfile` for a lockfile that cannot be read.
pub fn ci_plan(dir: &Path, options: &CiOptions) -> Result<CiPlan, PkgError> {
    if options.global {
        return Err(PkgError::global_not_supported("ci"));
    }
    if !lockfile_exists(dir) {
        return Err(PkgError::missing_lockfile());
    }
    let virtual_tree = load_virtual(dir)?.ok_or_else(PkgError::missing_lockfile)?;

    let root = &virtual_tree[virtual_tree.root()];
    let empty = DependencyGraph::new(root.name.clone(), root.version.clone());
    let operations = diff_trees(&virtual_tree, &empty, DiffOptions::default());
    let lifecycle_events = if options.ignore_scripts {
        Vec::new()
    } else {
        LIFECYCLE_EVENTS.to_vec()
    };

    info!(
        lockfile = %virtual_tree.meta.filename,
        packages = operations.len(),
        "planned clean install"
    );
    Ok(CiPlan {
        virtual_tree,
        operations,
        lifecycle_events,
        node_modules: dir.join("node_modules"),
        save: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::ErrorKind;
    use crate::pkg::lockfile::{HIDDEN_LOCKFILE, PACKAGE_LOCK, SHRINKWRAP};
    use crate::pkg::reconcile::OperationKind;
    use std::fs;
    use tempfile::tempdir;

    const LOCK: &str = r#"{
        "name": "app",
        "lockfileVersion": 2,
        "packages": {
            "": { "name": "app", "dependencies": { "a": "^1.0.0" } },
            "node_modules/a": { "version": "1.0.0", "dependencies": { "b": "^1.0.0" } },
            "node_modules/b": { "version": "1.1.0" }
        }
    }"#;

    #[test]
    fn test_missing_lockfile() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name":"app"}"#).unwrap();

        let err = ci_plan(dir.path(), &CiOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingLockfile);
        assert_eq!(err.code(), "PKG_LOCK_MISSING");
    }

    #[test]
    fn test_hidden_lockfile_is_not_enough() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join(HIDDEN_LOCKFILE), LOCK).unwrap();

        let err = ci_plan(dir.path(), &CiOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingLockfile);
    }

    #[test]
    fn test_global_rejected_before_lockfile_check() {
        let dir = tempdir().unwrap();
        let options = CiOptions {
            global: true,
            ..CiOptions::default()
        };
        let err = ci_plan(dir.path(), &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GlobalNotSupported);
        assert_eq!(err.message(), "`ci` does not work for global packages");
    }

    #[test]
    fn test_plan_installs_whole_lockfile() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(PACKAGE_LOCK), LOCK).unwrap();
        // an installed copy does not matter: node_modules is cleared first
        fs::create_dir_all(dir.path().join("node_modules/a")).unwrap();

        let plan = ci_plan(dir.path(), &CiOptions::default()).unwrap();
        assert!(!plan.save);
        assert_eq!(plan.node_modules, dir.path().join("node_modules"));
        assert_eq!(plan.lifecycle_events, LIFECYCLE_EVENTS);
        let added: Vec<(&str, Option<&str>)> = plan
            .operations
            .iter()
            .map(|o| {
                assert_eq!(o.kind, OperationKind::Add);
                (o.location.as_str(), o.to_version.as_deref())
            })
            .collect();
        assert_eq!(
            added,
            [("node_modules/a", Some("1.0.0")), ("node_modules/b", Some("1.1.0"))]
        );
    }

    #[test]
    fn test_shrinkwrap_used_and_scripts_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SHRINKWRAP), LOCK).unwrap();
        let options = CiOptions {
            ignore_scripts: true,
            ..CiOptions::default()
        };

        let plan = ci_plan(dir.path(), &options).unwrap();
        assert_eq!(plan.virtual_tree.meta.filename, SHRINKWRAP);
        assert!(plan.lifecycle_events.is_empty());
    }

    #[test]
    fn test_corrupt_lockfile_surfaces() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(PACKAGE_LOCK), r#"{"lockfileVersion": 7}"#).unwrap();
        let err = ci_plan(dir.path(), &CiOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptLockfile);
    }
}
