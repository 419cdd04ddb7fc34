//! Publishable lockfile generation.

use super::actual::TreeReader;
use super::error::PkgError;
use super::lockfile::{choose_filename, load_virtual, save, PACKAGE_LOCK, SHRINKWRAP};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of a shrinkwrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkwrapOutcome {
    /// The written `npm-shrinkwrap.json`.
    pub path: PathBuf,
    /// `package-lock.json` that was removed in favor of the shrinkwrap.
    pub renamed_from: Option<PathBuf>,
    pub notice: String,
}

/// Write `npm-shrinkwrap.json` for the project in `dir`.
///
/// The tree comes from the existing lockfile when there is one, otherwise
/// from what is installed.
///
/// # Errors
/// Returns `GlobalNotSupported` in global mode, and lockfile or IO errors
/// otherwise.
pub fn shrinkwrap(
    dir: &Path,
    global: bool,
    reader: &dyn TreeReader,
) -> Result<ShrinkwrapOutcome, PkgError> {
    if global {
        return Err(PkgError::global_not_supported("shrinkwrap"));
    }

    let choice = choose_filename(dir, true);
    let mut graph = match load_virtual(dir)? {
        Some(graph) => graph,
        None => {
            debug!(dir = %dir.display(), "no lockfile, shrinkwrapping the installed tree");
            reader.read_actual(dir)?
        }
    };

    let meta = graph.meta.clone();
    let new_file = meta.hidden_lockfile || !meta.loaded_from_disk;
    let updated_version = (meta.original_lockfile_version != meta.lockfile_version)
        .then_some(meta.lockfile_version);

    graph.meta.hidden_lockfile = false;
    graph.meta.filename = SHRINKWRAP.to_string();
    let path = save(&graph, dir, SHRINKWRAP)?;

    let mut renamed_from = None;
    let notice = if new_file {
        format!("created a lockfile as {SHRINKWRAP}")
    } else if meta.filename == PACKAGE_LOCK {
        if let Some(old) = choice.rename_from {
            fs::remove_file(&old)
                .map_err(|e| PkgError::io(format!("Failed to remove {}: {e}", old.display())))?;
            renamed_from = Some(old);
        }
        match updated_version {
            Some(v) => format!("{PACKAGE_LOCK} has been renamed to {SHRINKWRAP} and updated to version {v}"),
            None => format!("{PACKAGE_LOCK} has been renamed to {SHRINKWRAP}"),
        }
    } else {
        match updated_version {
            Some(v) => format!("{SHRINKWRAP} updated to version {v}"),
            None => format!("{SHRINKWRAP} up to date"),
        }
    };

    info!(path = %path.display(), "{notice}");
    Ok(ShrinkwrapOutcome {
        path,
        renamed_from,
        notice,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::actual::FsTreeReader;
    use crate::pkg::error::ErrorKind;
    use crate::pkg::lockfile::{decode, HIDDEN_LOCKFILE};
    use tempfile::tempdir;

    const V2: &str = r#"{
        "name": "app",
        "version": "1.0.0",
        "lockfileVersion": 2,
        "requires": true,
        "packages": {
            "": { "name": "app", "version": "1.0.0", "dependencies": { "a": "^1.0.0" } },
            "node_modules/a": { "version": "1.0.0" }
        }
    }"#;

    const V1: &str = r#"{
        "name": "app",
        "version": "1.0.0",
        "lockfileVersion": 1,
        "dependencies": { "a": { "version": "1.0.0" } }
    }"#;

    fn project() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name": "app", "version": "1.0.0", "dependencies": {"a": "^1.0.0"}}"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_renames_package_lock() {
        let dir = project();
        fs::write(dir.path().join(PACKAGE_LOCK), V2).unwrap();

        let outcome = shrinkwrap(dir.path(), false, &FsTreeReader).unwrap();
        assert_eq!(outcome.notice, "package-lock.json has been renamed to npm-shrinkwrap.json");
        assert_eq!(outcome.renamed_from, Some(dir.path().join(PACKAGE_LOCK)));
        assert!(!dir.path().join(PACKAGE_LOCK).exists());

        let written = fs::read_to_string(dir.path().join(SHRINKWRAP)).unwrap();
        let graph = decode(&written).unwrap();
        assert!(graph.at_location("node_modules/a").is_some());
    }

    #[test]
    fn test_rename_with_upgrade() {
        let dir = project();
        fs::write(dir.path().join(PACKAGE_LOCK), V1).unwrap();

        let outcome = shrinkwrap(dir.path(), false, &FsTreeReader).unwrap();
        assert_eq!(
            outcome.notice,
            "package-lock.json has been renamed to npm-shrinkwrap.json and updated to version 2"
        );
    }

    #[test]
    fn test_existing_shrinkwrap() {
        let dir = project();
        fs::write(dir.path().join(SHRINKWRAP), V2).unwrap();
        let outcome = shrinkwrap(dir.path(), false, &FsTreeReader).unwrap();
        assert_eq!(outcome.notice, "npm-shrinkwrap.json up to date");
        assert!(outcome.renamed_from.is_none());

        fs::write(dir.path().join(SHRINKWRAP), V1).unwrap();
        let outcome = shrinkwrap(dir.path(), false, &FsTreeReader).unwrap();
        assert_eq!(outcome.notice, "npm-shrinkwrap.json updated to version 2");
    }

    #[test]
    fn test_created_from_installed_tree() {
        let dir = project();
        let a = dir.path().join("node_modules/a");
        fs::create_dir_all(&a).unwrap();
        fs::write(a.join("package.json"), r#"{"name": "a", "version": "1.0.0"}"#).unwrap();

        let outcome = shrinkwrap(dir.path(), false, &FsTreeReader).unwrap();
        assert_eq!(outcome.notice, "created a lockfile as npm-shrinkwrap.json");
        let graph = decode(&fs::read_to_string(&outcome.path).unwrap()).unwrap();
        assert_eq!(graph[graph.at_location("node_modules/a").unwrap()].version, "1.0.0");
    }

    #[test]
    fn test_hidden_lockfile_counts_as_new() {
        let dir = project();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join(HIDDEN_LOCKFILE), V2).unwrap();

        let outcome = shrinkwrap(dir.path(), false, &FsTreeReader).unwrap();
        assert_eq!(outcome.notice, "created a lockfile as npm-shrinkwrap.json");
        assert!(dir.path().join(HIDDEN_LOCKFILE).exists());
    }

    #[test]
    fn test_global_not_supported() {
        let dir = project();
        let err = shrinkwrap(dir.path(), true, &FsTreeReader).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GlobalNotSupported);
        assert_eq!(err.code(), "PKG_GLOBAL_NOT_SUPPORTED");
        assert_eq!(err.message(), "`shrinkwrap` does not work for global packages");
        assert!(!dir.path().join(SHRINKWRAP).exists());
    }
}
