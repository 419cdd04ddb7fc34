//! Turning `diff` arguments into the two specs to compare.
//!
//! Bare names and ranges are filled in from the project in the working
//! directory and from the installed tree, so `diff 1.0.0 2.0.0` compares two
//! published versions of the current project and `diff lodash` compares the
//! installed copy of lodash against the version its dependents would want.

use super::actual::TreeReader;
use super::cache::PackumentCache;
use super::deps::read_manifest;
use super::error::PkgError;
use super::spec::{ParsedSpec, SpecType};
use super::tree::{DependencyGraph, NodeId};
use super::version::{is_valid_range, pick_manifest};
use std::path::Path;
use tracing::debug;

const NEEDS_PROJECT: &str = "Needs multiple arguments to compare or run from a project dir.";
const NEEDS_PROJECT_FOR_VERSIONS: &str =
    "Needs to be run from a project dir in order to diff two versions.";

/// Inputs of a `diff` run.
#[derive(Debug, Clone, Copy)]
pub struct DiffRequest<'a> {
    /// Values of every `--diff` flag, in order.
    pub args: &'a [String],
    /// Paths inside the packages to limit the diff to.
    pub files: &'a [String],
    /// Project directory (the global prefix in global mode).
    pub prefix: &'a Path,
    /// Dist-tag compared against when no argument is given.
    pub tag: &'a str,
    pub global: bool,
}

/// The two sides of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSpecs {
    pub a: String,
    pub b: String,
    pub files: Vec<String>,
}

/// Work out which two package specs `diff` should compare.
///
/// # Errors
/// `TooManyDiffArgs` for more than two arguments, `AmbiguousSpec` when the
/// arguments need a project that is not there, `SpecTypeNotSupported` for a
/// single spec that is neither a registry spec nor a directory, and registry
/// errors while picking the version to compare against.
pub async fn resolve_diff_specs(
    request: &DiffRequest<'_>,
    reader: &dyn TreeReader,
    cache: &PackumentCache,
) -> Result<DiffSpecs, PkgError> {
    let args: Vec<&str> = request
        .args
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect();

    let (a, b) = match args.as_slice() {
        [] => {
            let name = project_name(request.prefix).ok_or_else(|| PkgError::ambiguous_spec(NEEDS_PROJECT))?;
            (format!("{name}@{}", request.tag), self_spec(request.prefix))
        }
        [single] => single_spec(request, single, reader, cache).await?,
        [first, second] => {
            let (a, b) = name_versions(request.prefix, first, second)?;
            let mut actual = InstalledTree::new(reader, request.prefix);
            (bare_to_installed(&a, &mut actual)?, bare_to_installed(&b, &mut actual)?)
        }
        _ => return Err(PkgError::too_many_diff_args()),
    };

    debug!(%a, %b, "diff specs");
    Ok(DiffSpecs {
        a,
        b,
        files: request.files.to_vec(),
    })
}

async fn single_spec(
    request: &DiffRequest<'_>,
    arg: &str,
    reader: &dyn TreeReader,
    cache: &PackumentCache,
) -> Result<(String, String), PkgError> {
    let prefix = request.prefix;
    let has_project = prefix.join("package.json").is_file();
    let this_project = || {
        if has_project {
            Ok(self_spec(prefix))
        } else {
            Err(PkgError::ambiguous_spec(NEEDS_PROJECT))
        }
    };

    if is_valid_range(arg) {
        let name = project_name(prefix).ok_or_else(|| PkgError::ambiguous_spec(NEEDS_PROJECT))?;
        return Ok((format!("{name}@{arg}"), this_project()?));
    }

    let spec = ParsedSpec::parse(arg)?;
    if spec.spec_type == SpecType::Directory {
        return Ok((format!("file:{}", spec.fetch_spec), this_project()?));
    }
    let Some(name) = spec.name.clone().filter(|_| spec.is_registry()) else {
        return Err(PkgError::spec_type_not_supported(spec.spec_type.as_str()));
    };

    let mut actual = InstalledTree::new(reader, prefix);
    let Some((tree, node)) = actual.installed(&name) else {
        return Ok((format!("{name}@{}", spec.fetch_spec), this_project()?));
    };
    let a = format!("{name}@{}", installed_spec(prefix, tree, node));

    if !is_bare(&spec) {
        return Ok((a, format!("{name}@{}", spec.raw_spec)));
    }

    // compare against what the dependents would get today
    let target = if request.global {
        "*".to_string()
    } else {
        declared_range(tree, node, &name).unwrap_or_default()
    };
    let packument = cache.fetch(spec.registry_name().unwrap_or(&name)).await?;
    let wanted = pick_manifest(&packument, &target)?.version.to_string();
    Ok((a, format!("{name}@{wanted}")))
}

/// Give a bare version or range the package name of the other argument, or
/// of the project when both are versions.
fn name_versions(prefix: &Path, a: &str, b: &str) -> Result<(String, String), PkgError> {
    match (is_valid_range(a), is_valid_range(b)) {
        (true, true) => {
            let name = project_name(prefix)
                .ok_or_else(|| PkgError::ambiguous_spec(NEEDS_PROJECT_FOR_VERSIONS))?;
            Ok((format!("{name}@{a}"), format!("{name}@{b}")))
        }
        (false, true) => Ok((a.to_string(), format!("{}@{b}", spec_name(a)?))),
        (true, false) => Ok((format!("{}@{a}", spec_name(b)?), b.to_string())),
        (false, false) => Ok((a.to_string(), b.to_string())),
    }
}

/// A bare package name means the installed copy, or `latest` if there is
/// none.
fn bare_to_installed(arg: &str, actual: &mut InstalledTree<'_>) -> Result<String, PkgError> {
    let spec = ParsedSpec::parse(arg)?;
    let Some(name) = spec.name.as_deref().filter(|_| is_bare(&spec)) else {
        return Ok(arg.to_string());
    };
    let prefix = actual.prefix;
    Ok(match actual.installed(name) {
        Some((tree, node)) => format!("{name}@{}", installed_spec(prefix, tree, node)),
        None => format!("{name}@{}", spec.fetch_spec),
    })
}

fn spec_name(arg: &str) -> Result<String, PkgError> {
    ParsedSpec::parse(arg)?
        .name
        .ok_or_else(|| PkgError::ambiguous_spec(format!("Cannot tell which package '{arg}' is")))
}

fn is_bare(spec: &ParsedSpec) -> bool {
    spec.raw_spec.is_empty() || spec.raw_spec == "*"
}

fn project_name(prefix: &Path) -> Option<String> {
    match read_manifest(&prefix.join("package.json")) {
        Ok(loaded) => Some(loaded.manifest.name).filter(|n| !n.is_empty()),
        Err(e) => {
            debug!(error = %e, "could not read project package.json");
            None
        }
    }
}

fn self_spec(prefix: &Path) -> String {
    format!("file:{}", prefix.display())
}

fn installed_spec(prefix: &Path, tree: &DependencyGraph, node: NodeId) -> String {
    format!("file:{}", tree.path_of(prefix, node).display())
}

/// Range the root declares for `name`, else the first dependent's.
fn declared_range(tree: &DependencyGraph, node: NodeId, name: &str) -> Option<String> {
    let root = &tree[tree.root()];
    root.edges_out
        .get(name)
        .or_else(|| {
            tree[node]
                .edges_in
                .iter()
                .find_map(|from| tree[*from].edges_out.get(name))
        })
        .map(|edge| edge.spec.range.clone())
}

/// The installed tree, read on first use. A tree that cannot be read counts
/// as nothing installed.
struct InstalledTree<'a> {
    reader: &'a dyn TreeReader,
    prefix: &'a Path,
    tree: Option<Option<DependencyGraph>>,
}

impl<'a> InstalledTree<'a> {
    fn new(reader: &'a dyn TreeReader, prefix: &'a Path) -> Self {
        Self {
            reader,
            prefix,
            tree: None,
        }
    }

    fn installed(&mut self, name: &str) -> Option<(&DependencyGraph, NodeId)> {
        let (reader, prefix) = (self.reader, self.prefix);
        let tree = self
            .tree
            .get_or_insert_with(|| match reader.read_actual(prefix) {
                Ok(tree) => Some(tree),
                Err(e) => {
                    debug!(error = %e, "failed to load actual install tree");
                    None
                }
            })
            .as_ref()?;
        let node = tree.nodes_named(name).into_iter().find(|id| {
            let node = &tree[*id];
            !node.is_root() && node.error.is_none() && !node.version.is_empty()
        })?;
        Some((tree, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::actual::FsTreeReader;
    use crate::pkg::error::ErrorKind;
    use crate::pkg::testing::MockRegistry;
    use std::fs;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn session(registry: MockRegistry) -> PackumentCache {
        PackumentCache::new(Arc::new(registry))
    }

    fn project(package_json: &str) -> TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), package_json).unwrap();
        dir
    }

    fn install(dir: &Path, location: &str, name: &str, version: &str) {
        let path = dir.join(location);
        fs::create_dir_all(&path).unwrap();
        fs::write(
            path.join("package.json"),
            format!(r#"{{"name": "{name}", "version": "{version}"}}"#),
        )
        .unwrap();
    }

    async fn specs(dir: &Path, args: &[&str], global: bool, cache: &PackumentCache) -> Result<DiffSpecs, PkgError> {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        let request = DiffRequest {
            args: &args,
            files: &[],
            prefix: dir,
            tag: "latest",
            global,
        };
        resolve_diff_specs(&request, &FsTreeReader, cache).await
    }

    fn here(dir: &Path) -> String {
        format!("file:{}", dir.display())
    }

    #[tokio::test]
    async fn test_two_versions_use_project_name() {
        let dir = project(r#"{"name": "my-project", "version": "1.0.0"}"#);
        let cache = session(MockRegistry::new());

        let out = specs(dir.path(), &["1.0.0", "2.0.0"], false, &cache).await.unwrap();
        assert_eq!(out.a, "my-project@1.0.0");
        assert_eq!(out.b, "my-project@2.0.0");
        assert_eq!(cache.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_files_are_passed_through() {
        let dir = project(r#"{"name": "my-project"}"#);
        let cache = session(MockRegistry::new());
        let args = vec!["1.0.0".to_string()];
        let files = vec!["lib/index.js".to_string(), "README.md".to_string()];
        let request = DiffRequest {
            args: &args,
            files: &files,
            prefix: dir.path(),
            tag: "latest",
            global: false,
        };

        let out = resolve_diff_specs(&request, &FsTreeReader, &cache).await.unwrap();
        assert_eq!(out.a, "my-project@1.0.0");
        assert_eq!(out.files, files);
    }

    #[tokio::test]
    async fn test_two_versions_without_project() {
        let dir = tempdir().unwrap();
        let cache = session(MockRegistry::new());

        let err = specs(dir.path(), &["1.0.0", "2.0.0"], false, &cache).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousSpec);
        assert_eq!(err.message(), NEEDS_PROJECT_FOR_VERSIONS);
    }

    #[tokio::test]
    async fn test_no_arguments_compares_against_tag() {
        let dir = project(r#"{"name": "my-project", "version": "1.0.0"}"#);
        let cache = session(MockRegistry::new());

        let out = specs(dir.path(), &[], false, &cache).await.unwrap();
        assert_eq!(out.a, "my-project@latest");
        assert_eq!(out.b, here(dir.path()));

        let empty = tempdir().unwrap();
        let err = specs(empty.path(), &[], false, &cache).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousSpec);
        assert_eq!(err.message(), NEEDS_PROJECT);
    }

    #[tokio::test]
    async fn test_too_many_arguments() {
        let dir = project(r#"{"name": "my-project"}"#);
        let cache = session(MockRegistry::new());

        let err = specs(dir.path(), &["a", "b", "c"], false, &cache).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooManyDiffArgs);
        assert_eq!(err.message(), "Can't use more than two --diff arguments.");
    }

    #[tokio::test]
    async fn test_single_range_compares_project() {
        let dir = project(r#"{"name": "my-project", "version": "1.2.0"}"#);
        let cache = session(MockRegistry::new());

        let out = specs(dir.path(), &["^1.0.0"], false, &cache).await.unwrap();
        assert_eq!(out.a, "my-project@^1.0.0");
        assert_eq!(out.b, here(dir.path()));
    }

    #[tokio::test]
    async fn test_installed_name_compares_wanted_version() {
        let dir = project(r#"{"name": "my-project", "dependencies": {"lodash": "^1.0.0"}}"#);
        install(dir.path(), "node_modules/lodash", "lodash", "1.0.0");
        let cache = session(
            MockRegistry::new()
                .publish("lodash", "1.0.0", &[])
                .publish("lodash", "1.5.0", &[])
                .publish("lodash", "2.0.0", &[]),
        );

        let out = specs(dir.path(), &["lodash"], false, &cache).await.unwrap();
        assert_eq!(
            out.a,
            format!("lodash@file:{}", dir.path().join("node_modules/lodash").display())
        );
        assert_eq!(out.b, "lodash@1.5.0");

        // global mode ignores the declared range
        let out = specs(dir.path(), &["lodash"], true, &cache).await.unwrap();
        assert_eq!(out.b, "lodash@2.0.0");
    }

    #[tokio::test]
    async fn test_installed_name_with_explicit_version() {
        let dir = project(r#"{"name": "my-project", "dependencies": {"lodash": "^1.0.0"}}"#);
        install(dir.path(), "node_modules/lodash", "lodash", "1.0.0");
        let cache = session(MockRegistry::new());

        let out = specs(dir.path(), &["lodash@3.0.0"], false, &cache).await.unwrap();
        assert_eq!(out.b, "lodash@3.0.0");
        assert_eq!(cache.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_package_compares_project() {
        let dir = project(r#"{"name": "my-project"}"#);
        let cache = session(MockRegistry::new());

        let out = specs(dir.path(), &["left-pad@^1"], false, &cache).await.unwrap();
        assert_eq!(out.a, "left-pad@^1");
        assert_eq!(out.b, here(dir.path()));

        let empty = tempdir().unwrap();
        let err = specs(empty.path(), &["left-pad"], false, &cache).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousSpec);
    }

    #[tokio::test]
    async fn test_directory_and_unsupported_specs() {
        let dir = project(r#"{"name": "my-project"}"#);
        let cache = session(MockRegistry::new());

        let out = specs(dir.path(), &["./other"], false, &cache).await.unwrap();
        assert_eq!(out.a, "file:./other");
        assert_eq!(out.b, here(dir.path()));

        let err = specs(dir.path(), &["github:user/repo"], false, &cache).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SpecTypeNotSupported);
        assert_eq!(err.message(), "Spec type git not supported.");
    }

    #[tokio::test]
    async fn test_two_arguments_share_a_name() {
        let dir = project(r#"{"name": "my-project"}"#);
        install(dir.path(), "node_modules/abbrev", "abbrev", "1.1.1");
        let cache = session(MockRegistry::new());

        let out = specs(dir.path(), &["abbrev", "2.0.0"], false, &cache).await.unwrap();
        assert_eq!(
            out.a,
            format!("abbrev@file:{}", dir.path().join("node_modules/abbrev").display())
        );
        assert_eq!(out.b, "abbrev@2.0.0");

        let out = specs(dir.path(), &["1.0.0", "semver"], false, &cache).await.unwrap();
        assert_eq!(out.a, "semver@1.0.0");
        assert_eq!(out.b, "semver@latest");
    }
}
