//! Package manager engine.
//!
//! Provides:
//! - Package spec and semver range handling
//! - Packument fetching with a per-session cache
//! - Manifest reading with per-dependency validation
//! - The dependency tree and its resolver
//! - `package-lock.json` / `npm-shrinkwrap.json` encoding and migration
//! - Reconciliation: virtual/actual diffs, `ci`, `shrinkwrap`, `outdated`
//!   and `diff` spec selection

pub mod actual;
pub mod cache;
pub mod ci;
pub mod deps;
pub mod diff_spec;
pub mod error;
pub mod lockfile;
pub mod manifest;
pub mod outdated;
pub mod reconcile;
pub mod registry;
pub mod resolve;
pub mod shrinkwrap;
pub mod spec;
pub mod tree;
pub mod version;

#[cfg(test)]
pub mod testing;

pub use actual::{FsTreeReader, TreeReader};
pub use cache::PackumentCache;
pub use ci::{ci_plan, CiOptions, CiPlan, LIFECYCLE_EVENTS};
pub use deps::{read_manifest, DepKind, EdgeOptions, LoadedManifest, PackageSpec, PkgDepError};
pub use diff_spec::{resolve_diff_specs, DiffRequest, DiffSpecs};
pub use error::{codes as pkg_codes, ErrorKind, PkgError};
pub use lockfile::{
    choose_filename, load_virtual, lockfile_content_hash, lockfile_exists, save as save_lockfile,
    save_notice, LockfileMeta, CURRENT_LOCKFILE_VERSION, HIDDEN_LOCKFILE, PACKAGE_LOCK,
    SHRINKWRAP,
};
pub use manifest::{Manifest, Packument};
pub use outdated::{outdated_report, OutdatedEntry, OutdatedOptions};
pub use reconcile::{diff_trees, DiffOptions, Operation, OperationKind};
pub use registry::{Fetcher, RegistryClient, DEFAULT_REGISTRY, REGISTRY_ENV};
pub use resolve::{resolve, ResolveOptions, ResolveResult, MAX_CONCURRENT_FETCHES};
pub use shrinkwrap::{shrinkwrap, ShrinkwrapOutcome};
pub use spec::{ParsedSpec, SpecType};
pub use tree::{DependencyGraph, NodeId, TreeNode};
pub use version::{pick_manifest, satisfies, DEFAULT_TAG};
