//! Package manager error types.

use serde::Serialize;
use std::fmt;
use std::io;

/// Package manager error codes.
///
/// Stable strings for scripting and tooling; never reworded.
pub mod codes {
    pub const PKG_SPEC_INVALID: &str = "PKG_SPEC_INVALID";
    pub const PKG_NOT_FOUND: &str = "PKG_NOT_FOUND";
    pub const PKG_NO_MATCHING_VERSION: &str = "PKG_NO_MATCHING_VERSION";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_LOCK_CORRUPT: &str = "PKG_LOCK_CORRUPT";
    pub const PKG_LOCK_MISSING: &str = "PKG_LOCK_MISSING";
    pub const PKG_PEER_INVALID: &str = "PKG_PEER_INVALID";
    pub const PKG_PEER_CONFLICT: &str = "PKG_PEER_CONFLICT";
    pub const PKG_GLOBAL_NOT_SUPPORTED: &str = "PKG_GLOBAL_NOT_SUPPORTED";
    pub const PKG_DIFF_TOO_MANY_ARGS: &str = "PKG_DIFF_TOO_MANY_ARGS";
    pub const PKG_DIFF_AMBIGUOUS: &str = "PKG_DIFF_AMBIGUOUS";
    pub const PKG_SPEC_TYPE_UNSUPPORTED: &str = "PKG_SPEC_TYPE_UNSUPPORTED";
    pub const PKG_PACKAGE_JSON_NOT_FOUND: &str = "PKG_PACKAGE_JSON_NOT_FOUND";
    pub const PKG_PACKAGE_JSON_INVALID: &str = "PKG_PACKAGE_JSON_INVALID";
    pub const PKG_DEP_RANGE_INVALID: &str = "PKG_DEP_RANGE_INVALID";
    pub const PKG_IO_ERROR: &str = "PKG_IO_ERROR";
}

/// Classification of a package manager failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    SpecInvalid,
    /// Registry answered 404 for the package name.
    NotFound,
    /// No published version satisfies the requested range or tag.
    NoMatchingVersion,
    /// Transport, status or parse failure talking to the registry.
    RegistryError,
    CorruptLockfile,
    MissingLockfile,
    InvalidPeerDep,
    /// Peer range mismatch; a warning unless strict peer mode is on.
    PeerConflict,
    GlobalNotSupported,
    TooManyDiffArgs,
    /// `diff` cannot work out what to compare against.
    AmbiguousSpec,
    SpecTypeNotSupported,
    PackageJsonNotFound,
    PackageJsonInvalid,
    DepRangeInvalid,
    Io,
}

impl ErrorKind {
    /// Stable error code string for this kind.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::SpecInvalid => codes::PKG_SPEC_INVALID,
            Self::NotFound => codes::PKG_NOT_FOUND,
            Self::NoMatchingVersion => codes::PKG_NO_MATCHING_VERSION,
            Self::RegistryError => codes::PKG_REGISTRY_ERROR,
            Self::CorruptLockfile => codes::PKG_LOCK_CORRUPT,
            Self::MissingLockfile => codes::PKG_LOCK_MISSING,
            Self::InvalidPeerDep => codes::PKG_PEER_INVALID,
            Self::PeerConflict => codes::PKG_PEER_CONFLICT,
            Self::GlobalNotSupported => codes::PKG_GLOBAL_NOT_SUPPORTED,
            Self::TooManyDiffArgs => codes::PKG_DIFF_TOO_MANY_ARGS,
            Self::AmbiguousSpec => codes::PKG_DIFF_AMBIGUOUS,
            Self::SpecTypeNotSupported => codes::PKG_SPEC_TYPE_UNSUPPORTED,
            Self::PackageJsonNotFound => codes::PKG_PACKAGE_JSON_NOT_FOUND,
            Self::PackageJsonInvalid => codes::PKG_PACKAGE_JSON_INVALID,
            Self::DepRangeInvalid => codes::PKG_DEP_RANGE_INVALID,
            Self::Io => codes::PKG_IO_ERROR,
        }
    }
}

/// Package manager error.
///
/// `Clone` so a single failed in-flight fetch can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgError {
    kind: ErrorKind,
    message: String,
}

impl PkgError {
    /// Create a new error with the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::SpecInvalid, msg)
    }

    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("Package not found: {name}"))
    }

    #[must_use]
    pub fn no_matching_version(name: &str, range: &str) -> Self {
        Self::new(
            ErrorKind::NoMatchingVersion,
            format!("No matching version found for {name}@{range}"),
        )
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RegistryError, msg)
    }

    pub fn corrupt_lockfile(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::CorruptLockfile, msg)
    }

    #[must_use]
    pub fn missing_lockfile() -> Self {
        Self::new(
            ErrorKind::MissingLockfile,
            "The `ci` command can only install with an existing package-lock.json or \
             npm-shrinkwrap.json with lockfileVersion >= 1",
        )
    }

    #[must_use]
    pub fn peer_conflict(dependent: &str, name: &str, range: &str, found: &str) -> Self {
        Self::new(
            ErrorKind::PeerConflict,
            format!("{dependent} requires a peer of {name}@{range} but {name}@{found} is installed"),
        )
    }

    /// Promote a peer conflict to a fatal error (strict peer mode).
    #[must_use]
    pub fn into_invalid_peer(self) -> Self {
        Self::new(ErrorKind::InvalidPeerDep, self.message)
    }

    #[must_use]
    pub fn global_not_supported(command: &str) -> Self {
        Self::new(
            ErrorKind::GlobalNotSupported,
            format!("`{command}` does not work for global packages"),
        )
    }

    #[must_use]
    pub fn too_many_diff_args() -> Self {
        Self::new(
            ErrorKind::TooManyDiffArgs,
            "Can't use more than two --diff arguments.",
        )
    }

    pub fn ambiguous_spec(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AmbiguousSpec, msg)
    }

    #[must_use]
    pub fn spec_type_not_supported(spec_type: &str) -> Self {
        Self::new(
            ErrorKind::SpecTypeNotSupported,
            format!("Spec type {spec_type} not supported."),
        )
    }

    #[must_use]
    pub fn package_json_not_found(path: &std::path::Path) -> Self {
        Self::new(
            ErrorKind::PackageJsonNotFound,
            format!("package.json not found: {}", path.display()),
        )
    }

    pub fn package_json_invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PackageJsonInvalid, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::registry(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::registry(format!("Connection failed: {e}"))
        } else {
            Self::registry(e.to_string())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::registry(format!("Invalid JSON: {e}"))
    }
}
