//! Command implementations.
//!
//! Each command returns its exit code; engine failures come back as
//! [`PkgError`] and are reported by [`report_error`].

pub mod ci;
pub mod diff;
pub mod install;
pub mod outdated;
pub mod shrinkwrap;

use grove_core::pkg::{PackumentCache, PkgError, RegistryClient};
use grove_core::Config;
use serde::Serialize;
use std::sync::Arc;

/// Error details in JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: &'static str,
    pub message: String,
}

impl From<&PkgError> for ErrorInfo {
    fn from(err: &PkgError) -> Self {
        Self {
            code: err.code(),
            message: err.message().to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResult<'a> {
    ok: bool,
    error: &'a ErrorInfo,
}

/// Print a command failure: a JSON object on stdout in JSON mode, a
/// `code: message` line on stderr otherwise.
pub fn report_error(err: &PkgError, json: bool) {
    if json {
        print_json(&ErrorResult {
            ok: false,
            error: &ErrorInfo::from(err),
        });
    } else {
        eprintln!("error {}: {}", err.code(), err.message());
    }
}

/// Pretty-print `value` as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{out}"),
        Err(e) => eprintln!("error: failed to serialize output: {e}"),
    }
}

/// Packument cache for one command run, talking to the configured registry.
pub fn registry_session(config: &Config) -> Result<PackumentCache, PkgError> {
    let client = RegistryClient::new(&config.registry)?;
    Ok(PackumentCache::new(Arc::new(client)).with_concurrency(config.concurrency))
}
