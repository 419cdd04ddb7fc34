use super::print_json;
use grove_core::pkg::{ci_plan, CiOptions, Operation, PkgError};
use grove_core::Config;
use grove_util::fs::remove_dir_contents;
use serde::Serialize;
use std::process::ExitCode;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CiResult<'a> {
    ok: bool,
    lockfile: &'a str,
    /// Entries cleared from `node_modules` before installing.
    removed: usize,
    operations: &'a [Operation],
    lifecycle_events: &'a [&'static str],
}

pub fn run(config: &Config, json: bool) -> Result<ExitCode, PkgError> {
    let options = CiOptions {
        global: config.global,
        ignore_scripts: config.ignore_scripts,
    };
    let plan = ci_plan(config.prefix(), &options)?;

    let removed = remove_dir_contents(&plan.node_modules).map_err(|e| {
        PkgError::io(format!("Failed to clear {}: {e}", plan.node_modules.display()))
    })?;
    info!(removed, path = %plan.node_modules.display(), "cleared node_modules");

    let result = CiResult {
        ok: true,
        lockfile: &plan.virtual_tree.meta.filename,
        removed,
        operations: &plan.operations,
        lifecycle_events: &plan.lifecycle_events,
    };
    if json {
        print_json(&result);
    } else {
        for op in result.operations {
            println!("{op}");
        }
        for event in result.lifecycle_events {
            println!("run {event}");
        }
        println!(
            "clean install of {} packages from {}",
            result.operations.len(),
            result.lockfile
        );
    }
    Ok(ExitCode::SUCCESS)
}
