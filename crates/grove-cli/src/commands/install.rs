use super::{print_json, registry_session, ErrorInfo};
use grove_core::pkg::lockfile::encode;
use grove_core::pkg::{
    choose_filename, diff_trees, load_virtual, lockfile_content_hash, read_manifest, resolve,
    save_lockfile, save_notice, DiffOptions, FsTreeReader, Operation, PkgError, TreeReader,
};
use grove_core::Config;
use grove_util::fs::read_to_string_lossy;
use serde::Serialize;
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct InstallResult {
    ok: bool,
    /// Lockfile written or checked; absent when resolution failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    lockfile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<String>,
    /// The lockfile on disk already had exactly this content.
    unchanged: bool,
    resolved: usize,
    fetched: usize,
    reused: usize,
    pruned: Vec<String>,
    /// What reification would do to `node_modules`.
    operations: Vec<Operation>,
    warnings: Vec<ErrorInfo>,
    errors: Vec<ErrorInfo>,
}

pub async fn run(config: &Config, json: bool) -> Result<ExitCode, PkgError> {
    let prefix = config.prefix();
    info!(prefix = %prefix.display(), "install");

    let loaded = read_manifest(&prefix.join("package.json"))?;
    for err in &loaded.errors {
        warn!(name = %err.name, code = err.code, "{}", err.message);
    }
    let prior = load_virtual(prefix)?;
    let cache = registry_session(config)?;

    let result = resolve(&loaded.manifest, &cache, &config.resolve_options(), prior.as_ref()).await?;
    let mut report = InstallResult {
        ok: result.is_clean(),
        lockfile: None,
        notice: None,
        unchanged: false,
        resolved: result.resolved_count,
        fetched: result.fetched_count,
        reused: result.reused_count,
        pruned: result.pruned.clone(),
        operations: Vec::new(),
        warnings: result.warnings.iter().map(ErrorInfo::from).collect(),
        errors: result.errors.iter().map(ErrorInfo::from).collect(),
    };

    // a tree with unresolvable packages is never saved
    if result.is_clean() {
        let graph = &result.graph;
        let choice = choose_filename(prefix, false);
        let encoded = encode(graph)?;
        let target = prefix.join(choice.filename);
        report.unchanged = read_to_string_lossy(&target)
            .is_ok_and(|existing| lockfile_content_hash(&existing) == lockfile_content_hash(&encoded));
        if !report.unchanged {
            save_lockfile(graph, prefix, choice.filename)?;
        }
        report.notice = Some(save_notice(&graph.meta, choice.filename));
        report.lockfile = Some(target.display().to_string());

        let actual = FsTreeReader.read_actual(prefix)?;
        report.operations = diff_trees(graph, &actual, DiffOptions::default());
    }

    if json {
        print_json(&report);
    } else {
        print_human(&report);
    }

    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_human(report: &InstallResult) {
    for w in &report.warnings {
        eprintln!("warn {}: {}", w.code, w.message);
    }
    for e in &report.errors {
        eprintln!("error {}: {}", e.code, e.message);
    }
    if !report.ok {
        eprintln!("{} package(s) could not be resolved; lockfile not written", report.errors.len());
        return;
    }

    for op in &report.operations {
        println!("{op}");
    }
    println!(
        "resolved {} packages ({} fetched, {} from lockfile)",
        report.resolved, report.fetched, report.reused
    );
    if let Some(notice) = &report.notice {
        println!("{notice}");
    }
}
