use super::print_json;
use grove_core::pkg::{shrinkwrap, FsTreeReader, PkgError};
use grove_core::Config;
use serde::Serialize;
use std::process::ExitCode;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShrinkwrapResult {
    ok: bool,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    renamed_from: Option<String>,
    notice: String,
}

pub fn run(config: &Config, json: bool) -> Result<ExitCode, PkgError> {
    let outcome = shrinkwrap(config.prefix(), config.global, &FsTreeReader)?;
    if json {
        print_json(&ShrinkwrapResult {
            ok: true,
            path: outcome.path.display().to_string(),
            renamed_from: outcome.renamed_from.map(|p| p.display().to_string()),
            notice: outcome.notice,
        });
    } else {
        println!("{}", outcome.notice);
    }
    Ok(ExitCode::SUCCESS)
}
