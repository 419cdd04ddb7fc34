use super::{print_json, registry_session};
use grove_core::pkg::{resolve_diff_specs, DiffRequest, FsTreeReader, PkgError};
use grove_core::Config;
use serde::Serialize;
use std::process::ExitCode;

#[derive(Debug, Serialize)]
struct DiffResult<'a> {
    ok: bool,
    a: &'a str,
    b: &'a str,
    files: &'a [String],
}

pub async fn run(
    config: &Config,
    specs: &[String],
    files: &[String],
    tag: &str,
    json: bool,
) -> Result<ExitCode, PkgError> {
    let cache = registry_session(config)?;
    let request = DiffRequest {
        args: specs,
        files,
        prefix: config.prefix(),
        tag,
        global: config.global,
    };
    let resolved = resolve_diff_specs(&request, &FsTreeReader, &cache).await?;

    if json {
        print_json(&DiffResult {
            ok: true,
            a: &resolved.a,
            b: &resolved.b,
            files: &resolved.files,
        });
    } else {
        println!("a: {}", resolved.a);
        println!("b: {}", resolved.b);
        for file in &resolved.files {
            println!("file: {file}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
