use super::{print_json, registry_session};
use grove_core::pkg::{outdated_report, FsTreeReader, OutdatedEntry, OutdatedOptions, PkgError, TreeReader};
use grove_core::Config;
use std::process::ExitCode;

const HEADERS: [&str; 6] = ["Package", "Current", "Wanted", "Latest", "Location", "Depended by"];

/// Exits with failure when anything is outdated.
pub async fn run(config: &Config, options: OutdatedOptions, json: bool) -> Result<ExitCode, PkgError> {
    let actual = FsTreeReader.read_actual(config.prefix())?;
    let cache = registry_session(config)?;
    let entries = outdated_report(&actual, &cache, &options).await?;

    if json {
        print_json(&entries);
    } else if !entries.is_empty() {
        print_table(&entries);
    }

    Ok(if entries.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_table(entries: &[OutdatedEntry]) {
    let rows: Vec<[String; 6]> = entries
        .iter()
        .map(|e| {
            [
                e.name.clone(),
                e.current.clone().unwrap_or_else(|| "MISSING".to_string()),
                e.wanted.clone(),
                e.latest.clone(),
                e.location.clone().unwrap_or_else(|| "-".to_string()),
                e.dependent.clone(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: &[&str]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        println!("{}", padded.join("  ").trim_end());
    };
    line(&HEADERS[..]);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        line(&cells);
    }
}
