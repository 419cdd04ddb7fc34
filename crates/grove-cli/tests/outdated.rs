//! Integration tests for `grove outdated`.

mod common;

use common::{install_package, project, run_in, start_registry, stderr, stdout, stdout_json, Packages};
use serde_json::json;

fn registry() -> String {
    start_registry(
        Packages::new()
            .publish("dog", "1.0.0", &[])
            .publish("dog", "1.0.1", &[])
            .publish("dog", "2.0.0", &[])
            .publish("cat", "3.0.0", &[]),
    )
}

#[test]
fn test_outdated_reports_wanted_and_latest() {
    let url = registry();
    let dir = project(&json!({
        "name": "my-project",
        "dependencies": { "dog": "^1.0.0", "cat": "^3.0.0" }
    }));
    install_package(dir.path(), "node_modules/dog", "dog", "1.0.0");
    install_package(dir.path(), "node_modules/cat", "cat", "3.0.0");

    let output = run_in(dir.path(), &["--registry", &url, "--json", "outdated"]);
    // outdated packages are reported with a failing exit code
    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr(&output));
    assert_eq!(
        stdout_json(&output),
        json!([{
            "name": "dog",
            "current": "1.0.0",
            "wanted": "1.0.1",
            "latest": "2.0.0",
            "location": "node_modules/dog",
            "dependent": "my-project",
            "type": "dependencies"
        }])
    );
}

#[test]
fn test_outdated_table() {
    let url = registry();
    let dir = project(&json!({ "name": "my-project", "dependencies": { "dog": "^1.0.0" } }));
    install_package(dir.path(), "node_modules/dog", "dog", "1.0.0");

    let output = run_in(dir.path(), &["--registry", &url, "outdated"]);
    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2, "stdout: {out}");
    assert!(lines[0].starts_with("Package"));
    let cells: Vec<&str> = lines[1].split_whitespace().collect();
    assert_eq!(cells, ["dog", "1.0.0", "1.0.1", "2.0.0", "node_modules/dog", "my-project"]);
}

#[test]
fn test_nothing_outdated() {
    let url = registry();
    let dir = project(&json!({ "name": "my-project", "dependencies": { "cat": "^3.0.0" } }));
    install_package(dir.path(), "node_modules/cat", "cat", "3.0.0");

    let output = run_in(dir.path(), &["--registry", &url, "outdated"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "");
}
