//! Shared helpers for grove CLI integration tests.

#![allow(dead_code)]

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::process::{Command, Output};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// The built `grove` binary with registry/global environment cleared.
pub fn grove() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_grove"));
    cmd.env_remove("GROVE_NPM_REGISTRY")
        .env_remove("GROVE_STRICT_PEER_DEPS")
        .env_remove("GROVE_GLOBAL_DIR")
        .env_remove("RUST_LOG");
    cmd
}

/// Run grove in `dir` with `args`.
pub fn run_in(dir: &std::path::Path, args: &[&str]) -> Output {
    grove()
        .arg("--cwd")
        .arg(dir)
        .args(args)
        .output()
        .expect("failed to run grove")
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn stdout_json(output: &Output) -> Value {
    let out = stdout(output);
    serde_json::from_str(&out).unwrap_or_else(|_| panic!("stdout should be valid JSON: {out}"))
}

/// Project directory with the given package.json contents.
pub fn project(package_json: &Value) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("package.json"),
        serde_json::to_string_pretty(package_json).unwrap(),
    )
    .unwrap();
    dir
}

/// Write an installed package at `location` under `dir`.
pub fn install_package(dir: &std::path::Path, location: &str, name: &str, version: &str) {
    let path = dir.join(location);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(
        path.join("package.json"),
        json!({ "name": name, "version": version }).to_string(),
    )
    .unwrap();
}

/// Packuments served by [`start_registry`].
#[derive(Default)]
pub struct Packages {
    docs: HashMap<String, Value>,
}

impl Packages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `name@version` and point `latest` at it.
    pub fn publish(mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
        let doc = self.docs.entry(name.to_string()).or_insert_with(|| {
            json!({ "name": name, "dist-tags": {}, "versions": {} })
        });
        let dependencies: Map<String, Value> = deps
            .iter()
            .map(|(n, r)| ((*n).to_string(), json!(r)))
            .collect();
        doc["versions"][version] = json!({
            "name": name,
            "version": version,
            "dependencies": dependencies,
            "dist": {
                "tarball": format!("https://registry.test/{name}/-/{name}-{version}.tgz"),
                "integrity": format!("sha512-{name}-{version}"),
            },
        });
        doc["dist-tags"]["latest"] = json!(version);
        self
    }

    pub fn tag(mut self, name: &str, tag: &str, version: &str) -> Self {
        if let Some(doc) = self.docs.get_mut(name) {
            doc["dist-tags"][tag] = json!(version);
        }
        self
    }
}

async fn packument(
    Path(name): Path<String>,
    State(docs): State<Arc<HashMap<String, Value>>>,
) -> Response {
    match docs.get(&name) {
        Some(doc) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            doc.to_string(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

/// Serve `packages` on an ephemeral port in a background thread. Returns the
/// base URL.
pub fn start_registry(packages: Packages) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let base_url = format!("http://{}/", listener.local_addr().unwrap());
    let docs = Arc::new(packages.docs);

    thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let app = Router::new().route("/:name", get(packument)).with_state(docs);
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    // Give the server time to start
    thread::sleep(Duration::from_millis(50));
    base_url
}
