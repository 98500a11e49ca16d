//! Integration Test: Unused Dependencies
//!
//! **Policy**: Every crate listed under `[dependencies]` of the relay and
//! client manifests MUST be named by that crate's production code.
//! Crates only tests need belong under `[dev-dependencies]`.
//! **Exceptions**: none.

use std::fs;

use architectural_enforcement::{
    mentions_crate, production_lines, runtime_dependencies, rust_sources, workspace_root,
    CRATE_DIRS,
};

#[test]
fn test_runtime_dependencies_are_used() {
    let mut unused = Vec::new();

    for dir in CRATE_DIRS {
        let manifest_path = workspace_root().join(dir).join("Cargo.toml");
        let manifest = fs::read_to_string(&manifest_path)
            .unwrap_or_else(|e| panic!("reading {}: {e}", manifest_path.display()));

        let sources: Vec<String> = rust_sources(&format!("{dir}/src"))
            .iter()
            .map(|path| {
                fs::read_to_string(path)
                    .unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
            })
            .collect();

        for dependency in runtime_dependencies(&manifest) {
            let used = sources.iter().any(|content| {
                production_lines(content)
                    .iter()
                    .any(|line| mentions_crate(line, &dependency))
            });
            if !used {
                unused.push(format!("{dir}: {dependency}"));
            }
        }
    }

    if !unused.is_empty() {
        eprintln!("\nRuntime dependencies never named by production code:\n");
        for entry in &unused {
            eprintln!("  {entry}");
        }
        eprintln!("\nRemove them or move them to [dev-dependencies].");
        panic!("found {} unused dependencies", unused.len());
    }
}
