use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_manifest(root: &Path, id: &str, version: &str, extra: &str) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    let body = format!(
        r#"{{ "id": "{id}", "name": "{id}", "version": "{version}"{extra} }}"#,
        id = id,
        version = version,
        extra = extra
    );
    std::fs::write(dir.join("manifest.json"), body).unwrap();
}

/// A temp dir holding `plugins/` with a utils <- core <- ui chain
fn chain_fixture() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let plugins = tmp.path().join("plugins");
    write_manifest(&plugins, "ui", "1.0.0", r#", "dependencies": ["core@^1.0.0"]"#);
    write_manifest(&plugins, "core", "1.2.0", r#", "dependencies": ["utils@~1.0.0"]"#);
    write_manifest(&plugins, "utils", "1.0.4", "");
    tmp
}

fn hearth(tmp: &TempDir) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("hearth")?;
    cmd.current_dir(tmp.path())
        .env_remove("HEARTH_LOG")
        .env_remove("RUST_LOG")
        .arg("--plugins-dir")
        .arg(tmp.path().join("plugins"))
        .arg("--data-dir")
        .arg(tmp.path().join("data"));
    Ok(cmd)
}

#[test]
fn test_satisfies_reports_true() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("hearth")?;
    cmd.args(["satisfies", "^1.2.0", "1.9.3"]);
    cmd.assert().success().stdout(predicate::str::diff("true\n"));
    Ok(())
}

#[test]
fn test_satisfies_reports_false_with_exit_code() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("hearth")?;
    cmd.args(["satisfies", ">=1.0.0, <2.0.0", "2.0.0"]);
    cmd.assert().code(1).stdout(predicate::str::diff("false\n"));
    Ok(())
}

#[test]
fn test_satisfies_rejects_bad_range() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("hearth")?;
    cmd.args(["satisfies", "not-a-range", "1.0.0"]);
    cmd.assert().code(2).stderr(predicate::str::contains("error:"));
    Ok(())
}

#[test]
fn test_resolve_prints_dependencies_first() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = chain_fixture();
    hearth(&tmp)?
        .arg("resolve")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. utils"))
        .stdout(predicate::str::contains("2. core"))
        .stdout(predicate::str::contains("3. ui"));
    Ok(())
}

#[test]
fn test_resolve_single_plugin_closure() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = chain_fixture();
    hearth(&tmp)?
        .args(["resolve", "--plugin", "core"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2. core"))
        .stdout(predicate::str::contains("ui").not());
    Ok(())
}

#[test]
fn test_resolve_reports_cycle() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    let plugins = tmp.path().join("plugins");
    write_manifest(&plugins, "a", "1.0.0", r#", "dependencies": ["b"]"#);
    write_manifest(&plugins, "b", "1.0.0", r#", "dependencies": ["a"]"#);
    hearth(&tmp)?
        .arg("resolve")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("CIRCULAR_DEPENDENCY"))
        .stdout(predicate::str::contains("cycle:"));
    Ok(())
}

#[test]
fn test_resolve_reports_missing_and_conflicts() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    let plugins = tmp.path().join("plugins");
    write_manifest(&plugins, "app", "1.0.0", r#", "dependencies": ["ghost@^1.0.0", "lib@^2.0.0"]"#);
    write_manifest(&plugins, "lib", "1.4.0", "");
    hearth(&tmp)?
        .arg("resolve")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("MISSING_DEPENDENCY"))
        .stdout(predicate::str::contains("missing plugin 'ghost'"))
        .stdout(predicate::str::contains("'app' requires 'lib' ^2.0.0 but 1.4.0 is available"));
    Ok(())
}

#[test]
fn test_list_shows_pending_plugins() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = chain_fixture();
    hearth(&tmp)?
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("core 1.2.0 [NotLoaded] requires utils@~1.0.0"))
        .stdout(predicate::str::contains("utils 1.0.4 [NotLoaded]"));
    Ok(())
}

#[test]
fn test_list_json() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = chain_fixture();
    let output = hearth(&tmp)?.args(["list", "--json"]).output()?;
    assert!(output.status.success());
    let records: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let ids: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["core", "ui", "utils"]);
    assert_eq!(records[0]["pending"], true);
    Ok(())
}

#[test]
fn test_list_skips_invalid_manifest_with_warning() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = chain_fixture();
    let broken = tmp.path().join("plugins").join("broken");
    std::fs::create_dir_all(&broken)?;
    std::fs::write(broken.join("manifest.json"), "{")?;
    hearth(&tmp)?
        .arg("list")
        .assert()
        .success()
        .stderr(predicate::str::contains("warning: skipped"))
        .stdout(predicate::str::contains("broken").not());
    Ok(())
}

#[test]
fn test_fire_without_matching_plugins() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = chain_fixture();
    hearth(&tmp)?
        .args(["fire", "onStartup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugin activated on onStartup."));
    Ok(())
}

#[test]
fn test_fire_reports_module_load_failure() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    write_manifest(
        &tmp.path().join("plugins"),
        "eager",
        "1.0.0",
        r#", "main": "missing.so", "activationEvents": ["onStartup"]"#,
    );
    hearth(&tmp)?
        .args(["fire", "onStartup"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("MODULE_LOAD_FAILED"));
    Ok(())
}

#[test]
fn test_fire_rejects_unknown_event() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = chain_fixture();
    hearth(&tmp)?
        .args(["fire", "onBogus:x"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown activation kind"));
    Ok(())
}

#[test]
fn test_config_file_supplies_plugin_roots() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = chain_fixture();
    std::fs::write(
        tmp.path().join("hearth.toml"),
        "plugins_root = [\"plugins\"]\ndata_root = \"data\"\n",
    )?;
    let mut cmd = Command::cargo_bin("hearth")?;
    cmd.current_dir(tmp.path())
        .arg("--config")
        .arg(tmp.path().join("hearth.toml"))
        .arg("resolve")
        .assert()
        .success()
        .stdout(predicate::str::contains("3. ui"));
    Ok(())
}
