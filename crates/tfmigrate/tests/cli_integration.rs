//! CLI integration tests: spawn the `tfmigrate` binary against fixture
//! directories and verify exit codes, stdout, and stderr.
//!
//! The fixtures use `mock` migrations so no terraform binary is needed.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tfmigrate(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tfmigrate").expect("binary exists");
    cmd.current_dir(dir);
    cmd
}

fn mock_migration(name: &str, plan_error: bool, apply_error: bool) -> String {
    format!(
        "migration \"mock\" \"{name}\" {{\n  plan_error  = {plan_error}\n  apply_error = {apply_error}\n}}\n"
    )
}

/// A workspace with a config file, a migrations directory, and local
/// history storage.
fn fixture(migrations: &[(&str, String)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join(".tfmigrate.hcl"),
        r#"
tfmigrate {
  migration_dir = "migrations"
  history {
    storage "local" {
      path = "history.json"
    }
  }
}
"#,
    )
    .unwrap();
    let dir = tmp.path().join("migrations");
    fs::create_dir_all(&dir).unwrap();
    for (filename, source) in migrations {
        fs::write(dir.join(filename), source).unwrap();
    }
    tmp
}

#[test]
fn help_exits_0_with_description() {
    let tmp = TempDir::new().unwrap();
    tfmigrate(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Declarative state migrations"));
}

#[test]
fn version_exits_0() {
    let tmp = TempDir::new().unwrap();
    tfmigrate(tmp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tfmigrate"));
}

#[test]
fn missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    tfmigrate(tmp.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read configuration file"));
}

#[test]
fn list_prints_unapplied_in_order() {
    let tmp = fixture(&[
        ("20201109000002_test2.hcl", mock_migration("test2", false, false)),
        ("20201109000001_test1.hcl", mock_migration("test1", false, false)),
    ]);
    tfmigrate(tmp.path())
        .arg("list")
        .assert()
        .success()
        .stdout("20201109000001_test1.hcl\n20201109000002_test2.hcl\n");
}

#[test]
fn apply_then_list_shows_nothing_left() {
    let tmp = fixture(&[("20201109000001_test1.hcl", mock_migration("test1", false, false))]);

    tfmigrate(tmp.path())
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("apply successful"));

    let history = fs::read_to_string(tmp.path().join("history.json")).unwrap();
    assert!(history.contains("20201109000001_test1.hcl"));
    assert!(history.contains("md5_hash"));

    tfmigrate(tmp.path()).arg("list").assert().success().stdout("");
}

#[test]
fn apply_of_already_applied_file_fails() {
    let tmp = fixture(&[("20201109000001_test1.hcl", mock_migration("test1", false, false))]);

    tfmigrate(tmp.path()).args(["apply", "20201109000001_test1.hcl"]).assert().success();
    tfmigrate(tmp.path())
        .args(["apply", "20201109000001_test1.hcl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already been applied"));
}

#[test]
fn plan_succeeds_and_does_not_record_history() {
    let tmp = fixture(&[("20201109000001_test1.hcl", mock_migration("test1", false, false))]);

    tfmigrate(tmp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan successful"));
    assert!(!tmp.path().join("history.json").exists());
}

#[test]
fn plan_failure_names_the_migration() {
    let tmp = fixture(&[("20201109000001_test1.hcl", mock_migration("test1", true, false))]);

    tfmigrate(tmp.path())
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("20201109000001_test1.hcl"));
}

#[test]
fn duplicate_migration_names_block_the_run() {
    let tmp = fixture(&[
        ("20201109000001_test1.hcl", mock_migration("same", false, false)),
        ("20201109000002_test2.hcl", mock_migration("same", false, false)),
    ]);

    tfmigrate(tmp.path())
        .arg("apply")
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate migration names found locally:"));
}

#[test]
fn plan_single_file_works_without_history_storage() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join(".tfmigrate.hcl"),
        "tfmigrate {\n  migration_dir = \"migrations\"\n}\n",
    )
    .unwrap();
    let dir = tmp.path().join("migrations");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("20201109000001_test1.hcl"), mock_migration("test1", false, false)).unwrap();

    tfmigrate(tmp.path()).args(["plan", "20201109000001_test1.hcl"]).assert().success();

    // Directory mode still needs history storage.
    tfmigrate(tmp.path())
        .arg("apply")
        .assert()
        .failure()
        .stderr(predicate::str::contains("history storage is not configured"));
}

#[test]
fn config_env_interpolation_reaches_storage_paths() {
    let tmp = fixture(&[("20201109000001_test1.hcl", mock_migration("test1", false, false))]);
    fs::write(
        tmp.path().join(".tfmigrate.hcl"),
        r#"
tfmigrate {
  migration_dir = "migrations"
  history {
    storage "local" {
      path = "${env.TFMIGRATE_TEST_HISTORY_NAME}.json"
    }
  }
}
"#,
    )
    .unwrap();

    tfmigrate(tmp.path())
        .env("TFMIGRATE_TEST_HISTORY_NAME", "custom-history")
        .arg("apply")
        .assert()
        .success();
    assert!(tmp.path().join("custom-history.json").exists());
}
