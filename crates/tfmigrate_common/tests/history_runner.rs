//! Directory-mode plan/apply flows, driven end to end with mock migrations
//! and real (tempdir-local) history storage.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tfmigrate_common::config::{HistoryConfig, TfmigrateConfig};
use tfmigrate_common::history::History;
use tfmigrate_common::storage::{local, mock, StorageConfig};
use tfmigrate_common::{HistoryRunner, MigratorOption};

fn mock_migration(name: &str, plan_error: bool, apply_error: bool) -> String {
    format!(
        "migration \"mock\" \"{name}\" {{\n  plan_error  = {plan_error}\n  apply_error = {apply_error}\n}}\n"
    )
}

fn write_migrations(dir: &Path, migrations: &[(&str, String)]) {
    for (filename, source) in migrations {
        fs::write(dir.join(filename), source).unwrap();
    }
}

const APPLIED_TWO: &str = r#"{
    "version": 1,
    "records": {
        "20201109000001_test1.hcl": {
            "type": "mock",
            "name": "test1",
            "applied_at": "2020-11-10T00:00:01Z"
        },
        "20201109000002_test2.hcl": {
            "type": "mock",
            "name": "test2",
            "applied_at": "2020-11-10T00:00:02Z"
        }
    }
}"#;

struct Fixture {
    _tmp: TempDir,
    config: TfmigrateConfig,
    history_path: std::path::PathBuf,
}

impl Fixture {
    fn new(migrations: &[(&str, String)], history: Option<&str>) -> Self {
        let tmp = TempDir::new().unwrap();
        let migration_dir = tmp.path().join("migrations");
        fs::create_dir_all(&migration_dir).unwrap();
        write_migrations(&migration_dir, migrations);

        let history_path = tmp.path().join("history.json");
        if let Some(history) = history {
            fs::write(&history_path, history).unwrap();
        }

        let config = TfmigrateConfig {
            migration_dir: migration_dir.display().to_string(),
            history: Some(HistoryConfig {
                storage: StorageConfig::Local(local::Config {
                    path: history_path.display().to_string(),
                }),
            }),
        };

        Self { _tmp: tmp, config, history_path }
    }

    fn saved_history(&self) -> History {
        let bytes = fs::read(&self.history_path).unwrap_or_default();
        History::parse(&bytes).unwrap()
    }
}

fn four_clean_migrations() -> Vec<(&'static str, String)> {
    vec![
        ("20201109000001_test1.hcl", mock_migration("test1", false, false)),
        ("20201109000002_test2.hcl", mock_migration("test2", false, false)),
        ("20201109000003_test3.hcl", mock_migration("test3", false, false)),
        ("20201109000004_test4.hcl", mock_migration("test4", false, false)),
    ]
}

#[tokio::test]
async fn list_reports_unapplied_in_order() {
    let fixture = Fixture::new(&four_clean_migrations(), Some(APPLIED_TWO));
    let runner = HistoryRunner::new(&fixture.config, MigratorOption::default()).await.unwrap();
    assert_eq!(
        runner.list_unapplied().unwrap(),
        vec!["20201109000003_test3.hcl", "20201109000004_test4.hcl"]
    );
}

#[tokio::test]
async fn plan_directory_mode_leaves_history_unchanged() {
    let fixture = Fixture::new(&four_clean_migrations(), Some(APPLIED_TWO));
    let ctx = CancellationToken::new();
    let mut runner = HistoryRunner::new(&fixture.config, MigratorOption::default()).await.unwrap();
    runner.plan(&ctx, None).await.unwrap();

    let history = fixture.saved_history();
    assert_eq!(history.len(), 2);
    assert!(history.contains("20201109000001_test1.hcl"));
    assert!(history.contains("20201109000002_test2.hcl"));
}

#[tokio::test]
async fn plan_reports_every_failing_migration() {
    let mut migrations = four_clean_migrations();
    migrations[2] = ("20201109000003_test3.hcl", mock_migration("test3", true, false));
    migrations[3] = ("20201109000004_test4.hcl", mock_migration("test4", true, false));
    let fixture = Fixture::new(&migrations, Some(APPLIED_TWO));

    let ctx = CancellationToken::new();
    let mut runner = HistoryRunner::new(&fixture.config, MigratorOption::default()).await.unwrap();
    let err = runner.plan(&ctx, None).await.unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("20201109000003_test3.hcl"), "got: {message}");
    assert!(message.contains("20201109000004_test4.hcl"), "got: {message}");
}

#[tokio::test]
async fn plan_single_file_skips_validation() {
    // Two files declare the same migration name, which directory mode
    // rejects; planning one file by name still works.
    let migrations = vec![
        ("20201109000001_test1.hcl", mock_migration("dup", false, false)),
        ("20201109000002_test2.hcl", mock_migration("dup", false, false)),
    ];
    let fixture = Fixture::new(&migrations, None);

    let ctx = CancellationToken::new();
    let mut runner = HistoryRunner::new(&fixture.config, MigratorOption::default()).await.unwrap();

    let err = runner.plan(&ctx, None).await.unwrap_err();
    assert!(format!("{err:#}").contains("duplicate migration names found locally:"));

    runner.plan(&ctx, Some("20201109000002_test2.hcl")).await.unwrap();
}

#[tokio::test]
async fn apply_records_every_migration_in_order() {
    let fixture = Fixture::new(&four_clean_migrations(), Some(APPLIED_TWO));
    let ctx = CancellationToken::new();
    let mut runner = HistoryRunner::new(&fixture.config, MigratorOption::default()).await.unwrap();
    runner.apply(&ctx, None).await.unwrap();

    let history = fixture.saved_history();
    let filenames: Vec<&str> = history.records().keys().map(String::as_str).collect();
    assert_eq!(
        filenames,
        vec![
            "20201109000001_test1.hcl",
            "20201109000002_test2.hcl",
            "20201109000003_test3.hcl",
            "20201109000004_test4.hcl",
        ]
    );

    let record = &history.records()["20201109000003_test3.hcl"];
    assert_eq!(record.migration_type, "mock");
    assert_eq!(record.name, "test3");
    assert!(record.content_hash().is_some());
}

#[tokio::test]
async fn apply_stops_on_failure_and_keeps_earlier_records() {
    let mut migrations = four_clean_migrations();
    migrations[3] = ("20201109000004_test4.hcl", mock_migration("test4", false, true));
    let fixture = Fixture::new(&migrations, Some(APPLIED_TWO));

    let ctx = CancellationToken::new();
    let mut runner = HistoryRunner::new(&fixture.config, MigratorOption::default()).await.unwrap();
    let err = runner.apply(&ctx, None).await.unwrap_err();
    assert!(format!("{err:#}").contains("20201109000004_test4.hcl"));

    // test3 succeeded and was persisted before the failure stopped the run.
    let history = fixture.saved_history();
    assert!(history.contains("20201109000003_test3.hcl"));
    assert!(!history.contains("20201109000004_test4.hcl"));
}

#[tokio::test]
async fn apply_single_file_requires_it_to_be_unapplied() {
    let fixture = Fixture::new(&four_clean_migrations(), Some(APPLIED_TWO));
    let ctx = CancellationToken::new();
    let mut runner = HistoryRunner::new(&fixture.config, MigratorOption::default()).await.unwrap();

    let err = runner.apply(&ctx, Some("20201109000001_test1.hcl")).await.unwrap_err();
    assert!(format!("{err:#}").contains("already been applied"));

    runner.apply(&ctx, Some("20201109000003_test3.hcl")).await.unwrap();
    let history = fixture.saved_history();
    assert!(history.contains("20201109000003_test3.hcl"));
    assert!(!history.contains("20201109000004_test4.hcl"));
}

#[tokio::test]
async fn apply_backfills_missing_hashes_for_applied_files() {
    let fixture = Fixture::new(&four_clean_migrations(), Some(APPLIED_TWO));
    let ctx = CancellationToken::new();
    let mut runner = HistoryRunner::new(&fixture.config, MigratorOption::default()).await.unwrap();
    runner.apply(&ctx, None).await.unwrap();

    // The two pre-existing records had no md5_hash; their files are still on
    // disk, so the backfill filled them in.
    let history = fixture.saved_history();
    for filename in ["20201109000001_test1.hcl", "20201109000002_test2.hcl"] {
        assert!(history.records()[filename].content_hash().is_some(), "{filename}");
    }
}

#[tokio::test]
async fn history_persist_failure_is_a_distinct_error() {
    let tmp = TempDir::new().unwrap();
    let migration_dir = tmp.path().join("migrations");
    fs::create_dir_all(&migration_dir).unwrap();
    write_migrations(
        &migration_dir,
        &[("20201109000001_test1.hcl", mock_migration("test1", false, false))],
    );

    let config = TfmigrateConfig {
        migration_dir: migration_dir.display().to_string(),
        history: Some(HistoryConfig {
            storage: StorageConfig::Mock(mock::Config {
                data: String::new(),
                read_error: false,
                write_error: true,
            }),
        }),
    };

    let ctx = CancellationToken::new();
    let mut runner = HistoryRunner::new(&config, MigratorOption::default()).await.unwrap();
    let err = runner.apply(&ctx, None).await.unwrap_err();
    assert!(
        format!("{err:#}").contains("the migration was applied but the history update failed"),
        "got: {err:#}"
    );
}

#[tokio::test]
async fn new_requires_history_storage() {
    let config = TfmigrateConfig { migration_dir: ".".to_string(), history: None };
    let err = HistoryRunner::new(&config, MigratorOption::default()).await.unwrap_err();
    assert!(format!("{err:#}").contains("history storage is not configured"));
}
