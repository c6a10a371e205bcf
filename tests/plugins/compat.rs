mod fixtures;

use fedindex::plugins::compat::{self, CompatibilityStatus};
use fedindex::plugins::federation;
use fixtures::{AnalysisRepo, test_federation, test_store};
use rusqlite::Connection;
use std::fs;

#[test]
fn check_reads_the_schema_version_marker() {
    let tmp = tempfile::tempdir().unwrap();
    for (version, expected) in [
        (3, CompatibilityStatus::Incompatible),
        (5, CompatibilityStatus::NeedsMigration),
        (6, CompatibilityStatus::Ok),
        (9, CompatibilityStatus::Incompatible),
    ] {
        let repo = AnalysisRepo::create(tmp.path(), &format!("v{}", version), version);
        let check = compat::check("r", &repo.path).unwrap();
        assert_eq!(check.status, expected, "version {}", version);
        assert_eq!(check.schema_version, Some(version));
    }
}

#[test]
fn needs_migration_suggests_a_remedy() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = AnalysisRepo::create(tmp.path(), "old", 4);
    let check = compat::check("old", &repo.path).unwrap();
    assert_eq!(check.status, CompatibilityStatus::NeedsMigration);
    assert!(check.action.unwrap().contains("--migrate"));
}

#[test]
fn missing_database_is_not_initialized() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = AnalysisRepo::uninitialized(tmp.path(), "bare");
    let check = compat::check("bare", &repo.path).unwrap();
    assert_eq!(check.status, CompatibilityStatus::Incompatible);
    assert!(check.message.contains("not initialized"));
    assert_eq!(check.schema_version, None);
}

#[test]
fn legacy_marker_table_and_inferred_version() {
    let tmp = tempfile::tempdir().unwrap();

    let legacy = tmp.path().join("legacy");
    fs::create_dir_all(legacy.join(".codeintel")).unwrap();
    let conn = Connection::open(legacy.join(".codeintel/analysis.db")).unwrap();
    conn.execute_batch("CREATE TABLE schema_version(version INTEGER); INSERT INTO schema_version VALUES(5);")
        .unwrap();
    assert_eq!(compat::check("legacy", &legacy).unwrap().schema_version, Some(5));

    let inferred = tmp.path().join("inferred");
    fs::create_dir_all(inferred.join(".codeintel")).unwrap();
    let conn = Connection::open(inferred.join(".codeintel/analysis.db")).unwrap();
    conn.execute_batch("CREATE TABLE modules(id TEXT, name TEXT, source TEXT);").unwrap();
    let check = compat::check("inferred", &inferred).unwrap();
    assert_eq!(check.schema_version, Some(6));
    assert_eq!(check.status, CompatibilityStatus::Ok);

    let unknown = tmp.path().join("unknown");
    fs::create_dir_all(unknown.join(".codeintel")).unwrap();
    let conn = Connection::open(unknown.join(".codeintel/analysis.db")).unwrap();
    conn.execute_batch("CREATE TABLE other(x INTEGER);").unwrap();
    let check = compat::check("unknown", &unknown).unwrap();
    assert_eq!(check.schema_version, None);
    assert_eq!(check.status, CompatibilityStatus::Incompatible);
}

#[test]
fn check_all_covers_every_repo_in_id_order() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let good = AnalysisRepo::create(tmp.path(), "good", 7);
    let old = AnalysisRepo::create(tmp.path(), "old", 5);
    let bare = AnalysisRepo::uninitialized(tmp.path(), "bare");
    federation::add_repo(&fed, "zeta", &good.path, &[]).unwrap();
    federation::add_repo(&fed, "alpha", &old.path, &[]).unwrap();
    federation::add_repo(&fed, "mid", &bare.path, &[]).unwrap();

    let checks = compat::check_all(&fed).unwrap();
    let summary: Vec<(&str, CompatibilityStatus)> =
        checks.iter().map(|c| (c.repo_id.as_str(), c.status)).collect();
    assert_eq!(
        summary,
        vec![
            ("alpha", CompatibilityStatus::NeedsMigration),
            ("mid", CompatibilityStatus::Incompatible),
            ("zeta", CompatibilityStatus::Ok),
        ]
    );
}
