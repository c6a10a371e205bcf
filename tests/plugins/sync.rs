mod fixtures;

use fedindex::core::config::SyncConfig;
use fedindex::core::time::ManualClock;
use fedindex::plugins::federation;
use fedindex::plugins::index::{self, QueryFilter};
use fedindex::plugins::staleness::StalenessLevel;
use fedindex::plugins::sync::{self, SyncEngine, SyncOptions, SyncStatus};
use fixtures::{AnalysisRepo, populated_repo, test_federation, test_store};
use std::sync::Arc;

fn engine() -> SyncEngine {
    SyncEngine::new(&SyncConfig::default())
}

fn force() -> SyncOptions {
    SyncOptions {
        force: true,
        ..Default::default()
    }
}

#[test]
fn sync_pulls_every_category() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();

    let results = engine().sync(&fed, &SyncOptions::default()).unwrap();
    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.status, SyncStatus::Success);
    assert_eq!(
        (r.modules_synced, r.ownership_synced, r.hotspots_synced, r.decisions_synced),
        (2, 1, 1, 1)
    );

    let repo = federation::get_repo(&fed, "api").unwrap();
    assert!(repo.last_synced_at.is_some());
    assert_eq!(repo.last_error, None);

    let decisions = index::search_decisions(&fed, &QueryFilter::default()).unwrap();
    assert_eq!(decisions.items[0].title, "Use JWT for sessions");
    assert_eq!(decisions.items[0].affected_modules, vec!["auth"]);
}

#[test]
fn syncing_unchanged_repo_twice_yields_identical_rows() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();
    let all = QueryFilter::default();

    engine().sync(&fed, &SyncOptions::default()).unwrap();
    let modules = index::search_modules(&fed, &all).unwrap();
    let ownership = index::search_ownership(&fed, &all).unwrap();
    let hotspots = index::top_hotspots(&fed, &all, 0.0).unwrap();
    let decisions = index::search_decisions(&fed, &all).unwrap();

    let second = engine().sync(&fed, &SyncOptions::default()).unwrap();
    assert_eq!(second[0].status, SyncStatus::Skipped);
    let third = engine().sync(&fed, &force()).unwrap();
    assert_eq!(third[0].status, SyncStatus::Success);

    assert_eq!(index::search_modules(&fed, &all).unwrap(), modules);
    assert_eq!(index::search_ownership(&fed, &all).unwrap(), ownership);
    assert_eq!(index::top_hotspots(&fed, &all, 0.0).unwrap(), hotspots);
    assert_eq!(index::search_decisions(&fed, &all).unwrap(), decisions);
}

#[test]
fn changed_analysis_data_is_resynced() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();
    engine().sync(&fed, &SyncOptions::default()).unwrap();

    api.module("api-search", "search", "src/search", "Query parsing", &[]);
    let results = engine().sync(&fed, &SyncOptions::default()).unwrap();
    assert_eq!(results[0].status, SyncStatus::Success);
    assert_eq!(results[0].modules_synced, 3);
}

#[test]
fn incompatible_repo_fails_alone() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let a = populated_repo(tmp.path(), "a");
    let b = AnalysisRepo::create(tmp.path(), "b", 2);
    federation::add_repo(&fed, "a", &a.path, &[]).unwrap();
    federation::add_repo(&fed, "b", &b.path, &[]).unwrap();

    let results = engine().sync(&fed, &SyncOptions::default()).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].repo_id, "a");
    assert_eq!(results[0].status, SyncStatus::Success);
    assert_eq!(results[1].repo_id, "b");
    assert_eq!(results[1].status, SyncStatus::Failed);
    assert!(results[1].error.as_deref().unwrap().contains("older than"));
    assert_eq!(sync::tally(&results), (1, 1, 0));

    let modules = index::search_modules(&fed, &QueryFilter::default()).unwrap();
    assert_eq!(modules.total, 2);
    assert!(modules.items.iter().all(|m| m.origin.repo_id == "a"));

    let b_entry = federation::get_repo(&fed, "b").unwrap();
    assert!(b_entry.last_error.is_some());
    assert!(b_entry.last_synced_at.is_none());
}

#[test]
fn failure_keeps_previously_indexed_rows() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();
    engine().sync(&fed, &SyncOptions::default()).unwrap();

    api.set_version(99);
    let results = engine().sync(&fed, &force()).unwrap();
    assert_eq!(results[0].status, SyncStatus::Failed);
    assert_eq!(index::search_modules(&fed, &QueryFilter::default()).unwrap().total, 2);
}

#[test]
fn needs_migration_syncs_with_warning() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let old = AnalysisRepo::create(tmp.path(), "old", 5);
    old.module("m1", "core", "src", "", &[]);
    federation::add_repo(&fed, "old", &old.path, &[]).unwrap();

    let results = engine().sync(&fed, &SyncOptions::default()).unwrap();
    assert_eq!(results[0].status, SyncStatus::Success);
    assert!(results[0].warning.is_some());
    assert_eq!(federation::get_repo(&fed, "old").unwrap().schema_version, Some(5));
}

#[test]
fn dry_run_counts_without_writing() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();

    let results = engine()
        .sync(
            &fed,
            &SyncOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results[0].status, SyncStatus::Success);
    assert!(results[0].dry_run);
    assert_eq!(results[0].modules_synced, 2);

    assert_eq!(index::search_modules(&fed, &QueryFilter::default()).unwrap().total, 0);
    assert!(federation::get_repo(&fed, "api").unwrap().last_synced_at.is_none());
    assert!(sync::sync_history(&fed, "api", 10).unwrap().is_empty());
}

#[test]
fn rename_then_resync_replaces_the_same_rows() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    let (before, _) = federation::add_repo(&fed, "api", &api.path, &[]).unwrap();
    engine().sync(&fed, &SyncOptions::default()).unwrap();

    let renamed = federation::rename_repo(&fed, "api", "api-v2").unwrap();
    assert_eq!(renamed.repo_uid, before.repo_uid);

    let modules = index::search_modules(&fed, &QueryFilter::default()).unwrap();
    assert_eq!(modules.total, 2);
    assert!(modules.items.iter().all(|m| m.origin.repo_id == "api-v2"));

    let results = engine().sync(&fed, &force()).unwrap();
    assert_eq!(results[0].repo_id, "api-v2");
    assert_eq!(results[0].repo_uid.as_deref(), Some(before.repo_uid.as_str()));

    let by_new_id = index::search_modules(
        &fed,
        &QueryFilter {
            repo_ids: vec!["api-v2".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(by_new_id.total, 2);
    let by_old_id = index::search_modules(
        &fed,
        &QueryFilter {
            repo_ids: vec!["api".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(by_old_id.total, 0);
}

#[test]
fn remove_repo_purges_its_rows() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    for name in ["api", "web"] {
        let repo = populated_repo(tmp.path(), name);
        federation::add_repo(&fed, name, &repo.path, &[]).unwrap();
    }
    engine().sync(&fed, &SyncOptions::default()).unwrap();

    federation::remove_repo(&fed, "api").unwrap();
    let modules = index::search_modules(&fed, &QueryFilter::default()).unwrap();
    assert_eq!(modules.total, 2);
    assert!(modules.items.iter().all(|m| m.origin.repo_id == "web"));
    assert_eq!(index::top_hotspots(&fed, &QueryFilter::default(), 0.0).unwrap().total, 1);
}

#[test]
fn restricted_sync_reports_unknown_repos() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    for name in ["api", "web"] {
        let repo = populated_repo(tmp.path(), name);
        federation::add_repo(&fed, name, &repo.path, &[]).unwrap();
    }
    let results = engine()
        .sync(
            &fed,
            &SyncOptions {
                repo_ids: vec!["web".to_string(), "ghost".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].repo_id, "web");
    assert_eq!(results[0].status, SyncStatus::Success);
    assert_eq!(results[1].repo_id, "ghost");
    assert_eq!(results[1].status, SyncStatus::Failed);
    assert!(federation::get_repo(&fed, "api").unwrap().last_synced_at.is_none());
}

#[test]
fn cancelled_pass_still_returns_every_result() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();

    let engine = engine();
    engine.cancel_token().cancel();
    let results = engine.sync(&fed, &SyncOptions::default()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, SyncStatus::Failed);
    assert!(results[0].error.as_deref().unwrap().contains("cancelled"));
}

#[test]
fn sync_log_and_staleness_follow_the_clock() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();

    let t0 = 1_800_000_000;
    let clock = Arc::new(ManualClock::new(t0));
    let engine = SyncEngine::new(&SyncConfig::default()).with_clock(clock.clone());
    engine.sync(&fed, &SyncOptions::default()).unwrap();

    let history = sync::sync_history(&fed, "api", 5).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "success");
    assert_eq!(history[0].modules_synced, 2);
    assert_eq!(history[0].completed_at, t0);

    let status = federation::federation_status(&fed, t0 + 3_600).unwrap();
    assert_eq!(status.repos[0].staleness, StalenessLevel::Fresh);
    assert!(!status.staleness.refresh_recommended);

    let later = federation::federation_status(&fed, t0 + 10 * 86_400).unwrap();
    assert_eq!(later.staleness.overall, StalenessLevel::Stale);
    assert_eq!(later.staleness.stale_repos, vec!["api"]);
}
