mod fixtures;

use fedindex::core::config::RemoteConfig;
use fedindex::core::error::FederationError;
use fedindex::core::broker;
use fedindex::plugins::analysis::{HotspotSummary, ModuleSummary, OwnershipSummary};
use fedindex::plugins::federation::{self, NewRemoteServer, RemoteServerUpdate};
use fedindex::plugins::index::{self, QueryFilter};
use fixtures::{AnalysisRepo, populated_repo, test_federation, test_store};

fn module(id: &str, name: &str, path: &str, responsibility: &str) -> ModuleSummary {
    ModuleSummary {
        id: id.to_string(),
        name: name.to_string(),
        path: path.to_string(),
        responsibility: responsibility.to_string(),
        tags: Vec::new(),
        confidence: 0.5,
    }
}

#[test]
fn create_open_list_delete_federation() {
    let (_tmp, store) = test_store();
    test_federation(&store, "platform");
    test_federation(&store, "mobile");

    let names: Vec<String> = federation::list(&store).unwrap().into_iter().map(|f| f.name).collect();
    assert_eq!(names, vec!["mobile", "platform"]);

    let fed = federation::open(&store, "platform").unwrap();
    let info = federation::info(&fed).unwrap();
    assert_eq!(info.description, "test federation");
    assert_eq!(info.schema_version, 1);

    assert!(matches!(
        federation::create(&store, "platform", ""),
        Err(FederationError::DuplicateId(_))
    ));

    federation::delete(&store, "platform").unwrap();
    assert!(matches!(federation::open(&store, "platform"), Err(FederationError::NotFound(_))));
    assert!(!store.federation_dir("platform").exists());
    assert_eq!(federation::list(&store).unwrap().len(), 1);
}

#[test]
fn add_repo_assigns_uid_and_rejects_duplicates() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    let web = populated_repo(tmp.path(), "web");

    let (entry, check) =
        federation::add_repo(&fed, "api", &api.path, &["backend".to_string(), "backend".to_string()]).unwrap();
    assert_eq!(entry.repo_id, "api");
    assert_eq!(entry.repo_uid.len(), 26);
    assert_eq!(entry.tags, vec!["backend"]);
    assert_eq!(entry.schema_version, Some(6));
    assert!(check.allows_sync());

    assert!(matches!(
        federation::add_repo(&fed, "api", &web.path, &[]),
        Err(FederationError::DuplicateId(_))
    ));
    assert!(matches!(
        federation::add_repo(&fed, "api-copy", &api.path, &[]),
        Err(FederationError::DuplicateId(_))
    ));
    assert!(matches!(
        federation::add_repo(&fed, "ghost", &tmp.path().join("missing"), &[]),
        Err(FederationError::ValidationError(_))
    ));
}

#[test]
fn incompatible_repo_can_still_be_registered() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let bare = AnalysisRepo::uninitialized(tmp.path(), "bare");

    let (entry, check) = federation::add_repo(&fed, "bare", &bare.path, &[]).unwrap();
    assert_eq!(entry.schema_version, None);
    assert!(!check.allows_sync());
    assert_eq!(federation::list_repos(&fed).unwrap().len(), 1);
}

#[test]
fn rename_keeps_uid_and_rejects_collisions() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    let web = populated_repo(tmp.path(), "web");
    let (before, _) = federation::add_repo(&fed, "api", &api.path, &[]).unwrap();
    federation::add_repo(&fed, "web", &web.path, &[]).unwrap();

    let after = federation::rename_repo(&fed, "api", "api-v2").unwrap();
    assert_eq!(after.repo_uid, before.repo_uid);
    assert_eq!(federation::get_repo(&fed, "api-v2").unwrap().repo_uid, before.repo_uid);
    assert!(matches!(federation::get_repo(&fed, "api"), Err(FederationError::NotFound(_))));

    assert!(matches!(
        federation::rename_repo(&fed, "api-v2", "web"),
        Err(FederationError::DuplicateId(_))
    ));
    assert!(matches!(
        federation::rename_repo(&fed, "nope", "other"),
        Err(FederationError::NotFound(_))
    ));
}

#[test]
fn replace_modules_is_wholesale_and_idempotent() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();

    let first = vec![
        module("m1", "auth", "src/auth", "Login"),
        module("m2", "billing", "src/billing", "Invoices"),
    ];
    assert_eq!(index::replace_modules(&fed, "api", &first).unwrap(), 2);
    assert_eq!(index::replace_modules(&fed, "api", &first).unwrap(), 2);
    let page = index::search_modules(&fed, &QueryFilter::default()).unwrap();
    assert_eq!(page.total, 2);

    let second = vec![module("m3", "search", "src/search", "Full text search")];
    index::replace_modules(&fed, "api", &second).unwrap();
    let page = index::search_modules(&fed, &QueryFilter::default()).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].module_id, "m3");
    assert_eq!(page.items[0].origin.repo_id, "api");

    assert!(matches!(
        index::replace_modules(&fed, "ghost", &second),
        Err(FederationError::NotFound(_))
    ));
}

#[test]
fn replace_for_one_repo_leaves_other_repos_alone() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    for name in ["api", "web"] {
        let repo = populated_repo(tmp.path(), name);
        federation::add_repo(&fed, name, &repo.path, &[]).unwrap();
    }
    index::replace_modules(&fed, "api", &[module("a1", "auth", "src/auth", "")]).unwrap();
    index::replace_modules(&fed, "web", &[module("w1", "ui", "src/ui", "")]).unwrap();
    index::replace_modules(&fed, "api", &[]).unwrap();

    let page = index::search_modules(&fed, &QueryFilter::default()).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].origin.repo_id, "web");
}

#[test]
fn filters_and_limits_report_total_before_limit() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    for (name, tag) in [("api", "backend"), ("web", "frontend")] {
        let repo = populated_repo(tmp.path(), name);
        federation::add_repo(&fed, name, &repo.path, &[tag.to_string()]).unwrap();
    }
    index::replace_modules(
        &fed,
        "api",
        &[
            module("a1", "auth", "src/auth", "Login and tokens"),
            module("a2", "billing", "src/billing", "Invoices"),
            module("a3", "tokens", "lib/tokens", "Token signing"),
        ],
    )
    .unwrap();
    index::replace_modules(&fed, "web", &[module("w1", "login-form", "src/login", "Token refresh UI")]).unwrap();

    let page = index::search_modules(
        &fed,
        &QueryFilter {
            limit: Some(2),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 4);

    let backend = index::search_modules(
        &fed,
        &QueryFilter {
            tags: vec!["backend".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(backend.total, 3);

    let src_only = index::search_modules(
        &fed,
        &QueryFilter {
            path_glob: Some("src/**".to_string()),
            repo_ids: vec!["api".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(src_only.total, 2);

    let text = index::search_modules(
        &fed,
        &QueryFilter {
            query: Some("token".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    let ids: Vec<&str> = text.items.iter().map(|m| m.module_id.as_str()).collect();
    assert!(ids.contains(&"a1"));
    assert!(ids.contains(&"a3"));
    assert!(ids.contains(&"w1"));
    assert!(!ids.contains(&"a2"));
    assert!(text.items.iter().all(|m| m.relevance.is_some()));
}

#[test]
fn top_hotspots_applies_cutoff_after_global_sort() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    for name in ["a", "b"] {
        let repo = AnalysisRepo::create(tmp.path(), name, 6);
        federation::add_repo(&fed, name, &repo.path, &[]).unwrap();
    }
    let hs = |t: &str, score: f64| HotspotSummary {
        target_id: t.to_string(),
        target_type: "file".to_string(),
        score,
        churn: 1,
        complexity: 1.0,
    };
    index::replace_hotspots(&fed, "a", &[hs("a1", 0.9), hs("a2", 0.2)]).unwrap();
    index::replace_hotspots(&fed, "b", &[hs("b1", 0.5), hs("b2", 0.95)]).unwrap();

    let page = index::top_hotspots(&fed, &QueryFilter::default(), 0.3).unwrap();
    let scores: Vec<f64> = page.items.iter().map(|h| h.score).collect();
    assert_eq!(scores, vec![0.95, 0.9, 0.5]);
    assert_eq!(page.total, 3);
}

#[test]
fn remote_server_crud_and_partial_update() {
    let (_tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let defaults = RemoteConfig::default();

    let server = federation::add_remote_server(
        &fed,
        &defaults,
        NewRemoteServer {
            name: "corp".to_string(),
            url: "https://index.corp.example/".to_string(),
            token: "${CKB_TOKEN}".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(server.url, "https://index.corp.example");
    assert_eq!(server.cache_ttl_secs, 3_600);
    assert_eq!(server.timeout_secs, 30);
    assert!(server.enabled);

    assert!(matches!(
        federation::add_remote_server(
            &fed,
            &defaults,
            NewRemoteServer {
                name: "corp".to_string(),
                url: "https://other".to_string(),
                ..Default::default()
            }
        ),
        Err(FederationError::DuplicateId(_))
    ));

    let disabled = federation::set_remote_enabled(&fed, "corp", false).unwrap();
    assert!(!disabled.enabled);
    assert_eq!(disabled.token, "${CKB_TOKEN}");
    assert_eq!(disabled.url, "https://index.corp.example");

    let updated = federation::update_remote_server(
        &fed,
        "corp",
        RemoteServerUpdate {
            cache_ttl_secs: Some(60),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(updated.cache_ttl_secs, 60);
    assert!(!updated.enabled);

    assert!(matches!(
        federation::update_remote_server(
            &fed,
            "corp",
            RemoteServerUpdate {
                timeout_secs: Some(0),
                ..Default::default()
            }
        ),
        Err(FederationError::ValidationError(_))
    ));

    federation::remove_remote_server(&fed, "corp").unwrap();
    assert!(federation::list_remote_servers(&fed).unwrap().is_empty());
    assert!(matches!(
        federation::remove_remote_server(&fed, "corp"),
        Err(FederationError::NotFound(_))
    ));
}

#[test]
fn stored_token_is_never_expanded() {
    let (_tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    federation::add_remote_server(
        &fed,
        &RemoteConfig::default(),
        NewRemoteServer {
            name: "corp".to_string(),
            url: "https://index.corp.example".to_string(),
            token: "${CKB_TOKEN}".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    let raw: String = fed
        .broker()
        .with_read(|conn| Ok(conn.query_row("SELECT token FROM remote_servers", [], |row| row.get(0))?))
        .unwrap();
    assert_eq!(raw, "${CKB_TOKEN}");
}

#[test]
fn mutations_are_audited() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();
    federation::remove_repo(&fed, "api").unwrap();

    let ops: Vec<String> = broker::read_audit_log(&store, "platform")
        .unwrap()
        .into_iter()
        .map(|e| e.op)
        .collect();
    assert_eq!(ops, vec!["federation.create", "repo.add", "repo.remove"]);
}

#[test]
fn ownership_free_text_ranks_by_match_quality() {
    let (tmp, store) = test_store();
    let fed = test_federation(&store, "platform");
    let api = populated_repo(tmp.path(), "api");
    federation::add_repo(&fed, "api", &api.path, &[]).unwrap();

    let rule = |pattern: &str, owners: &[&str]| OwnershipSummary {
        pattern: pattern.to_string(),
        owners: owners.iter().map(|o| o.to_string()).collect(),
        scope: "team".to_string(),
        confidence: 1.0,
    };
    index::replace_ownership(
        &fed,
        "api",
        &[
            rule("docs/**", &["@billing-docs"]),
            rule("src/billing/*", &["@team"]),
            rule("billing/**", &["@core"]),
            rule("web/*", &["@web"]),
            rule("lib/*", &["billing"]),
            rule("billing", &[]),
        ],
    )
    .unwrap();

    for query in ["billing", "BILLING"] {
        let page = index::search_ownership(
            &fed,
            &QueryFilter {
                query: Some(query.to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let patterns: Vec<&str> = page.items.iter().map(|o| o.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["billing", "lib/*", "billing/**", "docs/**", "src/billing/*"]);
        assert_eq!(page.total, 5);
    }

    let unfiltered = index::search_ownership(&fed, &QueryFilter::default()).unwrap();
    let patterns: Vec<&str> = unfiltered.items.iter().map(|o| o.pattern.as_str()).collect();
    assert_eq!(
        patterns,
        vec!["billing", "billing/**", "docs/**", "lib/*", "src/billing/*", "web/*"]
    );
}
