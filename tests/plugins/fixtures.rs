//! Shared helpers for the plugin integration tests.
#![allow(dead_code)]

use fedindex::core::error::FederationError;
use fedindex::core::store::Store;
use fedindex::plugins::analysis::{
    AnalysisSnapshot, DecisionSummary, HotspotSummary, ModuleSummary, OwnershipSummary,
};
use fedindex::plugins::federation::{self, Federation, RemoteServer};
use fedindex::plugins::remote::{RemoteRepoInfo, RemoteRequest, RemoteTransport};
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::{TempDir, tempdir};

pub fn test_store() -> (TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path().join("home"));
    (tmp, store)
}

pub fn test_federation(store: &Store, name: &str) -> Federation {
    federation::create(store, name, "test federation").unwrap()
}

/// A repository directory with an analysis database at the given schema version.
pub struct AnalysisRepo {
    pub path: PathBuf,
}

impl AnalysisRepo {
    pub fn create(parent: &Path, name: &str, version: u32) -> Self {
        let path = parent.join(name);
        fs::create_dir_all(path.join(".codeintel")).unwrap();
        let repo = Self { path };
        let conn = repo.conn();
        conn.execute_batch(
            "CREATE TABLE schema_versions(version INTEGER NOT NULL);
             CREATE TABLE modules(id TEXT PRIMARY KEY, name TEXT NOT NULL, path TEXT, responsibility TEXT,
                                  tags TEXT, confidence REAL);
             CREATE TABLE ownership(pattern TEXT NOT NULL, owners TEXT NOT NULL, scope TEXT, confidence REAL);
             CREATE TABLE hotspots(target_id TEXT NOT NULL, target_type TEXT, score REAL, churn INTEGER,
                                   complexity REAL);
             CREATE TABLE decisions(id TEXT PRIMARY KEY, title TEXT NOT NULL, body TEXT, status TEXT NOT NULL,
                                    author TEXT, affected_modules TEXT, updated_at INTEGER);",
        )
        .unwrap();
        conn.execute("INSERT INTO schema_versions(version) VALUES(?1)", [version])
            .unwrap();
        repo
    }

    /// A directory with no analysis database at all.
    pub fn uninitialized(parent: &Path, name: &str) -> Self {
        let path = parent.join(name);
        fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn db_path(&self) -> PathBuf {
        self.path.join(".codeintel").join("analysis.db")
    }

    pub fn conn(&self) -> Connection {
        Connection::open(self.db_path()).unwrap()
    }

    pub fn module(&self, id: &str, name: &str, path: &str, responsibility: &str, tags: &[&str]) -> &Self {
        self.conn()
            .execute(
                "INSERT INTO modules(id, name, path, responsibility, tags, confidence) VALUES(?1, ?2, ?3, ?4, ?5, 0.9)",
                params![id, name, path, responsibility, serde_json::to_string(tags).unwrap()],
            )
            .unwrap();
        self
    }

    pub fn owner(&self, pattern: &str, owners: &[&str]) -> &Self {
        self.conn()
            .execute(
                "INSERT INTO ownership(pattern, owners, scope, confidence) VALUES(?1, ?2, 'maintainer', 1.0)",
                params![pattern, serde_json::to_string(owners).unwrap()],
            )
            .unwrap();
        self
    }

    pub fn hotspot(&self, target: &str, score: f64) -> &Self {
        self.conn()
            .execute(
                "INSERT INTO hotspots(target_id, target_type, score, churn, complexity) VALUES(?1, 'file', ?2, 10, 5.0)",
                params![target, score],
            )
            .unwrap();
        self
    }

    pub fn decision(&self, id: &str, title: &str, status: &str, affected: &[&str], updated_at: i64) -> &Self {
        self.conn()
            .execute(
                "INSERT INTO decisions(id, title, body, status, author, affected_modules, updated_at)
                 VALUES(?1, ?2, ?3, ?4, 'alice', ?5, ?6)",
                params![
                    id,
                    title,
                    format!("Context for {}", title),
                    status,
                    serde_json::to_string(affected).unwrap(),
                    updated_at
                ],
            )
            .unwrap();
        self
    }

    pub fn set_version(&self, version: u32) {
        self.conn()
            .execute("UPDATE schema_versions SET version = ?1", [version])
            .unwrap();
    }
}

/// A compatible repository with one of everything.
pub fn populated_repo(parent: &Path, name: &str) -> AnalysisRepo {
    let repo = AnalysisRepo::create(parent, name, 6);
    repo.module(
        &format!("{}-auth", name),
        "auth",
        "src/auth",
        "Authentication and session tokens",
        &["security"],
    )
    .module(&format!("{}-billing", name), "billing", "src/billing", "Invoices and payments", &[])
    .owner("src/auth/**", &["@security-team"])
    .hotspot("src/auth/session.rs", 0.8)
    .decision("ADR-1", "Use JWT for sessions", "accepted", &["auth"], 1_700_000_000);
    repo
}

pub fn snapshot_with_hotspots(prefix: &str, scores: &[f64]) -> AnalysisSnapshot {
    AnalysisSnapshot {
        modules: vec![ModuleSummary {
            id: format!("{}-core", prefix),
            name: format!("{}-core", prefix),
            path: "src/core".to_string(),
            responsibility: format!("Core services of {}", prefix),
            tags: vec!["remote".to_string()],
            confidence: 0.7,
        }],
        ownership: vec![OwnershipSummary {
            pattern: "src/**".to_string(),
            owners: vec![format!("@{}-team", prefix)],
            scope: "maintainer".to_string(),
            confidence: 1.0,
        }],
        hotspots: scores
            .iter()
            .enumerate()
            .map(|(i, score)| HotspotSummary {
                target_id: format!("src/{}_{}.go", prefix, i),
                target_type: "file".to_string(),
                score: *score,
                churn: 3,
                complexity: 2.0,
            })
            .collect(),
        decisions: vec![DecisionSummary {
            id: format!("{}-ADR-1", prefix),
            title: format!("Adopt gRPC in {}", prefix),
            body: String::new(),
            status: "accepted".to_string(),
            author: "bob".to_string(),
            affected_modules: vec![format!("{}-core", prefix)],
            updated_at: Some(1_700_000_500),
        }],
    }
}

pub fn repo_info(id: &str) -> RemoteRepoInfo {
    RemoteRepoInfo {
        id: id.to_string(),
        name: id.to_string(),
        description: format!("remote repository {}", id),
        ..Default::default()
    }
}

/// What a fake server answers.
#[derive(Clone)]
pub enum FakeServer {
    Repos(Vec<(RemoteRepoInfo, AnalysisSnapshot)>),
    Timeout,
    Status(u16, String),
}

/// In-memory transport keyed by server name.
#[derive(Default)]
pub struct FakeTransport {
    servers: Mutex<HashMap<String, FakeServer>>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, server: &str, behaviour: FakeServer) {
        self.servers.lock().unwrap().insert(server.to_string(), behaviour);
    }

    /// `(server, path, token)` for every call made.
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl RemoteTransport for FakeTransport {
    fn get(&self, req: &RemoteRequest<'_>) -> Result<serde_json::Value, FederationError> {
        let name = req.server.name.clone();
        self.calls
            .lock()
            .unwrap()
            .push((name.clone(), req.path.to_string(), req.token.to_string()));
        let behaviour = self.servers.lock().unwrap().get(&name).cloned();
        match behaviour {
            None | Some(FakeServer::Timeout) => Err(FederationError::ConnectivityError {
                server: name,
                message: format!("request timed out after {}s", req.timeout.as_secs()),
            }),
            Some(FakeServer::Status(status, code)) => Err(FederationError::RemoteError {
                server: name,
                status,
                code,
                message: "rejected".to_string(),
            }),
            Some(FakeServer::Repos(repos)) => {
                if req.path == "/index/repos" {
                    let infos: Vec<&RemoteRepoInfo> = repos.iter().map(|(info, _)| info).collect();
                    return Ok(serde_json::json!({ "data": { "repos": infos }, "meta": { "sync_seq": 1 } }));
                }
                let found = repos
                    .iter()
                    .find(|(info, _)| req.path == format!("/index/repos/{}/summary", info.id));
                match found {
                    Some((_, snapshot)) => Ok(serde_json::json!({ "data": snapshot })),
                    None => Err(FederationError::RemoteError {
                        server: name,
                        status: 404,
                        code: "not_found".to_string(),
                        message: req.path.to_string(),
                    }),
                }
            }
        }
    }
}

pub fn server_names(servers: &[RemoteServer]) -> Vec<&str> {
    servers.iter().map(|s| s.name.as_str()).collect()
}

/// Write `content` at `rel` under `root`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}
