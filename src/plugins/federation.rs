use crate::core::broker::DbBroker;
use crate::core::config::RemoteConfig;
use crate::core::error::FederationError;
use crate::core::pool;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::compat::{self, CompatibilityCheck, CompatibilityStatus};
use crate::plugins::index::{self, OriginRecord};
use crate::plugins::staleness::{self, StalenessLevel};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use ulid::Ulid;

const ACTOR: &str = "fedindex";

// --- Types ---

/// An open federation. Every operation receives it explicitly.
#[derive(Debug, Clone)]
pub struct Federation {
    store: Store,
    name: String,
    broker: DbBroker,
}

impl Federation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn broker(&self) -> &DbBroker {
        &self.broker
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationInfo {
    pub name: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub schema_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoEntry {
    pub repo_id: String,
    pub repo_uid: String,
    pub path: String,
    pub tags: Vec<String>,
    pub added_at: i64,
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
    pub schema_version: Option<u32>,
}

/// Registered remote index server. `token` is stored exactly as entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteServer {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    pub cache_ttl_secs: i64,
    pub timeout_secs: u64,
    pub enabled: bool,
    pub added_at: i64,
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewRemoteServer {
    pub name: String,
    pub url: String,
    pub token: String,
    pub cache_ttl_secs: Option<i64>,
    pub timeout_secs: Option<u64>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct RemoteServerUpdate {
    pub url: Option<String>,
    pub token: Option<String>,
    pub cache_ttl_secs: Option<i64>,
    pub timeout_secs: Option<u64>,
    pub enabled: Option<bool>,
}

// --- Validation ---

/// Letters, digits, `.`, `_`, `-`; at most 64 chars; must start alphanumeric.
pub fn validate_name(kind: &str, name: &str) -> Result<(), FederationError> {
    let valid = name.len() <= 64
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(FederationError::ValidationError(format!(
            "invalid {} name '{}': use letters, digits, '.', '_' or '-' (max 64, no leading punctuation)",
            kind, name
        )))
    }
}

/// Accepts `http(s)://host[...]` and strips trailing slashes.
pub fn normalize_server_url(url: &str) -> Result<String, FederationError> {
    let trimmed = url.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(trimmed.to_string()),
        _ => Err(FederationError::ValidationError(format!(
            "invalid server URL '{}': expected http:// or https:// with a host",
            url
        ))),
    }
}

fn parse_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

// --- Lifecycle ---

fn initialize_db(conn: &Connection, name: &str, description: &str, now: i64) -> Result<(), FederationError> {
    for ddl in schemas::federation_schema() {
        conn.execute_batch(ddl)?;
    }
    conn.execute_batch(schemas::FEDERATION_DB_INDEXES)?;

    let meta = [
        ("name", name.to_string()),
        ("description", description.to_string()),
        ("created_at", now.to_string()),
        ("updated_at", now.to_string()),
        ("schema_version", schemas::FEDERATION_SCHEMA_VERSION.to_string()),
    ];
    for (key, value) in meta {
        conn.execute(
            "INSERT OR IGNORE INTO federation_meta(key, value) VALUES(?1, ?2)",
            params![key, value],
        )?;
    }
    Ok(())
}

fn touch(conn: &Connection) -> Result<(), FederationError> {
    conn.execute(
        "UPDATE federation_meta SET value = ?1 WHERE key = 'updated_at'",
        [time::now_epoch().to_string()],
    )?;
    Ok(())
}

pub fn create(store: &Store, name: &str, description: &str) -> Result<Federation, FederationError> {
    validate_name("federation", name)?;
    if store.federation_exists(name) {
        return Err(FederationError::duplicate("federation", name));
    }
    fs::create_dir_all(store.federation_dir(name))?;

    let fed = handle(store, name);
    let now = time::now_epoch();
    fed.broker.with_write(ACTOR, "federation.create", |conn| {
        initialize_db(conn, name, description, now)
    })?;
    info!(federation = name, "federation created");
    Ok(fed)
}

fn handle(store: &Store, name: &str) -> Federation {
    Federation {
        store: store.clone(),
        name: name.to_string(),
        broker: DbBroker::new(store, name),
    }
}

pub fn open(store: &Store, name: &str) -> Result<Federation, FederationError> {
    validate_name("federation", name)?;
    if !store.federation_exists(name) {
        return Err(FederationError::not_found("federation", name));
    }
    Ok(handle(store, name))
}

/// Remove the federation directory and everything it owns.
pub fn delete(store: &Store, name: &str) -> Result<(), FederationError> {
    validate_name("federation", name)?;
    if !store.federation_exists(name) {
        return Err(FederationError::not_found("federation", name));
    }
    let db_path = store.federation_db_path(name);
    pool::global_pool().with_exclusive(&db_path, || {
        fs::remove_dir_all(store.federation_dir(name))?;
        Ok(())
    })?;
    info!(federation = name, "federation deleted");
    Ok(())
}

pub fn info(fed: &Federation) -> Result<FederationInfo, FederationError> {
    fed.broker.with_read(|conn| read_info(conn, &fed.name))
}

fn read_info(conn: &Connection, name: &str) -> Result<FederationInfo, FederationError> {
    let get = |key: &str| -> Result<Option<String>, FederationError> {
        Ok(conn
            .query_row(
                "SELECT value FROM federation_meta WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?)
    };
    let num = |key: &str| -> Result<i64, FederationError> {
        Ok(get(key)?.and_then(|v| v.parse().ok()).unwrap_or(0))
    };
    Ok(FederationInfo {
        name: name.to_string(),
        description: get("description")?.unwrap_or_default(),
        created_at: num("created_at")?,
        updated_at: num("updated_at")?,
        schema_version: num("schema_version")? as u32,
    })
}

/// Enumerate federations in the store, sorted by name.
pub fn list(store: &Store) -> Result<Vec<FederationInfo>, FederationError> {
    let dir = store.federations_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
        .filter(|n| store.federation_exists(n))
        .collect();
    names.sort();

    names.iter().map(|n| info(&handle(store, n))).collect()
}

// --- Repositories ---

fn read_repo(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepoEntry> {
    Ok(RepoEntry {
        repo_uid: row.get(0)?,
        repo_id: row.get(1)?,
        path: row.get(2)?,
        tags: parse_tags(&row.get::<_, String>(3)?),
        added_at: row.get(4)?,
        last_synced_at: row.get(5)?,
        last_error: row.get(6)?,
        schema_version: row.get::<_, Option<i64>>(7)?.map(|v| v as u32),
    })
}

const REPO_COLUMNS: &str =
    "repo_uid, repo_id, path, tags, added_at, last_synced_at, last_error, schema_version";

fn find_repo(conn: &Connection, repo_id: &str) -> Result<Option<RepoEntry>, FederationError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM repos WHERE repo_id = ?1", REPO_COLUMNS),
            [repo_id],
            read_repo,
        )
        .optional()?)
}

pub fn get_repo(fed: &Federation, repo_id: &str) -> Result<RepoEntry, FederationError> {
    fed.broker
        .with_read(|conn| find_repo(conn, repo_id))?
        .ok_or_else(|| FederationError::not_found("repository", repo_id))
}

pub fn list_repos(fed: &Federation) -> Result<Vec<RepoEntry>, FederationError> {
    fed.broker.with_read(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM repos ORDER BY repo_id",
            REPO_COLUMNS
        ))?;
        let rows = stmt.query_map([], read_repo)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

/// Register a local repository.
///
/// The path is canonicalised, a permanent `repo_uid` is assigned and the
/// analysis store is checked once so the entry starts with a known schema
/// version. An incompatible repository is still registered; sync reports it.
pub fn add_repo(
    fed: &Federation,
    repo_id: &str,
    path: &Path,
    tags: &[String],
) -> Result<(RepoEntry, CompatibilityCheck), FederationError> {
    validate_name("repository", repo_id)?;
    let canonical = path.canonicalize().map_err(|e| {
        FederationError::ValidationError(format!("cannot resolve path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_dir() {
        return Err(FederationError::ValidationError(format!(
            "'{}' is not a directory",
            canonical.display()
        )));
    }
    let path_str = canonical.to_string_lossy().to_string();
    let check = compat::check(repo_id, &canonical)?;
    if check.status != CompatibilityStatus::Ok {
        warn!(federation = %fed.name, repo_id, status = %check.status, "{}", check.message);
    }

    let entry = RepoEntry {
        repo_id: repo_id.to_string(),
        repo_uid: Ulid::new().to_string(),
        path: path_str,
        tags: normalize_tags(tags),
        added_at: time::now_epoch(),
        last_synced_at: None,
        last_error: None,
        schema_version: check.schema_version,
    };

    fed.broker.with_write(ACTOR, "repo.add", |conn| {
        if find_repo(conn, repo_id)?.is_some() {
            return Err(FederationError::duplicate("repository", repo_id));
        }
        let path_taken: Option<String> = conn
            .query_row(
                "SELECT repo_id FROM repos WHERE path = ?1",
                [&entry.path],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(other) = path_taken {
            return Err(FederationError::DuplicateId(format!(
                "path '{}' is already registered as '{}'",
                entry.path, other
            )));
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO repos(repo_uid, repo_id, path, tags, added_at, schema_version)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.repo_uid,
                entry.repo_id,
                entry.path,
                serde_json::to_string(&entry.tags)?,
                entry.added_at,
                entry.schema_version,
            ],
        )?;
        index::upsert_origin(
            &tx,
            &OriginRecord {
                origin_uid: entry.repo_uid.clone(),
                repo_id: entry.repo_id.clone(),
                server_name: None,
                display_name: entry.repo_id.clone(),
                description: String::new(),
                tags: entry.tags.clone(),
                synced_at: None,
            },
        )?;
        touch(&tx)?;
        tx.commit()?;
        Ok(())
    })?;
    info!(federation = %fed.name, repo_id, repo_uid = %entry.repo_uid, "repository added");
    Ok((entry, check))
}

/// Unregister a repository and purge its index rows.
pub fn remove_repo(fed: &Federation, repo_id: &str) -> Result<(), FederationError> {
    fed.broker.with_write(ACTOR, "repo.remove", |conn| {
        let repo = find_repo(conn, repo_id)?
            .ok_or_else(|| FederationError::not_found("repository", repo_id))?;
        let tx = conn.unchecked_transaction()?;
        index::delete_origin(&tx, &repo.repo_uid)?;
        tx.execute("DELETE FROM sync_log WHERE repo_uid = ?1", [&repo.repo_uid])?;
        tx.execute("DELETE FROM repos WHERE repo_uid = ?1", [&repo.repo_uid])?;
        touch(&tx)?;
        tx.commit()?;
        Ok(())
    })?;
    info!(federation = %fed.name, repo_id, "repository removed");
    Ok(())
}

/// Change a repository alias. Index rows follow through `repo_uid`.
pub fn rename_repo(fed: &Federation, old_id: &str, new_id: &str) -> Result<RepoEntry, FederationError> {
    validate_name("repository", new_id)?;
    let entry = fed.broker.with_write(ACTOR, "repo.rename", |conn| {
        let repo = find_repo(conn, old_id)?
            .ok_or_else(|| FederationError::not_found("repository", old_id))?;
        if old_id != new_id && find_repo(conn, new_id)?.is_some() {
            return Err(FederationError::duplicate("repository", new_id));
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE repos SET repo_id = ?1 WHERE repo_uid = ?2",
            params![new_id, repo.repo_uid],
        )?;
        tx.execute(
            "UPDATE origins SET repo_id = ?1, display_name = ?1 WHERE origin_uid = ?2",
            params![new_id, repo.repo_uid],
        )?;
        touch(&tx)?;
        tx.commit()?;
        Ok(RepoEntry {
            repo_id: new_id.to_string(),
            ..repo
        })
    })?;
    info!(federation = %fed.name, old_id, new_id, "repository renamed");
    Ok(entry)
}

// --- Remote servers ---

const SERVER_COLUMNS: &str =
    "name, url, token, cache_ttl_secs, timeout_secs, enabled, added_at, last_synced_at, last_error";

fn read_server(row: &rusqlite::Row<'_>) -> rusqlite::Result<RemoteServer> {
    Ok(RemoteServer {
        name: row.get(0)?,
        url: row.get(1)?,
        token: row.get(2)?,
        cache_ttl_secs: row.get(3)?,
        timeout_secs: row.get::<_, i64>(4)? as u64,
        enabled: row.get::<_, i64>(5)? != 0,
        added_at: row.get(6)?,
        last_synced_at: row.get(7)?,
        last_error: row.get(8)?,
    })
}

fn find_server(conn: &Connection, name: &str) -> Result<Option<RemoteServer>, FederationError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM remote_servers WHERE name = ?1", SERVER_COLUMNS),
            [name],
            read_server,
        )
        .optional()?)
}

pub fn get_remote_server(fed: &Federation, name: &str) -> Result<RemoteServer, FederationError> {
    fed.broker
        .with_read(|conn| find_server(conn, name))?
        .ok_or_else(|| FederationError::not_found("remote server", name))
}

pub fn list_remote_servers(fed: &Federation) -> Result<Vec<RemoteServer>, FederationError> {
    fed.broker.with_read(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM remote_servers ORDER BY name",
            SERVER_COLUMNS
        ))?;
        let rows = stmt.query_map([], read_server)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

fn validate_durations(cache_ttl_secs: i64, timeout_secs: u64) -> Result<(), FederationError> {
    if cache_ttl_secs <= 0 {
        return Err(FederationError::ValidationError(
            "cache TTL must be positive".to_string(),
        ));
    }
    if timeout_secs == 0 {
        return Err(FederationError::ValidationError(
            "timeout must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Register a remote server. The token is not resolved here.
pub fn add_remote_server(
    fed: &Federation,
    defaults: &RemoteConfig,
    new: NewRemoteServer,
) -> Result<RemoteServer, FederationError> {
    validate_name("remote server", &new.name)?;
    let server = RemoteServer {
        url: normalize_server_url(&new.url)?,
        token: new.token,
        cache_ttl_secs: new.cache_ttl_secs.unwrap_or(defaults.default_cache_ttl_secs),
        timeout_secs: new.timeout_secs.unwrap_or(defaults.default_timeout_secs),
        enabled: true,
        added_at: time::now_epoch(),
        last_synced_at: None,
        last_error: None,
        name: new.name,
    };
    validate_durations(server.cache_ttl_secs, server.timeout_secs)?;

    fed.broker.with_write(ACTOR, "remote.add", |conn| {
        if find_server(conn, &server.name)?.is_some() {
            return Err(FederationError::duplicate("remote server", &server.name));
        }
        conn.execute(
            "INSERT INTO remote_servers(name, url, token, cache_ttl_secs, timeout_secs, enabled, added_at)
             VALUES(?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                server.name,
                server.url,
                server.token,
                server.cache_ttl_secs,
                server.timeout_secs as i64,
                server.added_at,
            ],
        )?;
        touch(conn)
    })?;
    info!(federation = %fed.name, server = %server.name, url = %server.url, "remote server added");
    Ok(server)
}

pub fn update_remote_server(
    fed: &Federation,
    name: &str,
    update: RemoteServerUpdate,
) -> Result<RemoteServer, FederationError> {
    let url = update.url.as_deref().map(normalize_server_url).transpose()?;
    fed.broker.with_write(ACTOR, "remote.update", |conn| {
        let current = find_server(conn, name)?
            .ok_or_else(|| FederationError::not_found("remote server", name))?;
        let next = RemoteServer {
            url: url.unwrap_or(current.url.clone()),
            token: update.token.unwrap_or(current.token.clone()),
            cache_ttl_secs: update.cache_ttl_secs.unwrap_or(current.cache_ttl_secs),
            timeout_secs: update.timeout_secs.unwrap_or(current.timeout_secs),
            enabled: update.enabled.unwrap_or(current.enabled),
            ..current
        };
        validate_durations(next.cache_ttl_secs, next.timeout_secs)?;
        conn.execute(
            "UPDATE remote_servers
             SET url = ?1, token = ?2, cache_ttl_secs = ?3, timeout_secs = ?4, enabled = ?5
             WHERE name = ?6",
            params![
                next.url,
                next.token,
                next.cache_ttl_secs,
                next.timeout_secs as i64,
                next.enabled as i64,
                name,
            ],
        )?;
        touch(conn)?;
        Ok(next)
    })
}

pub fn set_remote_enabled(fed: &Federation, name: &str, enabled: bool) -> Result<RemoteServer, FederationError> {
    update_remote_server(
        fed,
        name,
        RemoteServerUpdate {
            enabled: Some(enabled),
            ..Default::default()
        },
    )
}

/// Unregister a server; its cached repositories and rows go with it.
pub fn remove_remote_server(fed: &Federation, name: &str) -> Result<(), FederationError> {
    fed.broker.with_write(ACTOR, "remote.remove", |conn| {
        let removed = conn.execute("DELETE FROM remote_servers WHERE name = ?1", [name])?;
        if removed == 0 {
            return Err(FederationError::not_found("remote server", name));
        }
        touch(conn)
    })?;
    info!(federation = %fed.name, server = name, "remote server removed");
    Ok(())
}

// --- Status ---

#[derive(Debug, Clone, Serialize)]
pub struct RepoStatus {
    pub repo: RepoEntry,
    pub compatibility: CompatibilityCheck,
    pub staleness: StalenessLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct FederationStatus {
    pub info: FederationInfo,
    pub repo_count: usize,
    pub remote_server_count: usize,
    pub enabled_remote_count: usize,
    pub repos: Vec<RepoStatus>,
    pub staleness: staleness::FederationStaleness,
}

/// Summarise a federation: per-repository compatibility and freshness.
pub fn federation_status(fed: &Federation, now: i64) -> Result<FederationStatus, FederationError> {
    let info = info(fed)?;
    let repos = list_repos(fed)?;
    let servers = list_remote_servers(fed)?;
    let checks = compat::check_all(fed)?;

    let repo_statuses: Vec<RepoStatus> = repos
        .into_iter()
        .zip(checks)
        .map(|(repo, compatibility)| RepoStatus {
            staleness: StalenessLevel::classify(now, repo.last_synced_at),
            repo,
            compatibility,
        })
        .collect();
    let staleness =
        staleness::summarize(repo_statuses.iter().map(|r| (r.repo.repo_id.as_str(), r.staleness)));

    Ok(FederationStatus {
        info,
        repo_count: repo_statuses.len(),
        remote_server_count: servers.len(),
        enabled_remote_count: servers.iter().filter(|s| s.enabled).count(),
        repos: repo_statuses,
        staleness,
    })
}
