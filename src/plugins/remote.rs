//! Remote Client & Cache.
//!
//! Talks to remote index servers over HTTP/JSON and materialises what they
//! expose into the federation index as remote-origin rows
//! (`origin_uid = remote:<server>:<repo>`). Cached rows are stamped with the
//! fetch time; a server's cache is fresh while `now - fetched_at < cache_ttl`.
//!
//! Protocol (every response is an envelope `{data, meta, error}`):
//!
//! - `GET {url}/index/repos` -> `data.repos: [RemoteRepoInfo]`; also the ping check.
//! - `GET {url}/index/repos/{id}/summary` -> `data: AnalysisSnapshot`.

use crate::core::config::RemoteConfig;
use crate::core::error::FederationError;
use crate::core::time::{CancelToken, Clock, Deadline, SystemClock};
use crate::plugins::analysis::AnalysisSnapshot;
use crate::plugins::federation::{self, Federation, RemoteServer};
use crate::plugins::index::{self, OriginRecord, SnapshotCounts};
use rayon::prelude::*;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use reqwest::header::ACCEPT;
use rusqlite::params;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::{Arc, LazyLock, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ACTOR: &str = "remote";
const USER_AGENT: &str = concat!("fedindex/", env!("CARGO_PKG_VERSION"));
const REPOS_PATH: &str = "/index/repos";

// --- Credentials ---

/// Environment lookup used to resolve `${VAR}` token placeholders.
pub trait EnvLookup: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// In-memory environment; can be changed after the client is built.
#[derive(Debug, Default)]
pub struct MapEnv {
    vars: RwLock<FxHashMap<String, String>>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: &str) {
        if let Ok(mut vars) = self.vars.write() {
            vars.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove(&self, name: &str) {
        if let Ok(mut vars) = self.vars.write() {
            vars.remove(name);
        }
    }
}

impl EnvLookup for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.read().ok().and_then(|vars| vars.get(name).cloned())
    }
}

static TOKEN_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Expand `${VAR}` placeholders in a stored token.
///
/// A token without placeholders is returned unchanged. An unset variable is
/// `MissingEnvVar`; nothing is ever written back.
pub fn resolve_token(raw: &str, env: &dyn EnvLookup) -> Result<String, FederationError> {
    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in TOKEN_PLACEHOLDER.captures_iter(raw) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = env
            .var(name.as_str())
            .ok_or_else(|| FederationError::MissingEnvVar(name.as_str().to_string()))?;
        out.push_str(&raw[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&raw[last..]);
    Ok(out)
}

// --- Wire types ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvelopeMeta {
    #[serde(default)]
    pub sync_seq: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    meta: Option<EnvelopeMeta>,
    #[serde(default)]
    error: Option<EnvelopeError>,
}

/// One repository as listed by a remote server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteRepoInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub languages: Vec<String>,
    pub commit: String,
    pub index_version: String,
    pub sync_seq: i64,
    pub indexed_at: i64,
    pub symbol_count: i64,
    pub file_count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RepoList {
    #[serde(default)]
    repos: Vec<RemoteRepoInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRepo {
    pub info: RemoteRepoInfo,
    pub snapshot: AnalysisSnapshot,
}

/// Build the error for a non-2xx response from its body.
pub fn error_from_body(server: &str, status: u16, body: &[u8]) -> FederationError {
    let (code, message) = match serde_json::from_slice::<Envelope<serde_json::Value>>(body) {
        Ok(Envelope { error: Some(err), .. }) => (err.code, err.message),
        Ok(_) => ("unknown_error".to_string(), format!("HTTP {}", status)),
        Err(_) if body.is_empty() => ("unknown_error".to_string(), format!("HTTP {}", status)),
        Err(_) => ("unknown_error".to_string(), String::from_utf8_lossy(body).into_owned()),
    };
    FederationError::RemoteError {
        server: server.to_string(),
        status,
        code,
        message,
    }
}

fn unwrap_envelope<T: DeserializeOwned>(server: &str, body: serde_json::Value) -> Result<T, FederationError> {
    let envelope: Envelope<T> = serde_json::from_value(body).map_err(|e| FederationError::RemoteError {
        server: server.to_string(),
        status: 200,
        code: "invalid_response".to_string(),
        message: e.to_string(),
    })?;
    if let Some(err) = envelope.error {
        return Err(FederationError::RemoteError {
            server: server.to_string(),
            status: 200,
            code: err.code,
            message: err.message,
        });
    }
    if let Some(meta) = &envelope.meta {
        debug!(server, sync_seq = ?meta.sync_seq, has_more = meta.has_more, "remote envelope");
    }
    envelope.data.ok_or_else(|| FederationError::RemoteError {
        server: server.to_string(),
        status: 200,
        code: "invalid_response".to_string(),
        message: "response has no data".to_string(),
    })
}

/// Path-segment escape set: everything but RFC 3986 unreserved characters.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

fn escape_segment(raw: &str) -> String {
    utf8_percent_encode(raw, SEGMENT).to_string()
}

// --- Transport ---

pub struct RemoteRequest<'a> {
    pub server: &'a RemoteServer,
    /// Resolved bearer token; empty means no auth header.
    pub token: &'a str,
    pub path: &'a str,
    /// Per-attempt ceiling; each attempt is further clipped to `deadline`.
    pub timeout: Duration,
    pub retry: bool,
    /// No attempt starts once this reports a stop reason.
    pub deadline: &'a Deadline,
}

/// One GET against a remote server, returning the parsed JSON body.
pub trait RemoteTransport: Send + Sync {
    fn get(&self, req: &RemoteRequest<'_>) -> Result<serde_json::Value, FederationError>;
}

/// reqwest-backed transport with bounded retries.
///
/// Network errors and 5xx responses are retried with doubling backoff; 4xx
/// responses fail immediately. No attempt starts after the request's deadline
/// has passed or been cancelled.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    max_body_bytes: u64,
}

impl HttpTransport {
    pub fn new(config: &RemoteConfig) -> Result<Self, FederationError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .timeout(config.default_timeout())
            .build()
            .map_err(|e| FederationError::ConfigError(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            max_body_bytes: config.max_body_bytes,
        })
    }

    fn read_body(
        &self,
        server: &str,
        status: u16,
        resp: reqwest::blocking::Response,
    ) -> Result<Vec<u8>, FederationError> {
        let mut body = Vec::new();
        resp.take(self.max_body_bytes + 1)
            .read_to_end(&mut body)
            .map_err(|e| FederationError::ConnectivityError {
                server: server.to_string(),
                message: format!("reading response: {}", e),
            })?;
        if body.len() as u64 > self.max_body_bytes {
            return Err(FederationError::RemoteError {
                server: server.to_string(),
                status,
                code: "response_too_large".to_string(),
                message: format!("response exceeds {} bytes", self.max_body_bytes),
            });
        }
        Ok(body)
    }
}

fn describe(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        format!("request timed out after {}s", timeout.as_secs_f64())
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}

impl RemoteTransport for HttpTransport {
    fn get(&self, req: &RemoteRequest<'_>) -> Result<serde_json::Value, FederationError> {
        let server = req.server.name.as_str();
        let url = format!("{}{}", req.server.url, req.path);
        let retries = if req.retry { self.max_retries } else { 0 };
        let mut backoff = self.base_delay;
        let mut last_err = None;

        for attempt in 0..=retries {
            if attempt > 0 {
                debug!(server, attempt, retries, backoff_ms = backoff.as_millis() as u64, %url, "retrying remote request");
                std::thread::sleep(backoff.min(req.deadline.remaining()));
                backoff = (backoff * 2).min(self.max_delay);
            }
            if let Some(reason) = req.deadline.stop_reason() {
                debug!(server, attempt, reason, "remote request stopped");
                return Err(FederationError::Cancelled(reason.to_string()));
            }
            let timeout = req.timeout.min(req.deadline.remaining());

            let mut builder = self
                .client
                .get(&url)
                .timeout(timeout)
                .header(ACCEPT, "application/json");
            if !req.token.is_empty() {
                builder = builder.bearer_auth(req.token);
            }

            match builder.send() {
                Ok(resp) => {
                    let status = resp.status();
                    let body = self.read_body(server, status.as_u16(), resp)?;
                    if status.is_success() {
                        return serde_json::from_slice(&body).map_err(|e| FederationError::RemoteError {
                            server: server.to_string(),
                            status: status.as_u16(),
                            code: "invalid_response".to_string(),
                            message: e.to_string(),
                        });
                    }
                    let err = error_from_body(server, status.as_u16(), &body);
                    if status.is_client_error() {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(e) => {
                    last_err = Some(FederationError::ConnectivityError {
                        server: server.to_string(),
                        message: describe(&e, timeout),
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FederationError::ConnectivityError {
            server: server.to_string(),
            message: "no attempt was made".to_string(),
        }))
    }
}

// --- Cache state ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Fresh,
    Stale,
    /// Never fetched successfully.
    Empty,
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
            CacheState::Empty => "empty",
        })
    }
}

pub fn is_fresh(fetched_at: Option<i64>, ttl_secs: i64, now: i64) -> bool {
    fetched_at.is_some_and(|t| now - t < ttl_secs)
}

pub fn cache_state(server: &RemoteServer, now: i64) -> CacheState {
    match server.last_synced_at {
        None => CacheState::Empty,
        Some(_) if is_fresh(server.last_synced_at, server.cache_ttl_secs, now) => CacheState::Fresh,
        Some(_) => CacheState::Stale,
    }
}

// --- Results ---

#[derive(Debug, Clone, Serialize)]
pub struct PingResult {
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteSyncOutcome {
    pub server: String,
    pub repos: usize,
    pub removed_repos: usize,
    pub counts: SnapshotCounts,
    pub fetched_at: i64,
    pub duration_ms: u64,
}

/// A per-server failure inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceError {
    pub source: String,
    pub url: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteSyncReport {
    pub attempted: usize,
    pub synced: Vec<RemoteSyncOutcome>,
    pub errors: Vec<SourceError>,
}

/// Short machine code for an error reported in a batch.
pub fn error_code(err: &FederationError) -> String {
    match err {
        FederationError::ConnectivityError { .. } => "connectivity_error".to_string(),
        FederationError::RemoteError { code, .. } => code.clone(),
        FederationError::MissingEnvVar(_) => "missing_env_var".to_string(),
        FederationError::Cancelled(_) => "cancelled".to_string(),
        _ => "sync_failed".to_string(),
    }
}

/// A remote repository as held in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedRemoteRepo {
    pub server: String,
    pub repo_id: String,
    pub display_name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub fetched_at: Option<i64>,
    pub fresh: bool,
    pub counts: SnapshotCounts,
}

// --- Client ---

pub struct RemoteClient {
    transport: Arc<dyn RemoteTransport>,
    env: Arc<dyn EnvLookup>,
    clock: Arc<dyn Clock>,
    config: RemoteConfig,
    cancel: CancelToken,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, FederationError> {
        Ok(Self::with_transport(config, Arc::new(HttpTransport::new(config)?)))
    }

    pub fn with_transport(config: &RemoteConfig, transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            transport,
            env: Arc::new(ProcessEnv),
            clock: Arc::new(SystemClock),
            config: config.clone(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_env(mut self, env: Arc<dyn EnvLookup>) -> Self {
        self.env = env;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(Duration::from_secs(self.config.sync_deadline_secs), self.cancel.clone())
    }

    /// Per-call timeout, clipped to what is left of the operation deadline.
    fn call_timeout(&self, server: &RemoteServer, deadline: &Deadline) -> Result<Duration, FederationError> {
        if let Some(reason) = deadline.stop_reason() {
            return Err(FederationError::Cancelled(reason.to_string()));
        }
        Ok(Duration::from_secs(server.timeout_secs).min(deadline.remaining()))
    }

    fn get<T: DeserializeOwned>(
        &self,
        server: &RemoteServer,
        token: &str,
        path: &str,
        deadline: &Deadline,
        retry: bool,
    ) -> Result<T, FederationError> {
        let timeout = self.call_timeout(server, deadline)?;
        let body = self.transport.get(&RemoteRequest {
            server,
            token,
            path,
            timeout,
            retry,
            deadline,
        })?;
        unwrap_envelope(&server.name, body)
    }

    /// Lightweight liveness check: a single list call, no retries.
    pub fn ping(&self, server: &RemoteServer) -> PingResult {
        let token = match resolve_token(&server.token, self.env.as_ref()) {
            Ok(token) => token,
            Err(e) => {
                return PingResult {
                    online: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                };
            }
        };
        let started = Instant::now();
        let listed: Result<RepoList, _> = self.get(server, &token, REPOS_PATH, &self.deadline(), false);
        match listed {
            Ok(_) => PingResult {
                online: true,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => PingResult {
                online: false,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// List the server's repositories and pull each one's summaries.
    pub fn fetch_repos(&self, server: &RemoteServer) -> Result<Vec<FetchedRepo>, FederationError> {
        self.fetch_within(server, &self.deadline())
    }

    fn fetch_within(&self, server: &RemoteServer, deadline: &Deadline) -> Result<Vec<FetchedRepo>, FederationError> {
        let token = resolve_token(&server.token, self.env.as_ref())?;
        let list: RepoList = self.get(server, &token, REPOS_PATH, deadline, true)?;
        let mut seen = FxHashSet::default();
        let mut fetched = Vec::with_capacity(list.repos.len());
        for info in list.repos {
            if info.id.is_empty() || !seen.insert(info.id.clone()) {
                warn!(server = %server.name, repo = %info.id, "skipping unnamed or duplicate remote repository");
                continue;
            }
            let path = format!("{}/{}/summary", REPOS_PATH, escape_segment(&info.id));
            let snapshot: AnalysisSnapshot = self.get(server, &token, &path, deadline, true)?;
            fetched.push(FetchedRepo { info, snapshot });
        }
        Ok(fetched)
    }

    /// Refresh the cache for one server.
    ///
    /// All of the server's repositories are written in one transaction, so a
    /// failed fetch leaves the previous cache untouched. The failure is also
    /// recorded as the server's `last_error`.
    pub fn sync_one(&self, fed: &Federation, name: &str) -> Result<RemoteSyncOutcome, FederationError> {
        self.sync_within(fed, name, &self.deadline())
    }

    fn sync_within(&self, fed: &Federation, name: &str, deadline: &Deadline) -> Result<RemoteSyncOutcome, FederationError> {
        let server = federation::get_remote_server(fed, name)?;
        let started = Instant::now();
        let result = self
            .fetch_within(&server, deadline)
            .and_then(|fetched| self.store_fetched(fed, &server, &fetched));
        match result {
            Ok((repos, removed_repos, counts, fetched_at)) => {
                let outcome = RemoteSyncOutcome {
                    server: server.name.clone(),
                    repos,
                    removed_repos,
                    counts,
                    fetched_at,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                info!(
                    federation = fed.name(),
                    server = %server.name,
                    repos,
                    removed_repos,
                    modules = counts.modules,
                    hotspots = counts.hotspots,
                    duration_ms = outcome.duration_ms,
                    "remote server synced"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(federation = fed.name(), server = %server.name, error = %e, "remote sync failed");
                if let Err(record) = record_server_error(fed, &server.name, &e.to_string()) {
                    warn!(federation = fed.name(), server = %server.name, error = %record, "failed to record server error");
                }
                Err(e)
            }
        }
    }

    fn store_fetched(
        &self,
        fed: &Federation,
        server: &RemoteServer,
        fetched: &[FetchedRepo],
    ) -> Result<(usize, usize, SnapshotCounts, i64), FederationError> {
        let now = self.clock.now();
        fed.broker().with_write(ACTOR, "remote.sync", |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut totals = SnapshotCounts::default();
            for repo in fetched {
                let origin_uid = index::remote_origin_uid(&server.name, &repo.info.id);
                index::upsert_origin(
                    &tx,
                    &OriginRecord {
                        origin_uid: origin_uid.clone(),
                        repo_id: repo.info.id.clone(),
                        server_name: Some(server.name.clone()),
                        display_name: if repo.info.name.is_empty() {
                            repo.info.id.clone()
                        } else {
                            repo.info.name.clone()
                        },
                        description: repo.info.description.clone(),
                        tags: repo.info.tags.clone(),
                        synced_at: Some(now),
                    },
                )?;
                let counts = index::write_snapshot(&tx, &origin_uid, &repo.snapshot)?;
                totals.modules += counts.modules;
                totals.ownership += counts.ownership;
                totals.hotspots += counts.hotspots;
                totals.decisions += counts.decisions;
            }

            let exposed: FxHashSet<&str> = fetched.iter().map(|r| r.info.id.as_str()).collect();
            let mut removed = 0;
            for origin in index::list_origins(&tx, Some(&server.name))? {
                if !exposed.contains(origin.repo_id.as_str()) {
                    removed += index::delete_origin(&tx, &origin.origin_uid)?;
                }
            }

            let updated = tx.execute(
                "UPDATE remote_servers SET last_synced_at = ?1, last_error = NULL WHERE name = ?2",
                params![now, server.name],
            )?;
            if updated == 0 {
                return Err(FederationError::not_found("remote server", &server.name));
            }
            tx.commit()?;
            Ok((fetched.len(), removed, totals, now))
        })
    }

    /// Refresh every enabled server on a bounded pool.
    ///
    /// Each failure becomes one [`SourceError`]; the rest still sync. Disabled
    /// servers are skipped and keep their cache.
    pub fn sync_all(&self, fed: &Federation) -> Result<RemoteSyncReport, FederationError> {
        let servers: Vec<RemoteServer> = federation::list_remote_servers(fed)?
            .into_iter()
            .filter(|s| s.enabled)
            .collect();
        let deadline = self.deadline();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| FederationError::ValidationError(format!("remote worker pool: {}", e)))?;

        let outcomes: Vec<Result<RemoteSyncOutcome, SourceError>> = pool.install(|| {
            servers
                .par_iter()
                .map(|server| {
                    self.sync_within(fed, &server.name, &deadline).map_err(|e| SourceError {
                        source: server.name.clone(),
                        url: server.url.clone(),
                        code: error_code(&e),
                        message: e.to_string(),
                    })
                })
                .collect()
        });

        let mut report = RemoteSyncReport {
            attempted: servers.len(),
            synced: Vec::new(),
            errors: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                Ok(ok) => report.synced.push(ok),
                Err(err) => report.errors.push(err),
            }
        }
        info!(
            federation = fed.name(),
            attempted = report.attempted,
            synced = report.synced.len(),
            failed = report.errors.len(),
            "remote sync pass finished"
        );
        Ok(report)
    }
}

fn record_server_error(fed: &Federation, name: &str, message: &str) -> Result<(), FederationError> {
    fed.broker().with_write(ACTOR, "remote.error", |conn| {
        conn.execute(
            "UPDATE remote_servers SET last_error = ?1 WHERE name = ?2",
            params![message, name],
        )?;
        Ok(())
    })
}

/// Cached repositories of one server with their freshness at `now`.
pub fn remote_repos(fed: &Federation, server_name: &str, now: i64) -> Result<Vec<CachedRemoteRepo>, FederationError> {
    let server = federation::get_remote_server(fed, server_name)?;
    fed.broker().with_read(|conn| {
        index::list_origins(conn, Some(&server.name))?
            .into_iter()
            .map(|origin| -> Result<CachedRemoteRepo, FederationError> {
                Ok(CachedRemoteRepo {
                    counts: index::origin_counts(conn, &origin.origin_uid)?,
                    fresh: is_fresh(origin.synced_at, server.cache_ttl_secs, now),
                    server: server.name.clone(),
                    repo_id: origin.repo_id,
                    display_name: origin.display_name,
                    description: origin.description,
                    tags: origin.tags,
                    fetched_at: origin.synced_at,
                })
            })
            .collect()
    })
}
