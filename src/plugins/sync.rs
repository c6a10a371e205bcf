//! Sync Engine: pulls each registered repository's analysis summaries into
//! the federation index.
//!
//! Repositories are processed on a bounded worker pool. Each one is isolated:
//! a failure becomes a `failed` [`SyncResult`] and never touches the rows of
//! any other repository. Results come back in input order.
//!
//! A full pull also scans the repository's working tree for service
//! contracts. Detection problems only add a warning.

use crate::core::config::SyncConfig;
use crate::core::error::FederationError;
use crate::core::time::{CancelToken, Clock, Deadline, SystemClock};
use crate::plugins::analysis::{AnalysisProvider, SqliteAnalysisProvider};
use crate::plugins::compat::{self, CompatibilityStatus};
use crate::plugins::contracts::{self, ContractCounts, Detection};
use crate::plugins::federation::{self, Federation, RepoEntry};
use crate::plugins::index::{self, OriginRecord, SnapshotCounts};
use rayon::prelude::*;
use rusqlite::params;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ACTOR: &str = "sync";

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Ignore the fingerprint and always re-read.
    pub force: bool,
    /// Read and count, write nothing.
    pub dry_run: bool,
    /// Restrict to these repositories; empty means all.
    pub repo_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub repo_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_uid: Option<String>,
    pub status: SyncStatus,
    pub modules_synced: usize,
    pub ownership_synced: usize,
    pub hotspots_synced: usize,
    pub decisions_synced: usize,
    #[serde(default)]
    pub contracts_synced: usize,
    #[serde(default)]
    pub references_synced: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

impl SyncResult {
    fn new(repo_id: &str, repo_uid: Option<&str>, status: SyncStatus) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            repo_uid: repo_uid.map(|s| s.to_string()),
            status,
            modules_synced: 0,
            ownership_synced: 0,
            hotspots_synced: 0,
            decisions_synced: 0,
            contracts_synced: 0,
            references_synced: 0,
            duration_ms: 0,
            error: None,
            warning: None,
            dry_run: false,
        }
    }

    fn failed(repo_id: &str, repo_uid: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(repo_id, repo_uid, SyncStatus::Failed)
        }
    }

    fn with_counts(mut self, counts: SnapshotCounts) -> Self {
        self.modules_synced = counts.modules;
        self.ownership_synced = counts.ownership;
        self.hotspots_synced = counts.hotspots;
        self.decisions_synced = counts.decisions;
        self
    }

    fn with_contracts(mut self, counts: ContractCounts) -> Self {
        self.contracts_synced = counts.contracts;
        self.references_synced = counts.references;
        self
    }

    pub fn counts(&self) -> SnapshotCounts {
        SnapshotCounts {
            modules: self.modules_synced,
            ownership: self.ownership_synced,
            hotspots: self.hotspots_synced,
            decisions: self.decisions_synced,
        }
    }
}

/// Succeeded / failed / skipped tallies for a batch.
pub fn tally(results: &[SyncResult]) -> (usize, usize, usize) {
    results.iter().fold((0, 0, 0), |(ok, failed, skipped), r| match r.status {
        SyncStatus::Success => (ok + 1, failed, skipped),
        SyncStatus::Failed => (ok, failed + 1, skipped),
        SyncStatus::Skipped => (ok, failed, skipped + 1),
    })
}

pub struct SyncEngine {
    provider: Arc<dyn AnalysisProvider>,
    clock: Arc<dyn Clock>,
    workers: usize,
    deadline: Duration,
    cancel: CancelToken,
}

impl SyncEngine {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            provider: Arc::new(SqliteAnalysisProvider),
            clock: Arc::new(SystemClock),
            workers: config.workers.max(1),
            deadline: Duration::from_secs(config.deadline_secs),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn AnalysisProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Token the caller can trip to stop the pass from starting new repositories.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Sync every selected repository.
    ///
    /// Only federation-level failures (unreadable registry, worker pool) are
    /// returned as `Err`; everything per repository is in the results.
    pub fn sync(&self, fed: &Federation, opts: &SyncOptions) -> Result<Vec<SyncResult>, FederationError> {
        let started = Instant::now();
        let repos = federation::list_repos(fed)?;
        let fingerprints = load_fingerprints(fed)?;

        let targets: Vec<Result<RepoEntry, String>> = if opts.repo_ids.is_empty() {
            repos.into_iter().map(Ok).collect()
        } else {
            let mut by_id: FxHashMap<String, RepoEntry> =
                repos.into_iter().map(|r| (r.repo_id.clone(), r)).collect();
            opts.repo_ids
                .iter()
                .map(|id| by_id.remove(id).ok_or_else(|| id.clone()))
                .collect()
        };

        let deadline = Deadline::after(self.deadline, self.cancel.clone());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| FederationError::ValidationError(format!("sync worker pool: {}", e)))?;

        let results: Vec<SyncResult> = pool.install(|| {
            targets
                .par_iter()
                .map(|target| match target {
                    Ok(repo) => {
                        let fingerprint = fingerprints.get(&repo.repo_uid).map(|s| s.as_str());
                        self.sync_repo(fed, repo, fingerprint, opts, &deadline)
                    }
                    Err(unknown) => SyncResult::failed(
                        unknown,
                        None,
                        FederationError::not_found("repository", unknown).to_string(),
                    ),
                })
                .collect()
        });

        let (ok, failed, skipped) = tally(&results);
        info!(
            federation = fed.name(),
            total = results.len(),
            ok,
            failed,
            skipped,
            dry_run = opts.dry_run,
            duration_ms = started.elapsed().as_millis() as u64,
            "sync pass finished"
        );
        Ok(results)
    }

    fn sync_repo(
        &self,
        fed: &Federation,
        repo: &RepoEntry,
        last_fingerprint: Option<&str>,
        opts: &SyncOptions,
        deadline: &Deadline,
    ) -> SyncResult {
        let started = Instant::now();
        let started_at = self.clock.now();
        let uid = Some(repo.repo_uid.as_str());

        let mut result = match deadline.stop_reason() {
            Some(reason) => SyncResult::failed(&repo.repo_id, uid, FederationError::Cancelled(reason.to_string()).to_string()),
            None => self.pull(fed, repo, last_fingerprint, opts),
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        if !opts.dry_run && result.status != SyncStatus::Skipped {
            if let Err(e) = record_outcome(fed, repo, &result, started_at, self.clock.now()) {
                warn!(federation = fed.name(), repo_id = %repo.repo_id, error = %e, "failed to record sync outcome");
            }
        }
        match result.status {
            SyncStatus::Failed => warn!(
                federation = fed.name(),
                repo_id = %repo.repo_id,
                error = result.error.as_deref().unwrap_or_default(),
                "repository sync failed"
            ),
            _ => debug!(
                federation = fed.name(),
                repo_id = %repo.repo_id,
                status = ?result.status,
                modules = result.modules_synced,
                hotspots = result.hotspots_synced,
                duration_ms = result.duration_ms,
                "repository synced"
            ),
        }
        result
    }

    fn pull(
        &self,
        fed: &Federation,
        repo: &RepoEntry,
        last_fingerprint: Option<&str>,
        opts: &SyncOptions,
    ) -> SyncResult {
        let uid = Some(repo.repo_uid.as_str());
        let path = Path::new(&repo.path);

        let source = match self.provider.open(path) {
            Ok(source) => source,
            Err(e) => return SyncResult::failed(&repo.repo_id, uid, format!("failed to open analysis store: {}", e)),
        };
        let check = match compat::check_source(&repo.repo_id, path, source.as_deref()) {
            Ok(check) => check,
            Err(e) => return SyncResult::failed(&repo.repo_id, uid, format!("compatibility check failed: {}", e)),
        };
        let Some(source) = source.filter(|_| check.allows_sync()) else {
            return SyncResult::failed(&repo.repo_id, uid, check.message);
        };
        let warning = (check.status == CompatibilityStatus::NeedsMigration).then(|| check.message.clone());

        let fingerprint = match source.fingerprint() {
            Ok(fp) => fp,
            Err(e) => return SyncResult::failed(&repo.repo_id, uid, format!("fingerprint failed: {}", e)),
        };
        if !opts.force && repo.last_synced_at.is_some() && last_fingerprint == Some(fingerprint.as_str()) {
            return SyncResult {
                warning,
                dry_run: opts.dry_run,
                ..SyncResult::new(&repo.repo_id, uid, SyncStatus::Skipped)
            };
        }

        let snapshot = match source.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return SyncResult::failed(&repo.repo_id, uid, format!("failed to read analysis data: {}", e)),
        };
        let counts = SnapshotCounts::of(&snapshot);
        let (detection, contract_warning) = detect_contracts(path, &repo.repo_uid);
        let warning = match (warning, contract_warning) {
            (Some(a), Some(b)) => Some(format!("{}; {}", a, b)),
            (a, b) => a.or(b),
        };
        let base = SyncResult {
            warning,
            dry_run: opts.dry_run,
            ..SyncResult::new(&repo.repo_id, uid, SyncStatus::Success)
        };
        if opts.dry_run {
            return base.with_counts(counts).with_contracts(ContractCounts::of(&detection));
        }

        let now = self.clock.now();
        let written = fed.broker().with_write(ACTOR, "sync.repo", |conn| {
            let tx = conn.unchecked_transaction()?;
            // alias may have changed since the registry was listed
            let repo_id: String = tx.query_row(
                "SELECT repo_id FROM repos WHERE repo_uid = ?1",
                [&repo.repo_uid],
                |row| row.get(0),
            )?;
            index::upsert_origin(
                &tx,
                &OriginRecord {
                    origin_uid: repo.repo_uid.clone(),
                    display_name: repo_id.clone(),
                    repo_id,
                    server_name: None,
                    description: String::new(),
                    tags: repo.tags.clone(),
                    synced_at: Some(now),
                },
            )?;
            let counts = index::write_snapshot(&tx, &repo.repo_uid, &snapshot)?;
            let contract_counts = contracts::write_contracts(&tx, &repo.repo_uid, &detection)?;
            tx.execute(
                "UPDATE repos SET last_synced_at = ?1, last_error = NULL, last_fingerprint = ?2, schema_version = ?3
                 WHERE repo_uid = ?4",
                params![now, fingerprint, check.schema_version, repo.repo_uid],
            )?;
            tx.commit()?;
            Ok((counts, contract_counts))
        });
        match written {
            Ok((counts, contract_counts)) => base.with_counts(counts).with_contracts(contract_counts),
            Err(e) => SyncResult::failed(&repo.repo_id, uid, format!("failed to write index: {}", e)),
        }
    }
}

/// Contracts in the working tree, and a warning when some could not be read.
fn detect_contracts(path: &Path, repo_uid: &str) -> (Detection, Option<String>) {
    match contracts::detect_contracts(path, repo_uid) {
        Ok(detection) if detection.unreadable.is_empty() => (detection, None),
        Ok(detection) => {
            let warning = format!("unreadable contract files: {}", detection.unreadable.join(", "));
            (detection, Some(warning))
        }
        Err(e) => (Detection::default(), Some(format!("contract detection failed: {}", e))),
    }
}

fn load_fingerprints(fed: &Federation) -> Result<FxHashMap<String, String>, FederationError> {
    fed.broker().with_read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT repo_uid, last_fingerprint FROM repos WHERE last_fingerprint IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<FxHashMap<_, _>, _>>()?)
    })
}

/// Append the sync_log row and, on failure, the repository's last error.
fn record_outcome(
    fed: &Federation,
    repo: &RepoEntry,
    result: &SyncResult,
    started_at: i64,
    completed_at: i64,
) -> Result<(), FederationError> {
    let status = match result.status {
        SyncStatus::Success => "success",
        SyncStatus::Failed => "failed",
        SyncStatus::Skipped => "skipped",
    };
    fed.broker().with_write(ACTOR, "sync.log", |conn| {
        if result.status == SyncStatus::Failed {
            conn.execute(
                "UPDATE repos SET last_error = ?1 WHERE repo_uid = ?2",
                params![result.error, repo.repo_uid],
            )?;
        }
        conn.execute(
            "INSERT INTO sync_log(repo_uid, started_at, completed_at, status,
                                  modules_synced, ownership_synced, hotspots_synced, decisions_synced, error)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                repo.repo_uid,
                started_at,
                completed_at,
                status,
                result.modules_synced as i64,
                result.ownership_synced as i64,
                result.hotspots_synced as i64,
                result.decisions_synced as i64,
                result.error,
            ],
        )?;
        Ok(())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub repo_uid: String,
    pub started_at: i64,
    pub completed_at: i64,
    pub status: String,
    pub modules_synced: i64,
    pub ownership_synced: i64,
    pub hotspots_synced: i64,
    pub decisions_synced: i64,
    pub error: Option<String>,
}

/// Most recent sync_log rows for one repository, newest first.
pub fn sync_history(fed: &Federation, repo_id: &str, limit: usize) -> Result<Vec<SyncLogEntry>, FederationError> {
    let repo = federation::get_repo(fed, repo_id)?;
    fed.broker().with_read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT repo_uid, started_at, completed_at, status, modules_synced, ownership_synced,
                    hotspots_synced, decisions_synced, error
             FROM sync_log WHERE repo_uid = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![repo.repo_uid, limit as i64], |row| {
            Ok(SyncLogEntry {
                repo_uid: row.get(0)?,
                started_at: row.get(1)?,
                completed_at: row.get(2)?,
                status: row.get(3)?,
                modules_synced: row.get(4)?,
                ownership_synced: row.get(5)?,
                hotspots_synced: row.get(6)?,
                decisions_synced: row.get(7)?,
                error: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}
