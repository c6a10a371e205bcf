//! Hybrid Query Engine.
//!
//! Local rows and cached remote rows live in the same index, so every query
//! is a single local read. What the engine adds is the source policy:
//!
//! - local repositories always contribute;
//! - an enabled server contributes only while its cache is fresh;
//! - stale or never-fetched servers contribute nothing and are named in
//!   `stale_sources`;
//! - disabled servers are left out entirely (their cache is kept).
//!
//! No query contacts a remote server. Live calls happen only from
//! [`HybridEngine::sync_remote`], [`HybridEngine::sync_all_remotes`] and the
//! status checks.

use crate::core::config::QueryConfig;
use crate::core::error::FederationError;
use crate::plugins::federation::{self, Federation, RemoteServer, RepoEntry};
use crate::plugins::index::{
    self, DecisionEntry, HotspotEntry, IndexedModule, OwnershipEntry, Page, QueryFilter, RowOrigin,
    ServerScope,
};
use crate::plugins::remote::{
    self, CacheState, CachedRemoteRepo, PingResult, RemoteClient, RemoteSyncOutcome, RemoteSyncReport,
};
use crate::plugins::staleness::{self, FederationStaleness, StalenessLevel};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Local,
    Remote,
}

/// One source considered by a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub kind: SourceKind,
    pub state: CacheState,
    /// Whether its rows were eligible.
    pub included: bool,
    /// Rows it contributed to the returned items.
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridResult<T> {
    pub items: Vec<T>,
    /// Matches before the limit.
    pub total: usize,
    pub sources: Vec<SourceReport>,
    pub stale_sources: Vec<String>,
    pub staleness: FederationStaleness,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteStatus {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_error: Option<String>,
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
    pub cache_state: CacheState,
    pub cached_repo_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridRepoList {
    pub local: Vec<RepoEntry>,
    pub remote: Vec<CachedRemoteRepo>,
}

struct QueryPlan {
    scope: ServerScope,
    sources: Vec<SourceReport>,
    stale_sources: Vec<String>,
    staleness: FederationStaleness,
}

impl QueryPlan {
    fn finish<T>(mut self, page: Page<T>, origin: impl Fn(&T) -> &RowOrigin) -> HybridResult<T> {
        for item in &page.items {
            let (kind, name) = match origin(item).server.as_deref() {
                Some(server) => (SourceKind::Remote, server),
                None => (SourceKind::Local, LOCAL_SOURCE),
            };
            if let Some(source) = self.sources.iter_mut().find(|s| s.kind == kind && s.name == name) {
                source.rows += 1;
            }
        }
        HybridResult {
            items: page.items,
            total: page.total,
            sources: self.sources,
            stale_sources: self.stale_sources,
            staleness: self.staleness,
        }
    }
}

const LOCAL_SOURCE: &str = "local";

pub struct HybridEngine {
    remote: RemoteClient,
    query: QueryConfig,
}

impl HybridEngine {
    pub fn new(query: &QueryConfig, remote: RemoteClient) -> Self {
        Self {
            remote,
            query: query.clone(),
        }
    }

    pub fn remote(&self) -> &RemoteClient {
        &self.remote
    }

    fn now(&self) -> i64 {
        self.remote.clock().now()
    }

    /// Decide which servers may contribute and describe every source.
    fn plan(&self, fed: &Federation, filter: &QueryFilter) -> Result<QueryPlan, FederationError> {
        let now = self.now();
        let repos = federation::list_repos(fed)?;
        let staleness = staleness::summarize(
            repos
                .iter()
                .map(|r| (r.repo_id.as_str(), StalenessLevel::classify(now, r.last_synced_at))),
        );

        let local_state = if repos.iter().all(|r| r.last_synced_at.is_none()) {
            CacheState::Empty
        } else if staleness.refresh_recommended {
            CacheState::Stale
        } else {
            CacheState::Fresh
        };
        let mut sources = vec![SourceReport {
            name: LOCAL_SOURCE.to_string(),
            kind: SourceKind::Local,
            state: local_state,
            included: true,
            rows: 0,
        }];

        let requested = |s: &RemoteServer| match &filter.servers {
            ServerScope::All => true,
            ServerScope::Only(names) => names.contains(&s.name),
        };
        let mut eligible = Vec::new();
        let mut stale_sources = Vec::new();
        for server in federation::list_remote_servers(fed)?
            .into_iter()
            .filter(|s| s.enabled && requested(s))
        {
            let state = remote::cache_state(&server, now);
            let included = state == CacheState::Fresh;
            if included {
                eligible.push(server.name.clone());
            } else {
                stale_sources.push(server.name.clone());
            }
            sources.push(SourceReport {
                name: server.name,
                kind: SourceKind::Remote,
                state,
                included,
                rows: 0,
            });
        }
        debug!(
            federation = fed.name(),
            eligible = eligible.len(),
            stale = stale_sources.len(),
            "hybrid query plan"
        );

        Ok(QueryPlan {
            scope: ServerScope::Only(eligible),
            sources,
            stale_sources,
            staleness,
        })
    }

    fn scoped(&self, filter: &QueryFilter, plan: &QueryPlan, default_limit: usize) -> QueryFilter {
        QueryFilter {
            servers: plan.scope.clone(),
            limit: Some(filter.limit.unwrap_or(default_limit)),
            ..filter.clone()
        }
    }

    /// Modules across the federation; free text ranks by relevance, ties by
    /// most recently synced source.
    pub fn search_modules(
        &self,
        fed: &Federation,
        filter: &QueryFilter,
    ) -> Result<HybridResult<IndexedModule>, FederationError> {
        let plan = self.plan(fed, filter)?;
        let page = index::search_modules(fed, &self.scoped(filter, &plan, self.query.default_limit))?;
        Ok(plan.finish(page, |m| &m.origin))
    }

    pub fn search_ownership(
        &self,
        fed: &Federation,
        filter: &QueryFilter,
    ) -> Result<HybridResult<OwnershipEntry>, FederationError> {
        let plan = self.plan(fed, filter)?;
        let page = index::search_ownership(fed, &self.scoped(filter, &plan, self.query.default_limit))?;
        Ok(plan.finish(page, |o| &o.origin))
    }

    pub fn search_decisions(
        &self,
        fed: &Federation,
        filter: &QueryFilter,
    ) -> Result<HybridResult<DecisionEntry>, FederationError> {
        let plan = self.plan(fed, filter)?;
        let page = index::search_decisions(fed, &self.scoped(filter, &plan, self.query.default_limit))?;
        Ok(plan.finish(page, |d| &d.origin))
    }

    /// Global top-N hotspots. `top` falls back to `filter.limit`, then to the
    /// configured default; `min_score` to the configured cutoff.
    pub fn get_hotspots(
        &self,
        fed: &Federation,
        filter: &QueryFilter,
        top: Option<usize>,
        min_score: Option<f64>,
    ) -> Result<HybridResult<HotspotEntry>, FederationError> {
        let min_score = min_score.unwrap_or(self.query.hotspot_min_score);
        if !(0.0..=1.0).contains(&min_score) {
            return Err(FederationError::ValidationError(format!(
                "min score must be within 0..=1, got {}",
                min_score
            )));
        }
        let plan = self.plan(fed, filter)?;
        let mut scoped = self.scoped(filter, &plan, self.query.hotspot_top);
        if let Some(top) = top {
            scoped.limit = Some(top);
        }
        let page = index::top_hotspots(fed, &scoped, min_score)?;
        Ok(plan.finish(page, |h| &h.origin))
    }

    pub fn sync_remote(&self, fed: &Federation, name: &str) -> Result<RemoteSyncOutcome, FederationError> {
        self.remote.sync_one(fed, name)
    }

    pub fn sync_all_remotes(&self, fed: &Federation) -> Result<RemoteSyncReport, FederationError> {
        self.remote.sync_all(fed)
    }

    fn status_of(&self, fed: &Federation, server: RemoteServer, now: i64) -> Result<RemoteStatus, FederationError> {
        let PingResult {
            online,
            latency_ms,
            error,
        } = self.remote.ping(&server);
        let cached_repo_count = fed
            .broker()
            .with_read(|conn| index::list_origins(conn, Some(&server.name)))?
            .len();
        Ok(RemoteStatus {
            cache_state: remote::cache_state(&server, now),
            online,
            latency_ms,
            ping_error: error,
            cached_repo_count,
            name: server.name,
            url: server.url,
            enabled: server.enabled,
            last_synced_at: server.last_synced_at,
            last_error: server.last_error,
        })
    }

    /// Live ping plus cached bookkeeping for one server.
    pub fn get_remote_status(&self, fed: &Federation, name: &str) -> Result<RemoteStatus, FederationError> {
        let server = federation::get_remote_server(fed, name)?;
        self.status_of(fed, server, self.now())
    }

    /// Status of every registered server, checked concurrently, sorted by name.
    pub fn get_remote_status_all(&self, fed: &Federation) -> Result<Vec<RemoteStatus>, FederationError> {
        let servers = federation::list_remote_servers(fed)?;
        let now = self.now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.remote.config().workers.max(1))
            .build()
            .map_err(|e| FederationError::ValidationError(format!("status worker pool: {}", e)))?;
        pool.install(|| {
            servers
                .into_par_iter()
                .map(|server| self.status_of(fed, server, now))
                .collect()
        })
    }

    /// Local repositories plus every cached remote repository. No network.
    pub fn list_all_repos(&self, fed: &Federation) -> Result<HybridRepoList, FederationError> {
        let now = self.now();
        let local = federation::list_repos(fed)?;
        let mut remote_list = Vec::new();
        for server in federation::list_remote_servers(fed)? {
            remote_list.extend(remote::remote_repos(fed, &server.name, now)?);
        }
        Ok(HybridRepoList {
            local,
            remote: remote_list,
        })
    }
}
