//! Aggregated cross-repository index.
//!
//! Rows in `idx_*` belong to an origin (a local repository or one repository of
//! a remote server). A category is always replaced wholesale for one origin
//! inside a single transaction, so readers on their WAL snapshot see either
//! the old set or the new set and never a half-cleared origin.

use crate::core::error::FederationError;
use crate::plugins::analysis::{
    AnalysisSnapshot, DecisionSummary, HotspotSummary, ModuleSummary, OwnershipSummary,
};
use crate::plugins::federation::Federation;
use globset::{Glob, GlobMatcher};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

// --- Row types ---

/// Where an index row came from. `server` is set for remote-origin rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowOrigin {
    pub repo_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl RowOrigin {
    pub fn qualified(&self) -> String {
        match &self.server {
            Some(server) => format!("{}:{}", server, self.repo_id),
            None => self.repo_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedModule {
    #[serde(flatten)]
    pub origin: RowOrigin,
    pub module_id: String,
    pub name: String,
    pub path: String,
    pub responsibility: String,
    pub tags: Vec<String>,
    pub confidence: f64,
    /// Text relevance, higher is better. Only set for free-text queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipEntry {
    #[serde(flatten)]
    pub origin: RowOrigin,
    pub pattern: String,
    pub owners: Vec<String>,
    pub scope: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotEntry {
    #[serde(flatten)]
    pub origin: RowOrigin,
    pub target_id: String,
    pub target_type: String,
    pub score: f64,
    pub churn: i64,
    pub complexity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    #[serde(flatten)]
    pub origin: RowOrigin,
    pub decision_id: String,
    pub title: String,
    pub body: String,
    pub status: String,
    pub author: String,
    pub affected_modules: Vec<String>,
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

/// A bounded result with the number of matches before the limit was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    pub(crate) fn bounded(mut items: Vec<T>, limit: Option<usize>) -> Self {
        let total = items.len();
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Page { items, total }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub modules: usize,
    pub ownership: usize,
    pub hotspots: usize,
    pub decisions: usize,
}

impl SnapshotCounts {
    pub fn of(snapshot: &AnalysisSnapshot) -> Self {
        Self {
            modules: snapshot.modules.len(),
            ownership: snapshot.ownership.len(),
            hotspots: snapshot.hotspots.len(),
            decisions: snapshot.decisions.len(),
        }
    }
}

// --- Filters ---

/// Which remote servers may contribute rows. Local rows are always eligible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServerScope {
    #[default]
    All,
    Only(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Restrict to these repo IDs (local or remote).
    pub repo_ids: Vec<String>,
    /// Origin must carry at least one of these tags.
    pub tags: Vec<String>,
    /// Glob over module path, ownership pattern or hotspot target.
    pub path_glob: Option<String>,
    /// Module id or name (modules), affected module (decisions).
    pub module: Option<String>,
    /// Decision status set.
    pub statuses: Vec<String>,
    /// Free text.
    pub query: Option<String>,
    pub limit: Option<usize>,
    pub servers: ServerScope,
}

/// Turn free text into an FTS5 prefix query; `None` when nothing is searchable.
pub fn fts_query(raw: &str) -> Option<String> {
    let terms: Vec<String> = raw
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

pub(crate) fn compile_glob(pattern: Option<&str>) -> Result<Option<GlobMatcher>, FederationError> {
    pattern
        .filter(|p| !p.trim().is_empty())
        .map(|p| {
            Glob::new(p)
                .map(|g| g.compile_matcher())
                .map_err(|e| FederationError::ValidationError(format!("invalid path glob '{}': {}", p, e)))
        })
        .transpose()
}

pub(crate) fn to_json_list(items: &[String]) -> Result<String, FederationError> {
    Ok(serde_json::to_string(items)?)
}

pub(crate) fn from_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// WHERE-clause builder with numbered parameters.
#[derive(Default)]
pub(crate) struct Conditions {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Conditions {
    pub(crate) fn bind<V: ToSql + 'static>(&mut self, value: V) -> String {
        self.params.push(Box::new(value));
        format!("?{}", self.params.len())
    }

    pub(crate) fn bind_list(&mut self, values: &[String]) -> String {
        values
            .iter()
            .map(|v| self.bind(v.clone()))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn push(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    pub(crate) fn sql(&self) -> String {
        if self.clauses.is_empty() {
            "1=1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    pub(crate) fn refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|b| b.as_ref()).collect()
    }
}

fn origin_conditions(c: &mut Conditions, filter: &QueryFilter) {
    if !filter.repo_ids.is_empty() {
        let list = c.bind_list(&filter.repo_ids);
        c.push(format!("o.repo_id IN ({})", list));
    }
    if !filter.tags.is_empty() {
        let list = c.bind_list(&filter.tags);
        c.push(format!(
            "EXISTS (SELECT 1 FROM json_each(o.tags) WHERE json_each.value IN ({}))",
            list
        ));
    }
    match &filter.servers {
        ServerScope::All => {}
        ServerScope::Only(servers) if servers.is_empty() => {
            c.push("o.server_name IS NULL".to_string());
        }
        ServerScope::Only(servers) => {
            let list = c.bind_list(servers);
            c.push(format!("(o.server_name IS NULL OR o.server_name IN ({}))", list));
        }
    }
}

pub(crate) fn row_origin(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowOrigin> {
    Ok(RowOrigin {
        repo_id: row.get("repo_id")?,
        server: row.get("server_name")?,
    })
}

// --- Origins ---

#[derive(Debug, Clone, PartialEq)]
pub struct OriginRecord {
    pub origin_uid: String,
    pub repo_id: String,
    pub server_name: Option<String>,
    pub display_name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub synced_at: Option<i64>,
}

pub fn remote_origin_uid(server: &str, repo_id: &str) -> String {
    format!("remote:{}:{}", server, repo_id)
}

/// Insert or update an origin in place; never cascades existing rows.
pub fn upsert_origin(conn: &Connection, origin: &OriginRecord) -> Result<(), FederationError> {
    conn.execute(
        "INSERT INTO origins(origin_uid, repo_id, server_name, display_name, description, tags, synced_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(origin_uid) DO UPDATE SET
            repo_id = excluded.repo_id,
            display_name = excluded.display_name,
            description = excluded.description,
            tags = excluded.tags,
            synced_at = excluded.synced_at",
        params![
            origin.origin_uid,
            origin.repo_id,
            origin.server_name,
            origin.display_name,
            origin.description,
            to_json_list(&origin.tags)?,
            origin.synced_at,
        ],
    )?;
    Ok(())
}

pub fn list_origins(
    conn: &Connection,
    server_name: Option<&str>,
) -> Result<Vec<OriginRecord>, FederationError> {
    let mut stmt = conn.prepare(
        "SELECT origin_uid, repo_id, server_name, display_name, description, tags, synced_at
         FROM origins
         WHERE (?1 IS NULL AND server_name IS NULL) OR server_name = ?1
         ORDER BY repo_id",
    )?;
    let rows = stmt.query_map(params![server_name], |row| {
        Ok(OriginRecord {
            origin_uid: row.get(0)?,
            repo_id: row.get(1)?,
            server_name: row.get(2)?,
            display_name: row.get(3)?,
            description: row.get(4)?,
            tags: from_json_list(&row.get::<_, String>(5)?),
            synced_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Drop an origin and, through the cascade, every index row it owns.
pub fn delete_origin(conn: &Connection, origin_uid: &str) -> Result<usize, FederationError> {
    Ok(conn.execute("DELETE FROM origins WHERE origin_uid = ?1", [origin_uid])?)
}

// --- Replacement ---

fn insert_modules(conn: &Connection, origin_uid: &str, modules: &[ModuleSummary]) -> Result<(), FederationError> {
    let mut stmt = conn.prepare(
        "INSERT INTO idx_modules(origin_uid, module_id, name, path, responsibility, tags, confidence)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for m in modules {
        stmt.execute(params![
            origin_uid,
            m.id,
            m.name,
            m.path,
            m.responsibility,
            to_json_list(&m.tags)?,
            m.confidence
        ])?;
    }
    Ok(())
}

fn insert_ownership(conn: &Connection, origin_uid: &str, entries: &[OwnershipSummary]) -> Result<(), FederationError> {
    let mut stmt = conn.prepare(
        "INSERT INTO idx_ownership(origin_uid, pattern, owners, scope, confidence)
         VALUES(?1, ?2, ?3, ?4, ?5)",
    )?;
    for o in entries {
        stmt.execute(params![
            origin_uid,
            o.pattern,
            to_json_list(&o.owners)?,
            o.scope,
            o.confidence
        ])?;
    }
    Ok(())
}

fn insert_hotspots(conn: &Connection, origin_uid: &str, hotspots: &[HotspotSummary]) -> Result<(), FederationError> {
    let mut stmt = conn.prepare(
        "INSERT INTO idx_hotspots(origin_uid, target_id, target_type, score, churn, complexity)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for h in hotspots {
        stmt.execute(params![
            origin_uid,
            h.target_id,
            h.target_type,
            h.score,
            h.churn,
            h.complexity
        ])?;
    }
    Ok(())
}

fn insert_decisions(conn: &Connection, origin_uid: &str, decisions: &[DecisionSummary]) -> Result<(), FederationError> {
    let mut stmt = conn.prepare(
        "INSERT INTO idx_decisions(origin_uid, decision_id, title, body, status, author, affected_modules, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for d in decisions {
        stmt.execute(params![
            origin_uid,
            d.id,
            d.title,
            d.body,
            d.status,
            d.author,
            to_json_list(&d.affected_modules)?,
            d.updated_at
        ])?;
    }
    Ok(())
}

/// Replace all four categories of one origin.
///
/// Must run inside the caller's transaction so the swap commits together
/// with the caller's bookkeeping.
pub fn write_snapshot(
    tx: &Connection,
    origin_uid: &str,
    snapshot: &AnalysisSnapshot,
) -> Result<SnapshotCounts, FederationError> {
    for table in ["idx_modules", "idx_ownership", "idx_hotspots", "idx_decisions"] {
        tx.execute(
            &format!("DELETE FROM {} WHERE origin_uid = ?1", table),
            [origin_uid],
        )?;
    }
    insert_modules(tx, origin_uid, &snapshot.modules)?;
    insert_ownership(tx, origin_uid, &snapshot.ownership)?;
    insert_hotspots(tx, origin_uid, &snapshot.hotspots)?;
    insert_decisions(tx, origin_uid, &snapshot.decisions)?;
    Ok(SnapshotCounts::of(snapshot))
}

fn local_origin_uid(conn: &Connection, repo_id: &str) -> Result<String, FederationError> {
    conn.query_row(
        "SELECT repo_uid FROM repos WHERE repo_id = ?1",
        [repo_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| FederationError::not_found("repository", repo_id))
}

fn replace_category<F>(
    fed: &Federation,
    repo_id: &str,
    table: &str,
    insert: F,
) -> Result<(), FederationError>
where
    F: FnOnce(&Connection, &str) -> Result<(), FederationError>,
{
    let op = format!("index.replace.{}", table.trim_start_matches("idx_"));
    fed.broker().with_write("fedindex", &op, |conn| {
        let origin_uid = local_origin_uid(conn, repo_id)?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            &format!("DELETE FROM {} WHERE origin_uid = ?1", table),
            [&origin_uid],
        )?;
        insert(&tx, &origin_uid)?;
        tx.commit()?;
        Ok(())
    })
}

pub fn replace_modules(fed: &Federation, repo_id: &str, modules: &[ModuleSummary]) -> Result<usize, FederationError> {
    replace_category(fed, repo_id, "idx_modules", |conn, uid| insert_modules(conn, uid, modules))?;
    Ok(modules.len())
}

pub fn replace_ownership(fed: &Federation, repo_id: &str, entries: &[OwnershipSummary]) -> Result<usize, FederationError> {
    replace_category(fed, repo_id, "idx_ownership", |conn, uid| insert_ownership(conn, uid, entries))?;
    Ok(entries.len())
}

pub fn replace_hotspots(fed: &Federation, repo_id: &str, hotspots: &[HotspotSummary]) -> Result<usize, FederationError> {
    replace_category(fed, repo_id, "idx_hotspots", |conn, uid| insert_hotspots(conn, uid, hotspots))?;
    Ok(hotspots.len())
}

pub fn replace_decisions(fed: &Federation, repo_id: &str, decisions: &[DecisionSummary]) -> Result<usize, FederationError> {
    replace_category(fed, repo_id, "idx_decisions", |conn, uid| insert_decisions(conn, uid, decisions))?;
    Ok(decisions.len())
}

// --- Reads ---

pub fn search_modules(fed: &Federation, filter: &QueryFilter) -> Result<Page<IndexedModule>, FederationError> {
    let glob = compile_glob(filter.path_glob.as_deref())?;
    let fts = filter.query.as_deref().and_then(fts_query);
    fed.broker().with_read(|conn| {
        let mut c = Conditions::default();
        origin_conditions(&mut c, filter);
        if let Some(module) = &filter.module {
            let p = c.bind(module.clone());
            c.push(format!("(m.module_id = {p} OR m.name = {p})"));
        }
        let (join, rank, order) = match &fts {
            Some(q) => {
                let p = c.bind(q.clone());
                c.push(format!("idx_modules_fts MATCH {}", p));
                (
                    "JOIN idx_modules_fts ON idx_modules_fts.rowid = m.id",
                    "bm25(idx_modules_fts)",
                    "score_rank ASC, o.synced_at DESC, o.repo_id, m.module_id",
                )
            }
            None => ("", "NULL", "o.repo_id, o.server_name, m.name, m.module_id"),
        };
        let sql = format!(
            "SELECT o.repo_id AS repo_id, o.server_name AS server_name, m.module_id, m.name, m.path,
                    m.responsibility, m.tags, m.confidence, {rank} AS score_rank
             FROM idx_modules m JOIN origins o ON o.origin_uid = m.origin_uid {join}
             WHERE {} ORDER BY {order}",
            c.sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(c.refs().as_slice(), |row| {
            Ok(IndexedModule {
                origin: row_origin(row)?,
                module_id: row.get("module_id")?,
                name: row.get("name")?,
                path: row.get("path")?,
                responsibility: row.get("responsibility")?,
                tags: from_json_list(&row.get::<_, String>("tags")?),
                confidence: row.get("confidence")?,
                relevance: row.get::<_, Option<f64>>("score_rank")?.map(|r| -r),
            })
        })?;
        let mut items = rows.collect::<Result<Vec<_>, _>>()?;
        if let Some(glob) = &glob {
            items.retain(|m| glob.is_match(&m.path));
        }
        Ok(Page::bounded(items, filter.limit))
    })
}

pub fn search_ownership(fed: &Federation, filter: &QueryFilter) -> Result<Page<OwnershipEntry>, FederationError> {
    let glob = compile_glob(filter.path_glob.as_deref())?;
    fed.broker().with_read(|conn| {
        let mut c = Conditions::default();
        origin_conditions(&mut c, filter);
        // free text ranks by match quality: exact pattern, exact owner,
        // pattern prefix, then any substring
        let (rank, order) = match filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => {
                let like = c.bind(format!("%{}%", q));
                c.push(format!("(w.pattern LIKE {like} OR w.owners LIKE {like})"));
                let exact = c.bind(q.to_string());
                let prefix = c.bind(format!("{}%", q));
                (
                    format!(
                        "CASE WHEN w.pattern = {exact} COLLATE NOCASE THEN 0
                              WHEN EXISTS (SELECT 1 FROM json_each(w.owners)
                                           WHERE json_each.value = {exact} COLLATE NOCASE) THEN 1
                              WHEN w.pattern LIKE {prefix} THEN 2
                              ELSE 3 END"
                    ),
                    "match_rank ASC, o.synced_at DESC, o.repo_id, w.pattern, w.id",
                )
            }
            None => ("NULL".to_string(), "o.repo_id, o.server_name, w.pattern, w.id"),
        };
        let sql = format!(
            "SELECT o.repo_id AS repo_id, o.server_name AS server_name, w.pattern, w.owners, w.scope, w.confidence,
                    {rank} AS match_rank
             FROM idx_ownership w JOIN origins o ON o.origin_uid = w.origin_uid
             WHERE {} ORDER BY {order}",
            c.sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(c.refs().as_slice(), |row| {
            Ok(OwnershipEntry {
                origin: row_origin(row)?,
                pattern: row.get("pattern")?,
                owners: from_json_list(&row.get::<_, String>("owners")?),
                scope: row.get("scope")?,
                confidence: row.get("confidence")?,
            })
        })?;
        let mut items = rows.collect::<Result<Vec<_>, _>>()?;
        if let Some(glob) = &glob {
            items.retain(|o| glob.is_match(&o.pattern));
        }
        Ok(Page::bounded(items, filter.limit))
    })
}

pub fn search_decisions(fed: &Federation, filter: &QueryFilter) -> Result<Page<DecisionEntry>, FederationError> {
    let fts = filter.query.as_deref().and_then(fts_query);
    fed.broker().with_read(|conn| {
        let mut c = Conditions::default();
        origin_conditions(&mut c, filter);
        if !filter.statuses.is_empty() {
            let list = c.bind_list(&filter.statuses);
            c.push(format!("d.status IN ({})", list));
        }
        if let Some(module) = &filter.module {
            let p = c.bind(module.clone());
            c.push(format!(
                "EXISTS (SELECT 1 FROM json_each(d.affected_modules) WHERE json_each.value = {})",
                p
            ));
        }
        let (join, rank, order) = match &fts {
            Some(q) => {
                let p = c.bind(q.clone());
                c.push(format!("idx_decisions_fts MATCH {}", p));
                (
                    "JOIN idx_decisions_fts ON idx_decisions_fts.rowid = d.id",
                    "bm25(idx_decisions_fts)",
                    "score_rank ASC, d.updated_at DESC, o.synced_at DESC, o.repo_id, d.decision_id",
                )
            }
            None => (
                "",
                "NULL",
                "d.updated_at DESC, o.synced_at DESC, o.repo_id, d.decision_id",
            ),
        };
        let sql = format!(
            "SELECT o.repo_id AS repo_id, o.server_name AS server_name, d.decision_id, d.title, d.body,
                    d.status, d.author, d.affected_modules, d.updated_at, {rank} AS score_rank
             FROM idx_decisions d JOIN origins o ON o.origin_uid = d.origin_uid {join}
             WHERE {} ORDER BY {order}",
            c.sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(c.refs().as_slice(), |row| {
            Ok(DecisionEntry {
                origin: row_origin(row)?,
                decision_id: row.get("decision_id")?,
                title: row.get("title")?,
                body: row.get("body")?,
                status: row.get("status")?,
                author: row.get("author")?,
                affected_modules: from_json_list(&row.get::<_, String>("affected_modules")?),
                updated_at: row.get("updated_at")?,
                relevance: row.get::<_, Option<f64>>("score_rank")?.map(|r| -r),
            })
        })?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Page::bounded(items, filter.limit))
    })
}

/// Hotspots across every eligible origin, sorted globally by score.
///
/// `min_score` and the limit apply after the global sort, so the top N is
/// across all repositories combined.
pub fn top_hotspots(
    fed: &Federation,
    filter: &QueryFilter,
    min_score: f64,
) -> Result<Page<HotspotEntry>, FederationError> {
    let glob = compile_glob(filter.path_glob.as_deref())?;
    fed.broker().with_read(|conn| {
        let mut c = Conditions::default();
        origin_conditions(&mut c, filter);
        let p = c.bind(min_score);
        c.push(format!("h.score >= {}", p));
        let sql = format!(
            "SELECT o.repo_id AS repo_id, o.server_name AS server_name, h.target_id, h.target_type,
                    h.score, h.churn, h.complexity
             FROM idx_hotspots h JOIN origins o ON o.origin_uid = h.origin_uid
             WHERE {} ORDER BY h.score DESC, o.repo_id, o.server_name, h.target_id",
            c.sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(c.refs().as_slice(), |row| {
            Ok(HotspotEntry {
                origin: row_origin(row)?,
                target_id: row.get("target_id")?,
                target_type: row.get("target_type")?,
                score: row.get("score")?,
                churn: row.get("churn")?,
                complexity: row.get("complexity")?,
            })
        })?;
        let mut items = rows.collect::<Result<Vec<_>, _>>()?;
        if let Some(glob) = &glob {
            items.retain(|h| glob.is_match(&h.target_id));
        }
        Ok(Page::bounded(items, filter.limit))
    })
}

/// Row counts per category for one origin.
pub fn origin_counts(conn: &Connection, origin_uid: &str) -> Result<SnapshotCounts, FederationError> {
    let count = |table: &str| -> Result<usize, FederationError> {
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE origin_uid = ?1", table),
            [origin_uid],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    };
    Ok(SnapshotCounts {
        modules: count("idx_modules")?,
        ownership: count("idx_ownership")?,
        hotspots: count("idx_hotspots")?,
        decisions: count("idx_decisions")?,
    })
}
