//! Read-only interface to the per-repository analysis engine.
//!
//! The analysis engine owns `<repo>/.codeintel/analysis.db`; the federation only
//! ever opens it read-only. Readers tolerate optional columns being absent so
//! older (but still readable) schema versions map onto the same summaries.

use crate::core::db;
use crate::core::error::FederationError;
use crate::core::schemas;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Churn weight in the fallback hotspot score.
pub const CHURN_WEIGHT: f64 = 0.6;
/// Complexity weight in the fallback hotspot score.
pub const COMPLEXITY_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub responsibility: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipSummary {
    pub pattern: String,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotSummary {
    pub target_id: String,
    #[serde(default = "default_target_type")]
    pub target_type: String,
    pub score: f64,
    #[serde(default)]
    pub churn: i64,
    #[serde(default)]
    pub complexity: f64,
}

fn default_target_type() -> String {
    "file".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub status: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub affected_modules: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// Everything the federation pulls from one repository at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    #[serde(default)]
    pub modules: Vec<ModuleSummary>,
    #[serde(default)]
    pub ownership: Vec<OwnershipSummary>,
    #[serde(default)]
    pub hotspots: Vec<HotspotSummary>,
    #[serde(default)]
    pub decisions: Vec<DecisionSummary>,
}

/// One opened repository analysis store.
pub trait AnalysisSource {
    /// Schema version marker, `None` when it cannot be determined.
    fn schema_version(&self) -> Result<Option<u32>, FederationError>;
    /// Cheap change marker compared before the expensive read.
    fn fingerprint(&self) -> Result<String, FederationError>;
    fn snapshot(&self) -> Result<AnalysisSnapshot, FederationError>;
}

/// Opens analysis stores for registered repositories.
pub trait AnalysisProvider: Send + Sync {
    /// `Ok(None)` when the repository has never been analysed.
    fn open(&self, repo_path: &Path) -> Result<Option<Box<dyn AnalysisSource>>, FederationError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteAnalysisProvider;

impl AnalysisProvider for SqliteAnalysisProvider {
    fn open(&self, repo_path: &Path) -> Result<Option<Box<dyn AnalysisSource>>, FederationError> {
        let db_path = analysis_db_path(repo_path);
        if !db_path.is_file() {
            return Ok(None);
        }
        let conn = db::db_connect_readonly(&db_path)?;
        Ok(Some(Box::new(SqliteAnalysisSource { db_path, conn })))
    }
}

pub fn analysis_db_path(repo_path: &Path) -> PathBuf {
    repo_path
        .join(schemas::ANALYSIS_DIR_NAME)
        .join(schemas::ANALYSIS_DB_NAME)
}

pub struct SqliteAnalysisSource {
    db_path: PathBuf,
    conn: Connection,
}

impl AnalysisSource for SqliteAnalysisSource {
    fn schema_version(&self) -> Result<Option<u32>, FederationError> {
        read_schema_version(&self.conn)
    }

    fn fingerprint(&self) -> Result<String, FederationError> {
        file_fingerprint(&self.db_path)
    }

    fn snapshot(&self) -> Result<AnalysisSnapshot, FederationError> {
        Ok(AnalysisSnapshot {
            modules: read_modules(&self.conn)?,
            ownership: read_ownership(&self.conn)?,
            hotspots: read_hotspots(&self.conn)?,
            decisions: read_decisions(&self.conn)?,
        })
    }
}

/// Probe the schema version marker.
///
/// Tries `schema_versions` (max), then `schema_version`, then infers 6 from the
/// presence of `modules.source`.
pub fn read_schema_version(conn: &Connection) -> Result<Option<u32>, FederationError> {
    if db::table_exists(conn, "schema_versions")? {
        let v: Option<i64> =
            conn.query_row("SELECT MAX(version) FROM schema_versions", [], |row| row.get(0))?;
        if let Some(v) = v.filter(|v| *v > 0) {
            return Ok(Some(v as u32));
        }
    }
    if db::table_exists(conn, "schema_version")? {
        let v: Option<i64> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?
            .flatten();
        if let Some(v) = v.filter(|v| *v > 0) {
            return Ok(Some(v as u32));
        }
    }
    if db::table_exists(conn, "modules")? && db::column_exists(conn, "modules", "source")? {
        return Ok(Some(schemas::ANALYSIS_CURRENT_VERSION));
    }
    Ok(None)
}

/// SHA-256 over size and mtime of the DB file and its WAL.
pub fn file_fingerprint(db_path: &Path) -> Result<String, FederationError> {
    let mut hasher = Sha256::new();
    let mut wal = db_path.as_os_str().to_owned();
    wal.push("-wal");
    for path in [db_path.to_path_buf(), PathBuf::from(wal)] {
        match fs::metadata(&path) {
            Ok(meta) => {
                let mtime = meta
                    .modified()?
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos();
                hasher.update(format!("{}:{};", meta.len(), mtime).as_bytes());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => hasher.update(b"-;"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Selects `column` when present, otherwise the literal fallback.
fn col_or(
    conn: &Connection,
    table: &str,
    column: &str,
    fallback: &str,
) -> Result<String, FederationError> {
    if db::column_exists(conn, table, column)? {
        Ok(column.to_string())
    } else {
        Ok(format!("{} AS {}", fallback, column))
    }
}

fn parse_list(raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
            return list;
        }
    }
    trimmed
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn read_modules(conn: &Connection) -> Result<Vec<ModuleSummary>, FederationError> {
    if !db::table_exists(conn, "modules")? {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, name, {}, {}, {}, {} FROM modules ORDER BY id",
        col_or(conn, "modules", "path", "''")?,
        col_or(conn, "modules", "responsibility", "''")?,
        col_or(conn, "modules", "tags", "NULL")?,
        col_or(conn, "modules", "confidence", "0")?,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(ModuleSummary {
            id: row.get(0)?,
            name: row.get(1)?,
            path: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            responsibility: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            tags: parse_list(row.get(4)?),
            confidence: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn read_ownership(conn: &Connection) -> Result<Vec<OwnershipSummary>, FederationError> {
    if !db::table_exists(conn, "ownership")? {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT pattern, owners, {}, {} FROM ownership ORDER BY pattern",
        col_or(conn, "ownership", "scope", "''")?,
        col_or(conn, "ownership", "confidence", "0")?,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(OwnershipSummary {
            pattern: row.get(0)?,
            owners: parse_list(row.get(1)?),
            scope: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            confidence: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn read_hotspots(conn: &Connection) -> Result<Vec<HotspotSummary>, FederationError> {
    if !db::table_exists(conn, "hotspots")? {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT target_id, {}, {}, {}, {} FROM hotspots ORDER BY target_id",
        col_or(conn, "hotspots", "target_type", "'file'")?,
        col_or(conn, "hotspots", "score", "NULL")?,
        col_or(conn, "hotspots", "churn", "0")?,
        col_or(conn, "hotspots", "complexity", "0")?,
    );
    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let max_churn = raw.iter().map(|r| r.3).max().unwrap_or(0);
    let max_complexity = raw.iter().map(|r| r.4).fold(0.0_f64, f64::max);

    Ok(raw
        .into_iter()
        .map(|(target_id, target_type, score, churn, complexity)| HotspotSummary {
            target_id,
            target_type: target_type.unwrap_or_else(default_target_type),
            score: score.unwrap_or_else(|| {
                blend_hotspot_score(churn, complexity, max_churn, max_complexity)
            }),
            churn,
            complexity,
        })
        .collect())
}

fn read_decisions(conn: &Connection) -> Result<Vec<DecisionSummary>, FederationError> {
    if !db::table_exists(conn, "decisions")? {
        return Ok(Vec::new());
    }
    let updated = if db::column_exists(conn, "decisions", "updated_at")? {
        "updated_at"
    } else if db::column_exists(conn, "decisions", "created_at")? {
        "created_at AS updated_at"
    } else {
        "NULL AS updated_at"
    };
    let sql = format!(
        "SELECT id, title, {}, status, {}, {}, {} FROM decisions ORDER BY id",
        col_or(conn, "decisions", "body", "''")?,
        col_or(conn, "decisions", "author", "''")?,
        col_or(conn, "decisions", "affected_modules", "NULL")?,
        updated,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(DecisionSummary {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            status: row.get(3)?,
            author: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            affected_modules: parse_list(row.get(5)?),
            updated_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Fallback hotspot score when the analysis engine did not store one.
///
/// `0.6 * churn/max_churn + 0.4 * complexity/max_complexity`, normalised
/// within one repository snapshot. A term is 0 when its maximum is 0.
pub fn blend_hotspot_score(churn: i64, complexity: f64, max_churn: i64, max_complexity: f64) -> f64 {
    let churn_part = if max_churn > 0 {
        churn.max(0) as f64 / max_churn as f64
    } else {
        0.0
    };
    let complexity_part = if max_complexity > 0.0 {
        complexity.max(0.0) / max_complexity
    } else {
        0.0
    };
    CHURN_WEIGHT * churn_part + COMPLEXITY_WEIGHT * complexity_part
}
