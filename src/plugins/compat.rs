//! Compatibility checks between a repository's analysis store and this engine.

use crate::core::error::FederationError;
use crate::core::schemas::{
    ANALYSIS_CURRENT_VERSION, ANALYSIS_MAX_SUPPORTED_VERSION, ANALYSIS_MIN_READABLE_VERSION,
};
use crate::plugins::analysis::{AnalysisProvider, AnalysisSource, SqliteAnalysisProvider};
use crate::plugins::federation::{self, Federation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityStatus {
    Ok,
    NeedsMigration,
    Incompatible,
}

impl fmt::Display for CompatibilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompatibilityStatus::Ok => "ok",
            CompatibilityStatus::NeedsMigration => "needs_migration",
            CompatibilityStatus::Incompatible => "incompatible",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityCheck {
    pub repo_id: String,
    pub path: String,
    pub schema_version: Option<u32>,
    pub required_version: u32,
    pub status: CompatibilityStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl CompatibilityCheck {
    pub fn allows_sync(&self) -> bool {
        self.status != CompatibilityStatus::Incompatible
    }

    /// The check as an error, for callers that need one.
    pub fn to_error(&self) -> Option<FederationError> {
        match self.status {
            CompatibilityStatus::Ok => None,
            CompatibilityStatus::NeedsMigration => Some(FederationError::NeedsMigration {
                repo_id: self.repo_id.clone(),
                message: self.message.clone(),
            }),
            CompatibilityStatus::Incompatible => Some(FederationError::Incompatible {
                repo_id: self.repo_id.clone(),
                message: self.message.clone(),
            }),
        }
    }
}

/// Classify a detected schema version.
///
/// `initialized` is false when the repository has no analysis store.
pub fn evaluate(repo_id: &str, path: &Path, initialized: bool, version: Option<u32>) -> CompatibilityCheck {
    let path_str = path.to_string_lossy().to_string();
    let (status, message, action) = match (initialized, version) {
        (false, _) => (
            CompatibilityStatus::Incompatible,
            "repository not initialized: no analysis database".to_string(),
            Some(format!("run the analysis engine in {}", path_str)),
        ),
        (true, None) => (
            CompatibilityStatus::Incompatible,
            "cannot determine analysis schema version".to_string(),
            Some(format!("re-run the analysis engine in {}", path_str)),
        ),
        (true, Some(v)) if v < ANALYSIS_MIN_READABLE_VERSION => (
            CompatibilityStatus::Incompatible,
            format!(
                "schema version {} is older than the oldest readable version {}",
                v, ANALYSIS_MIN_READABLE_VERSION
            ),
            Some(format!("re-run the analysis engine in {} to rebuild it", path_str)),
        ),
        (true, Some(v)) if v < ANALYSIS_CURRENT_VERSION => (
            CompatibilityStatus::NeedsMigration,
            format!(
                "schema version {} is below required {}; syncing with reduced fidelity",
                v, ANALYSIS_CURRENT_VERSION
            ),
            Some(format!("refresh the analysis in {} with --migrate", path_str)),
        ),
        (true, Some(v)) if v <= ANALYSIS_MAX_SUPPORTED_VERSION => {
            (CompatibilityStatus::Ok, "repository is compatible".to_string(), None)
        }
        (true, Some(v)) => (
            CompatibilityStatus::Incompatible,
            format!(
                "schema version {} is newer than the newest supported version {}",
                v, ANALYSIS_MAX_SUPPORTED_VERSION
            ),
            Some("upgrade fedindex".to_string()),
        ),
    };
    CompatibilityCheck {
        repo_id: repo_id.to_string(),
        path: path_str,
        schema_version: version,
        required_version: ANALYSIS_CURRENT_VERSION,
        status,
        message,
        action,
    }
}

/// Check an already opened (or absent) analysis source.
pub fn check_source(
    repo_id: &str,
    path: &Path,
    source: Option<&dyn AnalysisSource>,
) -> Result<CompatibilityCheck, FederationError> {
    match source {
        None => Ok(evaluate(repo_id, path, false, None)),
        Some(src) => Ok(evaluate(repo_id, path, true, src.schema_version()?)),
    }
}

pub fn check_with(
    provider: &dyn AnalysisProvider,
    repo_id: &str,
    path: &Path,
) -> Result<CompatibilityCheck, FederationError> {
    let source = provider.open(path)?;
    check_source(repo_id, path, source.as_deref())
}

/// Check one repository's on-disk analysis store.
pub fn check(repo_id: &str, path: &Path) -> Result<CompatibilityCheck, FederationError> {
    check_with(&SqliteAnalysisProvider, repo_id, path)
}

/// Check every registered repository, in `repo_id` order.
///
/// A store that cannot even be opened is reported as incompatible rather than
/// failing the whole listing.
pub fn check_all(fed: &Federation) -> Result<Vec<CompatibilityCheck>, FederationError> {
    let repos = federation::list_repos(fed)?;
    Ok(repos
        .iter()
        .map(|repo| {
            let path = Path::new(&repo.path);
            check(&repo.repo_id, path).unwrap_or_else(|e| CompatibilityCheck {
                message: format!("compatibility check failed: {}", e),
                ..evaluate(&repo.repo_id, path, true, None)
            })
        })
        .collect())
}
