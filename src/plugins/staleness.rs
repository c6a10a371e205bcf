use serde::{Deserialize, Serialize};
use std::fmt;

const DAY: i64 = 86_400;

/// How old a repository's last successful sync is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessLevel {
    Fresh,
    Aging,
    Stale,
    Obsolete,
}

impl StalenessLevel {
    /// `fresh` < 1 day, `aging` < 7 days, `stale` < 30 days, else `obsolete`.
    pub fn classify(now: i64, last_synced_at: Option<i64>) -> Self {
        let Some(then) = last_synced_at else {
            return StalenessLevel::Obsolete;
        };
        match (now - then).max(0) {
            age if age < DAY => StalenessLevel::Fresh,
            age if age < 7 * DAY => StalenessLevel::Aging,
            age if age < 30 * DAY => StalenessLevel::Stale,
            _ => StalenessLevel::Obsolete,
        }
    }

    pub fn needs_refresh(self) -> bool {
        self >= StalenessLevel::Stale
    }
}

impl fmt::Display for StalenessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StalenessLevel::Fresh => "fresh",
            StalenessLevel::Aging => "aging",
            StalenessLevel::Stale => "stale",
            StalenessLevel::Obsolete => "obsolete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationStaleness {
    /// Worst level over all repositories; `fresh` for an empty federation.
    pub overall: StalenessLevel,
    pub stale_repos: Vec<String>,
    pub refresh_recommended: bool,
}

pub fn summarize<'a>(levels: impl IntoIterator<Item = (&'a str, StalenessLevel)>) -> FederationStaleness {
    let mut overall = StalenessLevel::Fresh;
    let mut stale_repos = Vec::new();
    for (repo_id, level) in levels {
        overall = overall.max(level);
        if level.needs_refresh() {
            stale_repos.push(repo_id.to_string());
        }
    }
    FederationStaleness {
        overall,
        refresh_recommended: overall.needs_refresh(),
        stale_repos,
    }
}
