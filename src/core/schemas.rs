//! Storage layout and SQL schemas.
//!
//! One SQLite database per federation. Index rows (`idx_*`) hang off an
//! `origins` row, which is either a local repository (`origin_uid` =
//! `repo_uid`) or one repository exposed by a remote server
//! (`origin_uid` = `remote:<server>:<repo>`). Deleting an origin cascades to
//! its index rows.

// --- Layout ---
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const FEDERATIONS_DIR_NAME: &str = "federations";
pub const FEDERATION_DB_NAME: &str = "index.db";
pub const FEDERATION_EVENTS_NAME: &str = "federation.events.jsonl";
pub const FEDERATION_SCHEMA_VERSION: u32 = 1;

// --- Per-repository analysis store (owned by the external analysis engine) ---
pub const ANALYSIS_DIR_NAME: &str = ".codeintel";
pub const ANALYSIS_DB_NAME: &str = "analysis.db";
/// Oldest analysis schema the reader can still map.
pub const ANALYSIS_MIN_READABLE_VERSION: u32 = 4;
/// Analysis schema the reader is written against.
pub const ANALYSIS_CURRENT_VERSION: u32 = 6;
/// Newest analysis schema known to be read-compatible.
pub const ANALYSIS_MAX_SUPPORTED_VERSION: u32 = 7;

// --- Federation DB ---
pub const FEDERATION_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS federation_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const FEDERATION_DB_SCHEMA_REPOS: &str = "
    CREATE TABLE IF NOT EXISTS repos (
        repo_uid TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL UNIQUE,
        path TEXT NOT NULL UNIQUE,
        tags TEXT NOT NULL DEFAULT '[]',
        added_at INTEGER NOT NULL,
        last_synced_at INTEGER,
        last_error TEXT,
        last_fingerprint TEXT,
        schema_version INTEGER
    )
";

pub const FEDERATION_DB_SCHEMA_REMOTE_SERVERS: &str = "
    CREATE TABLE IF NOT EXISTS remote_servers (
        name TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        token TEXT NOT NULL DEFAULT '',
        cache_ttl_secs INTEGER NOT NULL,
        timeout_secs INTEGER NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        added_at INTEGER NOT NULL,
        last_synced_at INTEGER,
        last_error TEXT
    )
";

pub const FEDERATION_DB_SCHEMA_ORIGINS: &str = "
    CREATE TABLE IF NOT EXISTS origins (
        origin_uid TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL,
        server_name TEXT REFERENCES remote_servers(name) ON DELETE CASCADE,
        display_name TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '[]',
        synced_at INTEGER
    )
";

pub const FEDERATION_DB_SCHEMA_MODULES: &str = "
    CREATE TABLE IF NOT EXISTS idx_modules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        origin_uid TEXT NOT NULL REFERENCES origins(origin_uid) ON DELETE CASCADE,
        module_id TEXT NOT NULL,
        name TEXT NOT NULL,
        path TEXT NOT NULL DEFAULT '',
        responsibility TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '[]',
        confidence REAL NOT NULL DEFAULT 0
    )
";

pub const FEDERATION_DB_SCHEMA_MODULES_FTS: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS idx_modules_fts USING fts5(
        name, responsibility, tags,
        content='idx_modules',
        content_rowid='id'
    );
    CREATE TRIGGER IF NOT EXISTS idx_modules_ai AFTER INSERT ON idx_modules BEGIN
        INSERT INTO idx_modules_fts(rowid, name, responsibility, tags)
        VALUES (new.id, new.name, new.responsibility, new.tags);
    END;
    CREATE TRIGGER IF NOT EXISTS idx_modules_ad AFTER DELETE ON idx_modules BEGIN
        INSERT INTO idx_modules_fts(idx_modules_fts, rowid, name, responsibility, tags)
        VALUES ('delete', old.id, old.name, old.responsibility, old.tags);
    END;
";

pub const FEDERATION_DB_SCHEMA_OWNERSHIP: &str = "
    CREATE TABLE IF NOT EXISTS idx_ownership (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        origin_uid TEXT NOT NULL REFERENCES origins(origin_uid) ON DELETE CASCADE,
        pattern TEXT NOT NULL,
        owners TEXT NOT NULL DEFAULT '[]',
        scope TEXT NOT NULL DEFAULT '',
        confidence REAL NOT NULL DEFAULT 0
    )
";

pub const FEDERATION_DB_SCHEMA_HOTSPOTS: &str = "
    CREATE TABLE IF NOT EXISTS idx_hotspots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        origin_uid TEXT NOT NULL REFERENCES origins(origin_uid) ON DELETE CASCADE,
        target_id TEXT NOT NULL,
        target_type TEXT NOT NULL DEFAULT 'file',
        score REAL NOT NULL,
        churn INTEGER NOT NULL DEFAULT 0,
        complexity REAL NOT NULL DEFAULT 0
    )
";

pub const FEDERATION_DB_SCHEMA_DECISIONS: &str = "
    CREATE TABLE IF NOT EXISTS idx_decisions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        origin_uid TEXT NOT NULL REFERENCES origins(origin_uid) ON DELETE CASCADE,
        decision_id TEXT NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        author TEXT NOT NULL DEFAULT '',
        affected_modules TEXT NOT NULL DEFAULT '[]',
        updated_at INTEGER
    )
";

pub const FEDERATION_DB_SCHEMA_DECISIONS_FTS: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS idx_decisions_fts USING fts5(
        title, body, affected_modules,
        content='idx_decisions',
        content_rowid='id'
    );
    CREATE TRIGGER IF NOT EXISTS idx_decisions_ai AFTER INSERT ON idx_decisions BEGIN
        INSERT INTO idx_decisions_fts(rowid, title, body, affected_modules)
        VALUES (new.id, new.title, new.body, new.affected_modules);
    END;
    CREATE TRIGGER IF NOT EXISTS idx_decisions_ad AFTER DELETE ON idx_decisions BEGIN
        INSERT INTO idx_decisions_fts(idx_decisions_fts, rowid, title, body, affected_modules)
        VALUES ('delete', old.id, old.title, old.body, old.affected_modules);
    END;
";

pub const FEDERATION_DB_SCHEMA_SYNC_LOG: &str = "
    CREATE TABLE IF NOT EXISTS sync_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_uid TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        completed_at INTEGER NOT NULL,
        status TEXT NOT NULL,
        modules_synced INTEGER NOT NULL DEFAULT 0,
        ownership_synced INTEGER NOT NULL DEFAULT 0,
        hotspots_synced INTEGER NOT NULL DEFAULT 0,
        decisions_synced INTEGER NOT NULL DEFAULT 0,
        error TEXT
    )
";

pub const FEDERATION_DB_SCHEMA_CONTRACTS: &str = "
    CREATE TABLE IF NOT EXISTS idx_contracts (
        contract_id TEXT PRIMARY KEY,
        origin_uid TEXT NOT NULL REFERENCES origins(origin_uid) ON DELETE CASCADE,
        path TEXT NOT NULL,
        contract_type TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        visibility TEXT NOT NULL,
        visibility_basis TEXT NOT NULL DEFAULT '',
        confidence REAL NOT NULL DEFAULT 0,
        import_keys TEXT NOT NULL DEFAULT '[]'
    )
";

pub const FEDERATION_DB_SCHEMA_CONTRACT_KEYS: &str = "
    CREATE TABLE IF NOT EXISTS idx_contract_keys (
        import_key TEXT NOT NULL,
        contract_id TEXT NOT NULL REFERENCES idx_contracts(contract_id) ON DELETE CASCADE,
        PRIMARY KEY (import_key, contract_id)
    )
";

pub const FEDERATION_DB_SCHEMA_CONTRACT_REFS: &str = "
    CREATE TABLE IF NOT EXISTS idx_contract_refs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        origin_uid TEXT NOT NULL REFERENCES origins(origin_uid) ON DELETE CASCADE,
        consumer_path TEXT NOT NULL,
        import_key TEXT NOT NULL,
        tier TEXT NOT NULL,
        evidence_type TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 0,
        detector TEXT NOT NULL
    )
";

pub const FEDERATION_DB_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_origins_server ON origins(server_name);
    CREATE INDEX IF NOT EXISTS idx_origins_repo_id ON origins(repo_id);
    CREATE INDEX IF NOT EXISTS idx_modules_origin ON idx_modules(origin_uid);
    CREATE INDEX IF NOT EXISTS idx_ownership_origin ON idx_ownership(origin_uid);
    CREATE INDEX IF NOT EXISTS idx_hotspots_origin ON idx_hotspots(origin_uid);
    CREATE INDEX IF NOT EXISTS idx_hotspots_score ON idx_hotspots(score DESC);
    CREATE INDEX IF NOT EXISTS idx_decisions_origin ON idx_decisions(origin_uid);
    CREATE INDEX IF NOT EXISTS idx_decisions_status ON idx_decisions(status);
    CREATE INDEX IF NOT EXISTS idx_sync_log_repo ON sync_log(repo_uid);
    CREATE INDEX IF NOT EXISTS idx_contracts_origin ON idx_contracts(origin_uid);
    CREATE INDEX IF NOT EXISTS idx_contract_refs_origin ON idx_contract_refs(origin_uid);
    CREATE INDEX IF NOT EXISTS idx_contract_refs_key ON idx_contract_refs(import_key);
";

/// Every statement needed to bring an empty database to the current schema.
pub fn federation_schema() -> [&'static str; 14] {
    [
        FEDERATION_DB_SCHEMA_META,
        FEDERATION_DB_SCHEMA_REPOS,
        FEDERATION_DB_SCHEMA_REMOTE_SERVERS,
        FEDERATION_DB_SCHEMA_ORIGINS,
        FEDERATION_DB_SCHEMA_MODULES,
        FEDERATION_DB_SCHEMA_MODULES_FTS,
        FEDERATION_DB_SCHEMA_OWNERSHIP,
        FEDERATION_DB_SCHEMA_HOTSPOTS,
        FEDERATION_DB_SCHEMA_DECISIONS,
        FEDERATION_DB_SCHEMA_DECISIONS_FTS,
        FEDERATION_DB_SCHEMA_SYNC_LOG,
        FEDERATION_DB_SCHEMA_CONTRACTS,
        FEDERATION_DB_SCHEMA_CONTRACT_KEYS,
        FEDERATION_DB_SCHEMA_CONTRACT_REFS,
    ]
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "federation",
        "version": FEDERATION_SCHEMA_VERSION,
        "storage": [FEDERATION_DB_NAME, FEDERATION_EVENTS_NAME],
        "analysis_store": format!("{}/{}", ANALYSIS_DIR_NAME, ANALYSIS_DB_NAME),
        "analysis_versions": {
            "min_readable": ANALYSIS_MIN_READABLE_VERSION,
            "current": ANALYSIS_CURRENT_VERSION,
            "max_supported": ANALYSIS_MAX_SUPPORTED_VERSION,
        },
        "tables": [
            "federation_meta", "repos", "remote_servers", "origins",
            "idx_modules", "idx_ownership", "idx_hotspots", "idx_decisions", "sync_log",
            "idx_contracts", "idx_contract_keys", "idx_contract_refs"
        ]
    })
}
