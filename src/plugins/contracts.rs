//! Service contracts found in local repository checkouts.
//!
//! Two detectors run over a repository's working tree during sync:
//!
//! - protobuf: every `*.proto` file is a contract; its `import` lines, the
//!   source comments of generated stubs (`*.pb.go`, `*.pb.ts`, `*_pb.js`)
//!   and `buf.yaml` dependencies are references to other contracts.
//! - OpenAPI: `openapi.*`, `swagger.*` and `api.*` documents (YAML or JSON)
//!   are contracts; generator configs at the repository root reference
//!   them through `inputSpec`.
//!
//! Each contract publishes a set of import keys. A reference resolves to a
//! contract when its import key equals one of those keys; consumers are the
//! resolved references held by other repositories.

use crate::core::error::FederationError;
use crate::plugins::federation::Federation;
use crate::plugins::index::{self, Conditions, Page, RowOrigin};
use regex::Regex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Generated stubs name their source within this many leading lines.
const GENERATED_HEADER_LINES: usize = 50;

const SKIPPED_DIRS: [&str; 3] = ["node_modules", "vendor", "target"];

const PROTO_PUBLIC_ROOTS: [&str; 6] = ["proto/", "protos/", "api/", "idl/", "schemas/", "contracts/"];
const PROTO_INTERNAL_DIRS: [&str; 5] = ["internal/", "testdata/", "examples/", "tmp/", "vendor/"];

const OPENAPI_FILE_NAMES: [&str; 9] = [
    "openapi.yaml",
    "openapi.yml",
    "openapi.json",
    "swagger.yaml",
    "swagger.yml",
    "swagger.json",
    "api.yaml",
    "api.yml",
    "api.json",
];
const GENERATOR_CONFIGS: [&str; 2] = ["openapitools.json", "swagger-codegen-config.json"];

static PROTO_PACKAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^package\s+([\w.]+)\s*;").unwrap());
static PROTO_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^import\s+(?:public\s+|weak\s+)?"([^"]+)"\s*;"#).unwrap());
static PROTO_SERVICE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^service\s+(\w+)").unwrap());
static PROTO_OPTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^option\s+(\w+)\s*=").unwrap());
static VERSIONED_PACKAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.v\d+(?:alpha\d*|beta\d*)?$").unwrap());
static INTERNAL_PACKAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(?:internal|private|test)\.").unwrap());
static TEST_PROTO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:_test\.proto|(?:^|/)test_[^/]*\.proto)$").unwrap());
static GO_GENERATED_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"//\s*source:\s*(\S+\.proto)").unwrap());
static TS_GENERATED_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@generated from (?:file )?(\S+\.proto)").unwrap());
static OPENAPI_PUBLIC_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:api|spec|openapi|contracts)/").unwrap());
static OPENAPI_INTERNAL_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:internal|test|mock|example)/").unwrap());

// --- Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Proto,
    Openapi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Internal,
    Unknown,
}

/// How a reference was established. `Declared` is written by a human
/// (an import line, a dependency list); `Derived` is read from generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceTier {
    Declared,
    Derived,
}

macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = FederationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(FederationError::ValidationError(format!("unknown {} '{}'", $kind, other))),
                }
            }
        }
    };
}

text_enum!(ContractType, "contract type", { Proto => "proto", Openapi => "openapi" });
text_enum!(Visibility, "visibility", { Public => "public", Internal => "internal", Unknown => "unknown" });
text_enum!(EvidenceTier, "evidence tier", { Declared => "declared", Derived => "derived" });

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtoMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub package: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenApiMetadata {
    /// `2.0`, `3.0` or `3.1`.
    pub version: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContractMetadata {
    Openapi(OpenApiMetadata),
    Proto(ProtoMetadata),
}

impl ContractMetadata {
    fn from_json(kind: ContractType, raw: &str) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ContractType::Proto => ContractMetadata::Proto(serde_json::from_str(raw)?),
            ContractType::Openapi => ContractMetadata::Openapi(serde_json::from_str(raw)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// `{repo_uid}:{path}`; stable across repository renames.
    pub contract_id: String,
    pub path: String,
    pub contract_type: ContractType,
    pub metadata: ContractMetadata,
    pub visibility: Visibility,
    pub visibility_basis: String,
    pub confidence: f64,
    pub import_keys: Vec<String>,
}

/// A file in one repository pointing at a contract, possibly in another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractReference {
    pub consumer_path: String,
    pub import_key: String,
    pub tier: EvidenceTier,
    pub evidence_type: String,
    pub confidence: f64,
    pub detector: String,
}

/// What the detectors found in one repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub contracts: Vec<Contract>,
    pub references: Vec<ContractReference>,
    /// Files that looked like contracts or contract configs but did not parse.
    pub unreadable: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCounts {
    pub contracts: usize,
    pub references: usize,
}

impl ContractCounts {
    pub fn of(detection: &Detection) -> Self {
        Self {
            contracts: detection.contracts.len(),
            references: detection.references.len(),
        }
    }
}

// --- Repository walk ---

pub struct RepoFile {
    pub abs: PathBuf,
    /// Slash-separated path relative to the repository root.
    pub rel: String,
}

impl RepoFile {
    fn name(&self) -> &str {
        self.rel.rsplit('/').next().unwrap_or(&self.rel)
    }
}

fn skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || SKIPPED_DIRS.contains(&name))
}

/// Every regular file under `root`, hidden and dependency directories excluded.
pub fn repo_files(root: &Path) -> Result<Vec<RepoFile>, FederationError> {
    if !root.is_dir() {
        return Err(FederationError::NotFound(format!(
            "repository directory '{}'",
            root.display()
        )));
    }
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skipped_dir(e));
    let mut files = Vec::new();
    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(RepoFile {
            abs: entry.path().to_path_buf(),
            rel,
        });
    }
    Ok(files)
}

// --- Detectors ---

pub trait ContractDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, files: &[RepoFile], repo_uid: &str, out: &mut Detection);
}

pub struct ProtoDetector;
pub struct OpenApiDetector;

fn contract_id(repo_uid: &str, path: &str) -> String {
    format!("{}:{}", repo_uid, path)
}

fn has_dir(path: &str, dir: &str) -> bool {
    format!("/{}", path).contains(&format!("/{}", dir))
}

fn push_unique(keys: &mut Vec<String>, key: String) {
    if !key.is_empty() && !keys.contains(&key) {
        keys.push(key);
    }
}

fn header_match(path: &Path, pattern: &Regex) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    BufReader::new(file)
        .lines()
        .take(GENERATED_HEADER_LINES)
        .map_while(Result::ok)
        .find_map(|line| pattern.captures(&line).map(|c| c[1].to_string()))
}

impl ProtoDetector {
    fn parse(&self, content: &str) -> ProtoMetadata {
        let mut meta = ProtoMetadata::default();
        for line in content.lines().map(str::trim) {
            if line.starts_with("//") || line.starts_with("/*") {
                continue;
            }
            if let Some(c) = PROTO_PACKAGE.captures(line) {
                meta.package = c[1].to_string();
            } else if let Some(c) = PROTO_IMPORT.captures(line) {
                meta.imports.push(c[1].to_string());
            } else if let Some(c) = PROTO_SERVICE.captures(line) {
                meta.services.push(c[1].to_string());
            } else if let Some(c) = PROTO_OPTION.captures(line) {
                meta.options.push(c[1].to_string());
            }
        }
        meta
    }

    fn classify(path: &str, meta: &ProtoMetadata) -> (Visibility, String, f64) {
        if let Some(dir) = PROTO_INTERNAL_DIRS.iter().find(|d| has_dir(path, d)) {
            return (Visibility::Internal, format!("path_contains_{}", dir.trim_end_matches('/')), 0.9);
        }
        if TEST_PROTO.is_match(path) {
            return (Visibility::Internal, "test_file_pattern".to_string(), 0.9);
        }
        if INTERNAL_PACKAGE.is_match(&meta.package) {
            return (Visibility::Internal, "internal_package".to_string(), 0.9);
        }
        if let Some(root) = PROTO_PUBLIC_ROOTS.iter().find(|r| path.starts_with(*r)) {
            return (Visibility::Public, format!("path_root_{}", root.trim_end_matches('/')), 1.0);
        }
        if VERSIONED_PACKAGE.is_match(&meta.package) {
            return (Visibility::Public, "versioned_package".to_string(), 0.9);
        }
        if !meta.services.is_empty() {
            return (Visibility::Public, "has_service_definition".to_string(), 0.8);
        }
        (Visibility::Unknown, "no_clear_pattern".to_string(), 0.5)
    }

    /// The relative path, the path below a public root, and the two
    /// package-derived spellings importers commonly use.
    fn import_keys(path: &str, meta: &ProtoMetadata) -> Vec<String> {
        let mut keys = vec![path.to_string()];
        for root in PROTO_PUBLIC_ROOTS {
            if let Some(rest) = path.strip_prefix(root) {
                push_unique(&mut keys, rest.to_string());
            }
        }
        if !meta.package.is_empty() {
            let package_dir = meta.package.replace('.', "/");
            push_unique(&mut keys, format!("{}.proto", package_dir));
            let base = path.rsplit('/').next().unwrap_or(path);
            push_unique(&mut keys, format!("{}/{}", package_dir, base));
        }
        keys
    }

    fn reference(
        &self,
        consumer_path: &str,
        import_key: String,
        tier: EvidenceTier,
        evidence: &str,
        confidence: f64,
    ) -> ContractReference {
        ContractReference {
            consumer_path: consumer_path.to_string(),
            import_key,
            tier,
            evidence_type: evidence.to_string(),
            confidence,
            detector: self.name().to_string(),
        }
    }

    fn buf_dependencies(&self, file: &RepoFile, out: &mut Detection) {
        let parsed = fs::read_to_string(&file.abs)
            .ok()
            .and_then(|raw| serde_yaml::from_str::<Value>(&raw).ok());
        let Some(doc) = parsed else {
            out.unreadable.push(file.rel.clone());
            return;
        };
        let deps = doc.get("deps").and_then(Value::as_array).into_iter().flatten();
        for dep in deps.filter_map(Value::as_str).map(str::trim).filter(|d| !d.is_empty()) {
            out.references.push(self.reference(
                &file.rel,
                dep.to_string(),
                EvidenceTier::Declared,
                "buf_dependency",
                1.0,
            ));
        }
    }
}

impl ContractDetector for ProtoDetector {
    fn name(&self) -> &'static str {
        "proto"
    }

    fn detect(&self, files: &[RepoFile], repo_uid: &str, out: &mut Detection) {
        for file in files {
            let name = file.name();
            if name.ends_with(".proto") {
                let Ok(content) = fs::read_to_string(&file.abs) else {
                    out.unreadable.push(file.rel.clone());
                    continue;
                };
                let meta = self.parse(&content);
                for import in &meta.imports {
                    out.references.push(self.reference(
                        &file.rel,
                        import.clone(),
                        EvidenceTier::Declared,
                        "proto_import",
                        1.0,
                    ));
                }
                let (visibility, visibility_basis, confidence) = Self::classify(&file.rel, &meta);
                out.contracts.push(Contract {
                    contract_id: contract_id(repo_uid, &file.rel),
                    path: file.rel.clone(),
                    contract_type: ContractType::Proto,
                    import_keys: Self::import_keys(&file.rel, &meta),
                    metadata: ContractMetadata::Proto(meta),
                    visibility,
                    visibility_basis,
                    confidence,
                });
            } else if name.ends_with(".pb.go") {
                if let Some(source) = header_match(&file.abs, &GO_GENERATED_SOURCE) {
                    out.references
                        .push(self.reference(&file.rel, source, EvidenceTier::Derived, "generated_code", 0.85));
                }
            } else if name.ends_with(".pb.ts") || name.ends_with("_pb.js") {
                if let Some(source) = header_match(&file.abs, &TS_GENERATED_SOURCE) {
                    out.references
                        .push(self.reference(&file.rel, source, EvidenceTier::Derived, "generated_code", 0.85));
                }
            } else if file.rel == "buf.yaml" {
                self.buf_dependencies(file, out);
            }
        }
    }
}

/// A scalar as text; YAML reads unquoted `2.0` as a number.
fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl OpenApiDetector {
    fn parse_document(path: &Path, raw: &str) -> Option<Value> {
        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(raw).ok()
        } else {
            serde_yaml::from_str(raw).ok()
        }
    }

    /// `None` when the document is valid data but not an OpenAPI or Swagger spec.
    fn metadata(doc: &Value) -> Option<OpenApiMetadata> {
        let info = doc.get("info");
        let title = scalar(info.and_then(|i| i.get("title"))).unwrap_or_default();
        let api_version = scalar(info.and_then(|i| i.get("version"))).unwrap_or_default();

        if let Some(openapi) = scalar(doc.get("openapi")).filter(|v| v.starts_with("3.")) {
            let servers = doc
                .get("servers")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|s| s.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            let version = if openapi.starts_with("3.1") { "3.1" } else { "3.0" };
            return Some(OpenApiMetadata {
                version: version.to_string(),
                title,
                api_version,
                servers,
            });
        }
        if scalar(doc.get("swagger")).is_some_and(|v| v == "2.0" || v == "2") {
            let servers = doc
                .get("host")
                .and_then(Value::as_str)
                .map(|host| {
                    let base = doc.get("basePath").and_then(Value::as_str).unwrap_or_default();
                    format!("https://{}{}", host, base)
                })
                .into_iter()
                .collect();
            return Some(OpenApiMetadata {
                version: "2.0".to_string(),
                title,
                api_version,
                servers,
            });
        }
        None
    }

    fn classify(path: &str, meta: &OpenApiMetadata) -> (Visibility, String, f64) {
        let rooted = format!("/{}", path);
        if OPENAPI_INTERNAL_PATH.is_match(&rooted) {
            return (Visibility::Internal, "path_pattern_internal".to_string(), 0.9);
        }
        if OPENAPI_PUBLIC_PATH.is_match(&rooted) {
            return (Visibility::Public, "path_pattern_api".to_string(), 1.0);
        }
        if meta
            .servers
            .iter()
            .any(|s| !s.contains("localhost") && !s.contains("127.0.0.1"))
        {
            return (Visibility::Public, "public_server_url".to_string(), 0.9);
        }
        (Visibility::Unknown, "no_clear_pattern".to_string(), 0.5)
    }

    /// Every `inputSpec` in a generator config, top-level or per generator.
    fn input_specs(config: &Value) -> Vec<String> {
        let mut specs = Vec::new();
        let generators = config
            .get("generator-cli")
            .and_then(|g| g.get("generators"))
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|g| g.values());
        for spec in generators
            .chain(std::iter::once(config))
            .filter_map(|g| g.get("inputSpec").and_then(Value::as_str))
        {
            push_unique(&mut specs, spec.trim_start_matches("./").to_string());
        }
        specs
    }
}

impl ContractDetector for OpenApiDetector {
    fn name(&self) -> &'static str {
        "openapi"
    }

    fn detect(&self, files: &[RepoFile], repo_uid: &str, out: &mut Detection) {
        for file in files {
            let name = file.name();
            if OPENAPI_FILE_NAMES.contains(&name) {
                let doc = fs::read_to_string(&file.abs)
                    .ok()
                    .and_then(|raw| Self::parse_document(&file.abs, &raw));
                let Some(doc) = doc else {
                    out.unreadable.push(file.rel.clone());
                    continue;
                };
                let Some(meta) = Self::metadata(&doc) else {
                    continue;
                };
                let (visibility, visibility_basis, confidence) = Self::classify(&file.rel, &meta);
                let mut import_keys = vec![file.rel.clone()];
                push_unique(&mut import_keys, meta.title.clone());
                out.contracts.push(Contract {
                    contract_id: contract_id(repo_uid, &file.rel),
                    path: file.rel.clone(),
                    contract_type: ContractType::Openapi,
                    metadata: ContractMetadata::Openapi(meta),
                    visibility,
                    visibility_basis,
                    confidence,
                    import_keys,
                });
            } else if GENERATOR_CONFIGS.contains(&file.rel.as_str()) {
                let config = fs::read_to_string(&file.abs)
                    .ok()
                    .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());
                let Some(config) = config else {
                    out.unreadable.push(file.rel.clone());
                    continue;
                };
                for spec in Self::input_specs(&config) {
                    out.references.push(ContractReference {
                        consumer_path: file.rel.clone(),
                        import_key: spec,
                        tier: EvidenceTier::Declared,
                        evidence_type: "generator_config".to_string(),
                        confidence: 1.0,
                        detector: self.name().to_string(),
                    });
                }
            }
        }
    }
}

/// Run every detector over the repository at `root`.
///
/// Only an unreadable repository directory is an error; individual files
/// that fail to parse are listed in [`Detection::unreadable`].
pub fn detect_contracts(root: &Path, repo_uid: &str) -> Result<Detection, FederationError> {
    let files = repo_files(root)?;
    let detectors: [&dyn ContractDetector; 2] = [&ProtoDetector, &OpenApiDetector];
    let mut detection = Detection::default();
    for detector in detectors {
        detector.detect(&files, repo_uid, &mut detection);
    }
    // a file is claimed by at most one contract
    let mut by_id: BTreeMap<String, Contract> = BTreeMap::new();
    for contract in detection.contracts.drain(..) {
        by_id.entry(contract.contract_id.clone()).or_insert(contract);
    }
    detection.contracts = by_id.into_values().collect();
    debug!(
        root = %root.display(),
        files = files.len(),
        contracts = detection.contracts.len(),
        references = detection.references.len(),
        unreadable = detection.unreadable.len(),
        "contract detection finished"
    );
    Ok(detection)
}

// --- Storage ---

/// Replace the contracts and references of one origin.
///
/// Must run inside the caller's transaction, like [`index::write_snapshot`].
pub fn write_contracts(
    tx: &Connection,
    origin_uid: &str,
    detection: &Detection,
) -> Result<ContractCounts, FederationError> {
    tx.execute("DELETE FROM idx_contracts WHERE origin_uid = ?1", [origin_uid])?;
    tx.execute("DELETE FROM idx_contract_refs WHERE origin_uid = ?1", [origin_uid])?;

    let mut contract_stmt = tx.prepare(
        "INSERT INTO idx_contracts(contract_id, origin_uid, path, contract_type, metadata, visibility,
                                   visibility_basis, confidence, import_keys)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let mut key_stmt =
        tx.prepare("INSERT OR IGNORE INTO idx_contract_keys(import_key, contract_id) VALUES(?1, ?2)")?;
    for c in &detection.contracts {
        contract_stmt.execute(params![
            c.contract_id,
            origin_uid,
            c.path,
            c.contract_type.as_str(),
            serde_json::to_string(&c.metadata)?,
            c.visibility.as_str(),
            c.visibility_basis,
            c.confidence,
            index::to_json_list(&c.import_keys)?,
        ])?;
        for key in &c.import_keys {
            key_stmt.execute(params![key, c.contract_id])?;
        }
    }

    let mut ref_stmt = tx.prepare(
        "INSERT INTO idx_contract_refs(origin_uid, consumer_path, import_key, tier, evidence_type, confidence, detector)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for r in &detection.references {
        ref_stmt.execute(params![
            origin_uid,
            r.consumer_path,
            r.import_key,
            r.tier.as_str(),
            r.evidence_type,
            r.confidence,
            r.detector,
        ])?;
    }
    Ok(ContractCounts::of(detection))
}

// --- Queries ---

#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub repo_ids: Vec<String>,
    pub contract_type: Option<ContractType>,
    pub visibility: Option<Visibility>,
    /// Glob over the contract path.
    pub path_glob: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractEntry {
    #[serde(flatten)]
    pub origin: RowOrigin,
    #[serde(flatten)]
    pub contract: Contract,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractConsumer {
    #[serde(flatten)]
    pub origin: RowOrigin,
    #[serde(flatten)]
    pub reference: ContractReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractImpact {
    pub contract: ContractEntry,
    /// Strongest evidence first.
    pub consumers: Vec<ContractConsumer>,
    /// Distinct consuming repositories, sorted.
    pub consumer_repos: Vec<String>,
}

fn text_column<T: FromStr<Err = FederationError>>(row: &Row<'_>, name: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(name)?;
    raw.parse()
        .map_err(|e: FederationError| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn contract_row(row: &Row<'_>) -> rusqlite::Result<ContractEntry> {
    let contract_type: ContractType = text_column(row, "contract_type")?;
    let metadata = ContractMetadata::from_json(contract_type, &row.get::<_, String>("metadata")?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    Ok(ContractEntry {
        origin: index::row_origin(row)?,
        contract: Contract {
            contract_id: row.get("contract_id")?,
            path: row.get("path")?,
            contract_type,
            metadata,
            visibility: text_column(row, "visibility")?,
            visibility_basis: row.get("visibility_basis")?,
            confidence: row.get("confidence")?,
            import_keys: index::from_json_list(&row.get::<_, String>("import_keys")?),
        },
    })
}

const CONTRACT_COLUMNS: &str = "o.repo_id AS repo_id, o.server_name AS server_name, k.contract_id, k.path,
     k.contract_type, k.metadata, k.visibility, k.visibility_basis, k.confidence, k.import_keys";

pub fn list_contracts(fed: &Federation, filter: &ContractFilter) -> Result<Page<ContractEntry>, FederationError> {
    let glob = index::compile_glob(filter.path_glob.as_deref())?;
    fed.broker().with_read(|conn| {
        let mut c = Conditions::default();
        if !filter.repo_ids.is_empty() {
            let list = c.bind_list(&filter.repo_ids);
            c.push(format!("o.repo_id IN ({})", list));
        }
        if let Some(kind) = filter.contract_type {
            let p = c.bind(kind.as_str());
            c.push(format!("k.contract_type = {}", p));
        }
        if let Some(visibility) = filter.visibility {
            let p = c.bind(visibility.as_str());
            c.push(format!("k.visibility = {}", p));
        }
        let sql = format!(
            "SELECT {CONTRACT_COLUMNS}
             FROM idx_contracts k JOIN origins o ON o.origin_uid = k.origin_uid
             WHERE {} ORDER BY o.repo_id, k.path",
            c.sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(c.refs().as_slice(), contract_row)?;
        let mut items = rows.collect::<Result<Vec<_>, _>>()?;
        if let Some(glob) = &glob {
            items.retain(|e| glob.is_match(&e.contract.path));
        }
        Ok(Page::bounded(items, filter.limit))
    })
}

/// Other repositories whose references resolve to `contract_id`.
pub fn contract_consumers(fed: &Federation, contract_id: &str) -> Result<ContractImpact, FederationError> {
    fed.broker().with_read(|conn| {
        let contract = conn
            .query_row(
                &format!(
                    "SELECT {CONTRACT_COLUMNS}
                     FROM idx_contracts k JOIN origins o ON o.origin_uid = k.origin_uid
                     WHERE k.contract_id = ?1"
                ),
                [contract_id],
                contract_row,
            )
            .optional()?
            .ok_or_else(|| FederationError::not_found("contract", contract_id))?;

        let mut stmt = conn.prepare(
            "SELECT o.repo_id AS repo_id, o.server_name AS server_name, r.consumer_path, r.import_key,
                    r.tier, r.evidence_type, r.confidence, r.detector
             FROM idx_contract_refs r JOIN origins o ON o.origin_uid = r.origin_uid
             WHERE r.import_key IN (SELECT import_key FROM idx_contract_keys WHERE contract_id = ?1)
               AND r.origin_uid != (SELECT origin_uid FROM idx_contracts WHERE contract_id = ?1)
             ORDER BY r.confidence DESC, o.repo_id, r.consumer_path, r.id",
        )?;
        let rows = stmt.query_map([contract_id], |row| {
            Ok(ContractConsumer {
                origin: index::row_origin(row)?,
                reference: ContractReference {
                    consumer_path: row.get("consumer_path")?,
                    import_key: row.get("import_key")?,
                    tier: text_column(row, "tier")?,
                    evidence_type: row.get("evidence_type")?,
                    confidence: row.get("confidence")?,
                    detector: row.get("detector")?,
                },
            })
        })?;
        let consumers = rows.collect::<Result<Vec<_>, _>>()?;
        let mut consumer_repos: Vec<String> = consumers.iter().map(|c| c.origin.qualified()).collect();
        consumer_repos.sort();
        consumer_repos.dedup();
        Ok(ContractImpact {
            contract,
            consumers,
            consumer_repos,
        })
    })
}
