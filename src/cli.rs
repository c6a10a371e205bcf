//! Command-line surface. Clap types and dispatch; all behaviour lives in the
//! library.

use crate::core::config::{self, EngineConfig};
use crate::core::error::FederationError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::federation::{self, Federation, NewRemoteServer, RemoteServerUpdate};
use crate::plugins::hybrid::{HybridEngine, HybridResult, SourceKind, SourceReport};
use crate::plugins::index::{QueryFilter, RowOrigin, ServerScope};
use crate::plugins::remote::{self, RemoteClient};
use crate::plugins::compat;
use crate::plugins::contracts::{self, ContractFilter, ContractType, Visibility};
use crate::plugins::sync::{self, SyncEngine, SyncOptions, SyncStatus};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(
    name = "fedindex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Cross-repository federation index: sync analysis summaries from local repos and remote index servers, then query them as one."
)]
pub struct Cli {
    /// Store directory (default: $FEDINDEX_HOME, else ~/.fedindex).
    #[clap(long, global = true)]
    pub home: Option<PathBuf>,
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
    /// Increase diagnostic verbosity (-v info, -vv debug, -vvv trace).
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Emit diagnostics as JSON lines.
    #[clap(long, global = true)]
    pub log_json: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create, delete, list and inspect federations.
    Federation(FederationCli),
    /// Register local repositories.
    Repo(RepoCli),
    /// Register and sync remote index servers.
    Remote(RemoteCli),
    /// Pull analysis summaries from every local repository.
    Sync {
        #[clap(flatten)]
        target: Target,
        /// Re-read even when the analysis data is unchanged.
        #[clap(long)]
        force: bool,
        /// Read and count without writing.
        #[clap(long)]
        dry_run: bool,
        /// Limit to these repositories.
        #[clap(long = "repo")]
        repos: Vec<String>,
    },
    /// Recent sync outcomes for one repository.
    History {
        #[clap(flatten)]
        target: Target,
        repo_id: String,
        #[clap(long, default_value_t = 10)]
        limit: usize,
    },
    /// Local and cached remote repositories.
    Repos {
        #[clap(flatten)]
        target: Target,
    },
    /// Federated queries.
    Search(SearchCli),
    /// Top hotspots across the whole federation.
    Hotspots {
        #[clap(flatten)]
        target: Target,
        #[clap(flatten)]
        filter: FilterArgs,
        #[clap(long)]
        top: Option<usize>,
        #[clap(long)]
        min_score: Option<f64>,
    },
    /// Service contracts found in local repositories.
    Contracts(ContractsCli),
}

#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Federation name.
    #[clap(long = "federation", short = 'f')]
    pub federation: String,
}

#[derive(Args, Debug)]
pub struct FederationCli {
    #[clap(subcommand)]
    pub command: FederationCommand,
}

#[derive(Subcommand, Debug)]
pub enum FederationCommand {
    Create {
        name: String,
        #[clap(long, default_value = "")]
        description: String,
    },
    /// Delete a federation and everything it holds.
    Delete { name: String },
    List,
    /// Repository compatibility, staleness and server counts.
    Status { name: String },
}

#[derive(Args, Debug)]
pub struct RepoCli {
    #[clap(flatten)]
    pub target: Target,
    #[clap(subcommand)]
    pub command: RepoCommand,
}

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    Add {
        repo_id: String,
        path: PathBuf,
        #[clap(long = "tag")]
        tags: Vec<String>,
    },
    Remove { repo_id: String },
    Rename { old_id: String, new_id: String },
    List,
    /// Check every repository's analysis schema.
    Check,
}

#[derive(Args, Debug)]
pub struct RemoteCli {
    #[clap(flatten)]
    pub target: Target,
    #[clap(subcommand)]
    pub command: RemoteCommand,
}

#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    Add {
        name: String,
        url: String,
        /// Bearer token; `${VAR}` is resolved from the environment at call time.
        #[clap(long, default_value = "")]
        token: String,
        #[clap(long)]
        cache_ttl: Option<i64>,
        #[clap(long)]
        timeout: Option<u64>,
    },
    Update {
        name: String,
        #[clap(long)]
        url: Option<String>,
        #[clap(long)]
        token: Option<String>,
        #[clap(long)]
        cache_ttl: Option<i64>,
        #[clap(long)]
        timeout: Option<u64>,
    },
    Remove { name: String },
    List,
    Enable { name: String },
    Disable { name: String },
    /// Refresh one server's cache, or every enabled server's.
    Sync { name: Option<String> },
    /// Ping one server, or all of them.
    Status { name: Option<String> },
    /// Cached repositories of one server.
    Repos { name: String },
}

#[derive(Args, Debug)]
pub struct SearchCli {
    #[clap(flatten)]
    pub target: Target,
    #[clap(subcommand)]
    pub command: SearchCommand,
}

#[derive(Subcommand, Debug)]
pub enum SearchCommand {
    Modules {
        query: Option<String>,
        #[clap(flatten)]
        filter: FilterArgs,
    },
    Ownership {
        query: Option<String>,
        #[clap(flatten)]
        filter: FilterArgs,
    },
    Decisions {
        query: Option<String>,
        #[clap(flatten)]
        filter: FilterArgs,
        #[clap(long = "status")]
        statuses: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct ContractsCli {
    #[clap(flatten)]
    pub target: Target,
    #[clap(subcommand)]
    pub command: ContractsCommand,
}

#[derive(Subcommand, Debug)]
pub enum ContractsCommand {
    List {
        #[clap(long = "repo")]
        repos: Vec<String>,
        /// proto or openapi.
        #[clap(long = "type")]
        contract_type: Option<ContractType>,
        /// public, internal or unknown.
        #[clap(long)]
        visibility: Option<Visibility>,
        #[clap(long)]
        path: Option<String>,
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Repositories referencing a contract.
    Consumers { contract_id: String },
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[clap(long = "repo")]
    pub repos: Vec<String>,
    #[clap(long = "tag")]
    pub tags: Vec<String>,
    /// Only these remote servers (local rows are always included).
    #[clap(long = "server")]
    pub servers: Vec<String>,
    #[clap(long)]
    pub path: Option<String>,
    #[clap(long)]
    pub module: Option<String>,
    #[clap(long)]
    pub limit: Option<usize>,
}

impl FilterArgs {
    fn into_filter(self, query: Option<String>, statuses: Vec<String>) -> QueryFilter {
        QueryFilter {
            repo_ids: self.repos,
            tags: self.tags,
            path_glob: self.path,
            module: self.module,
            statuses,
            query,
            limit: self.limit,
            servers: if self.servers.is_empty() {
                ServerScope::All
            } else {
                ServerScope::Only(self.servers)
            },
        }
    }
}

// --- Output helpers ---

fn print_json<T: Serialize>(value: &T) -> Result<(), FederationError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn origin_label(origin: &RowOrigin) -> String {
    match &origin.server {
        Some(_) => origin.qualified().cyan().to_string(),
        None => origin.repo_id.green().to_string(),
    }
}

fn print_footer<T>(result: &HybridResult<T>) {
    println!(
        "{}",
        format!("showing {} of {}", result.items.len(), result.total).dimmed()
    );
    let remote: Vec<&SourceReport> = result.sources.iter().filter(|s| s.kind == SourceKind::Remote).collect();
    if !remote.is_empty() {
        let parts: Vec<String> = remote
            .iter()
            .map(|s| format!("{} ({}, {} rows)", s.name, s.state, s.rows))
            .collect();
        println!("{}", format!("remote sources: {}", parts.join(", ")).dimmed());
    }
    if !result.stale_sources.is_empty() {
        println!(
            "{} stale remote cache excluded: {} (run `fedindex remote sync`)",
            "warning:".yellow(),
            result.stale_sources.join(", ")
        );
    }
    if result.staleness.refresh_recommended {
        println!(
            "{} local index is {} (run `fedindex sync`)",
            "warning:".yellow(),
            result.staleness.overall
        );
    }
}

// --- Dispatch ---

fn engine(config: &EngineConfig) -> Result<HybridEngine, FederationError> {
    Ok(HybridEngine::new(&config.query, RemoteClient::new(&config.remote)?))
}

/// Run a parsed command against `store`.
pub fn run(cli: Cli, store: &Store) -> Result<(), FederationError> {
    let config = config::load_config(store)?;
    let format = cli.format;
    match cli.command {
        Command::Federation(group) => run_federation_cli(store, format, group),
        Command::Repo(group) => run_repo_cli(store, format, group),
        Command::Remote(group) => run_remote_cli(store, &config, format, group),
        Command::Sync {
            target,
            force,
            dry_run,
            repos,
        } => {
            let fed = federation::open(store, &target.federation)?;
            let opts = SyncOptions {
                force,
                dry_run,
                repo_ids: repos,
            };
            let results = SyncEngine::new(&config.sync).sync(&fed, &opts)?;
            if format == OutputFormat::Json {
                return print_json(&results);
            }
            for r in &results {
                let status = match r.status {
                    SyncStatus::Success => "ok".green(),
                    SyncStatus::Skipped => "skipped".dimmed(),
                    SyncStatus::Failed => "failed".red(),
                };
                print!(
                    "{:<24} {:<8} modules={} ownership={} hotspots={} decisions={} contracts={} ({}ms)",
                    r.repo_id,
                    status,
                    r.modules_synced,
                    r.ownership_synced,
                    r.hotspots_synced,
                    r.decisions_synced,
                    r.contracts_synced,
                    r.duration_ms
                );
                if let Some(err) = &r.error {
                    print!("  {}", err.red());
                }
                if let Some(warning) = &r.warning {
                    print!("  {}", warning.yellow());
                }
                println!();
            }
            let (ok, failed, skipped) = sync::tally(&results);
            println!(
                "{} of {} repositories synced ({} skipped, {} failed){}",
                ok,
                results.len(),
                skipped,
                failed,
                if dry_run { " [dry run]" } else { "" }
            );
            Ok(())
        }
        Command::History {
            target,
            repo_id,
            limit,
        } => {
            let fed = federation::open(store, &target.federation)?;
            let entries = sync::sync_history(&fed, &repo_id, limit)?;
            if format == OutputFormat::Json {
                return print_json(&entries);
            }
            let now = time::now_epoch();
            for e in &entries {
                println!(
                    "{:<10} {:<8} modules={} hotspots={} {}",
                    time::format_age(now, Some(e.completed_at)),
                    e.status,
                    e.modules_synced,
                    e.hotspots_synced,
                    e.error.as_deref().unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Repos { target } => {
            let fed = federation::open(store, &target.federation)?;
            let list = engine(&config)?.list_all_repos(&fed)?;
            if format == OutputFormat::Json {
                return print_json(&list);
            }
            let now = time::now_epoch();
            for repo in &list.local {
                println!(
                    "{:<24} local   {} (synced {})",
                    repo.repo_id.green(),
                    repo.path,
                    time::format_age(now, repo.last_synced_at)
                );
            }
            for repo in &list.remote {
                println!(
                    "{:<24} remote  {} (fetched {}{})",
                    format!("{}:{}", repo.server, repo.repo_id).cyan(),
                    repo.display_name,
                    time::format_age(now, repo.fetched_at),
                    if repo.fresh { "" } else { ", stale" }
                );
            }
            Ok(())
        }
        Command::Search(group) => {
            let fed = federation::open(store, &group.target.federation)?;
            let engine = engine(&config)?;
            match group.command {
                SearchCommand::Modules { query, filter } => {
                    let result = engine.search_modules(&fed, &filter.into_filter(query, Vec::new()))?;
                    if format == OutputFormat::Json {
                        return print_json(&result);
                    }
                    for m in &result.items {
                        println!("{}  {} {}", origin_label(&m.origin), m.name.bold(), m.path.dimmed());
                        if !m.responsibility.is_empty() {
                            println!("    {}", m.responsibility);
                        }
                    }
                    print_footer(&result);
                }
                SearchCommand::Ownership { query, filter } => {
                    let result = engine.search_ownership(&fed, &filter.into_filter(query, Vec::new()))?;
                    if format == OutputFormat::Json {
                        return print_json(&result);
                    }
                    for o in &result.items {
                        println!("{}  {}  {}", origin_label(&o.origin), o.pattern.bold(), o.owners.join(", "));
                    }
                    print_footer(&result);
                }
                SearchCommand::Decisions {
                    query,
                    filter,
                    statuses,
                } => {
                    let result = engine.search_decisions(&fed, &filter.into_filter(query, statuses))?;
                    if format == OutputFormat::Json {
                        return print_json(&result);
                    }
                    for d in &result.items {
                        println!(
                            "{}  {} [{}] {}",
                            origin_label(&d.origin),
                            d.decision_id,
                            d.status,
                            d.title.bold()
                        );
                    }
                    print_footer(&result);
                }
            }
            Ok(())
        }
        Command::Hotspots {
            target,
            filter,
            top,
            min_score,
        } => {
            let fed = federation::open(store, &target.federation)?;
            let result = engine(&config)?.get_hotspots(&fed, &filter.into_filter(None, Vec::new()), top, min_score)?;
            if format == OutputFormat::Json {
                return print_json(&result);
            }
            for (i, h) in result.items.iter().enumerate() {
                println!(
                    "{:>3}. {:.2}  {}  {} {}",
                    i + 1,
                    h.score,
                    origin_label(&h.origin),
                    h.target_id.bold(),
                    format!("churn={} complexity={:.1}", h.churn, h.complexity).dimmed()
                );
            }
            print_footer(&result);
            Ok(())
        }
        Command::Contracts(group) => run_contracts_cli(store, format, group),
    }
}

fn run_contracts_cli(store: &Store, format: OutputFormat, cli: ContractsCli) -> Result<(), FederationError> {
    let fed = federation::open(store, &cli.target.federation)?;
    match cli.command {
        ContractsCommand::List {
            repos,
            contract_type,
            visibility,
            path,
            limit,
        } => {
            let filter = ContractFilter {
                repo_ids: repos,
                contract_type,
                visibility,
                path_glob: path,
                limit,
            };
            let page = contracts::list_contracts(&fed, &filter)?;
            if format == OutputFormat::Json {
                return print_json(&page);
            }
            for entry in &page.items {
                let c = &entry.contract;
                println!(
                    "{}  {} {:<8} {}",
                    origin_label(&entry.origin),
                    c.path.bold(),
                    c.contract_type,
                    format!("{} ({})", c.visibility, c.visibility_basis).dimmed()
                );
                println!("    {}", c.contract_id.dimmed());
            }
            println!("{}", format!("showing {} of {}", page.items.len(), page.total).dimmed());
        }
        ContractsCommand::Consumers { contract_id } => {
            let impact = contracts::contract_consumers(&fed, &contract_id)?;
            if format == OutputFormat::Json {
                return print_json(&impact);
            }
            println!(
                "{}  {} [{}]",
                origin_label(&impact.contract.origin),
                impact.contract.contract.path.bold(),
                impact.contract.contract.contract_type
            );
            if impact.consumers.is_empty() {
                println!("{}", "no consumers found".dimmed());
            }
            for consumer in &impact.consumers {
                let r = &consumer.reference;
                println!(
                    "  {}  {} {}",
                    origin_label(&consumer.origin),
                    r.consumer_path,
                    format!("{} {} {:.2}", r.tier, r.evidence_type, r.confidence).dimmed()
                );
            }
            println!(
                "{}",
                format!("{} consuming repositories", impact.consumer_repos.len()).dimmed()
            );
        }
    }
    Ok(())
}

fn run_federation_cli(store: &Store, format: OutputFormat, cli: FederationCli) -> Result<(), FederationError> {
    match cli.command {
        FederationCommand::Create { name, description } => {
            let fed = federation::create(store, &name, &description)?;
            let info = federation::info(&fed)?;
            match format {
                OutputFormat::Json => print_json(&info)?,
                OutputFormat::Text => println!("Federation created: {}", info.name.green()),
            }
        }
        FederationCommand::Delete { name } => {
            federation::delete(store, &name)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "deleted": name }))?,
                OutputFormat::Text => println!("Federation deleted: {}", name),
            }
        }
        FederationCommand::List => {
            let feds = federation::list(store)?;
            match format {
                OutputFormat::Json => print_json(&feds)?,
                OutputFormat::Text => {
                    if feds.is_empty() {
                        println!("No federations.");
                    }
                    for f in &feds {
                        println!("{:<24} {}", f.name.bold(), f.description);
                    }
                }
            }
        }
        FederationCommand::Status { name } => {
            let fed = federation::open(store, &name)?;
            let status = federation::federation_status(&fed, time::now_epoch())?;
            match format {
                OutputFormat::Json => print_json(&status)?,
                OutputFormat::Text => {
                    println!("Federation: {}", status.info.name.bold());
                    println!(
                        "Repos:      {}  Remote servers: {} ({} enabled)",
                        status.repo_count, status.remote_server_count, status.enabled_remote_count
                    );
                    println!("Staleness:  {}", status.staleness.overall);
                    for r in &status.repos {
                        println!(
                            "  {:<24} {:<16} {:<9} {}",
                            r.repo.repo_id,
                            r.compatibility.status.to_string(),
                            r.staleness.to_string(),
                            r.compatibility.message.dimmed()
                        );
                    }
                    if status.staleness.refresh_recommended {
                        println!("{} run `fedindex sync -f {}`", "Refresh recommended:".yellow(), name);
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_repo_cli(store: &Store, format: OutputFormat, cli: RepoCli) -> Result<(), FederationError> {
    let fed = federation::open(store, &cli.target.federation)?;
    match cli.command {
        RepoCommand::Add { repo_id, path, tags } => {
            let (entry, check) = federation::add_repo(&fed, &repo_id, &path, &tags)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "repo": entry, "compatibility": check }))?,
                OutputFormat::Text => {
                    println!("Repository added: {} ({})", entry.repo_id.green(), entry.path);
                    if check.status != compat::CompatibilityStatus::Ok {
                        println!("{} {}", "warning:".yellow(), check.message);
                        if let Some(action) = &check.action {
                            println!("  {}", action);
                        }
                    }
                }
            }
        }
        RepoCommand::Remove { repo_id } => {
            federation::remove_repo(&fed, &repo_id)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "removed": repo_id }))?,
                OutputFormat::Text => println!("Repository removed: {}", repo_id),
            }
        }
        RepoCommand::Rename { old_id, new_id } => {
            let entry = federation::rename_repo(&fed, &old_id, &new_id)?;
            match format {
                OutputFormat::Json => print_json(&entry)?,
                OutputFormat::Text => println!("Repository renamed: {} -> {}", old_id, entry.repo_id.green()),
            }
        }
        RepoCommand::List => {
            let repos = federation::list_repos(&fed)?;
            match format {
                OutputFormat::Json => print_json(&repos)?,
                OutputFormat::Text => {
                    let now = time::now_epoch();
                    for r in &repos {
                        println!(
                            "{:<24} {}  [{}]  synced {}",
                            r.repo_id.bold(),
                            r.path,
                            r.tags.join(","),
                            time::format_age(now, r.last_synced_at)
                        );
                    }
                }
            }
        }
        RepoCommand::Check => {
            let checks = compat::check_all(&fed)?;
            match format {
                OutputFormat::Json => print_json(&checks)?,
                OutputFormat::Text => {
                    for c in &checks {
                        let status = match c.status {
                            compat::CompatibilityStatus::Ok => c.status.to_string().green(),
                            compat::CompatibilityStatus::NeedsMigration => c.status.to_string().yellow(),
                            compat::CompatibilityStatus::Incompatible => c.status.to_string().red(),
                        };
                        println!("{:<24} {:<16} {}", c.repo_id, status, c.message);
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_remote_cli(
    store: &Store,
    config: &EngineConfig,
    format: OutputFormat,
    cli: RemoteCli,
) -> Result<(), FederationError> {
    let fed: Federation = federation::open(store, &cli.target.federation)?;
    match cli.command {
        RemoteCommand::Add {
            name,
            url,
            token,
            cache_ttl,
            timeout,
        } => {
            let server = federation::add_remote_server(
                &fed,
                &config.remote,
                NewRemoteServer {
                    name,
                    url,
                    token,
                    cache_ttl_secs: cache_ttl,
                    timeout_secs: timeout,
                },
            )?;
            match format {
                OutputFormat::Json => print_json(&server)?,
                OutputFormat::Text => println!("Remote server added: {} ({})", server.name.green(), server.url),
            }
        }
        RemoteCommand::Update {
            name,
            url,
            token,
            cache_ttl,
            timeout,
        } => {
            let server = federation::update_remote_server(
                &fed,
                &name,
                RemoteServerUpdate {
                    url,
                    token,
                    cache_ttl_secs: cache_ttl,
                    timeout_secs: timeout,
                    enabled: None,
                },
            )?;
            match format {
                OutputFormat::Json => print_json(&server)?,
                OutputFormat::Text => println!("Remote server updated: {}", server.name),
            }
        }
        RemoteCommand::Remove { name } => {
            federation::remove_remote_server(&fed, &name)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "removed": name }))?,
                OutputFormat::Text => println!("Remote server removed: {}", name),
            }
        }
        RemoteCommand::List => {
            let servers = federation::list_remote_servers(&fed)?;
            match format {
                OutputFormat::Json => print_json(&servers)?,
                OutputFormat::Text => {
                    let now = time::now_epoch();
                    for s in &servers {
                        println!(
                            "{:<16} {:<40} {:<8} {:<6} synced {}",
                            s.name.bold(),
                            s.url,
                            if s.enabled { "enabled" } else { "disabled" },
                            remote::cache_state(s, now).to_string(),
                            time::format_age(now, s.last_synced_at)
                        );
                    }
                }
            }
        }
        RemoteCommand::Enable { name } => set_enabled(&fed, format, &name, true)?,
        RemoteCommand::Disable { name } => set_enabled(&fed, format, &name, false)?,
        RemoteCommand::Sync { name } => {
            let engine = engine(config)?;
            match name {
                Some(name) => {
                    let outcome = engine.sync_remote(&fed, &name)?;
                    match format {
                        OutputFormat::Json => print_json(&outcome)?,
                        OutputFormat::Text => println!(
                            "{}: {} repos, {} modules, {} hotspots ({}ms)",
                            outcome.server.green(),
                            outcome.repos,
                            outcome.counts.modules,
                            outcome.counts.hotspots,
                            outcome.duration_ms
                        ),
                    }
                }
                None => {
                    let report = engine.sync_all_remotes(&fed)?;
                    match format {
                        OutputFormat::Json => print_json(&report)?,
                        OutputFormat::Text => {
                            for ok in &report.synced {
                                println!("{:<16} {} ({} repos)", ok.server, "ok".green(), ok.repos);
                            }
                            for err in &report.errors {
                                println!("{:<16} {} [{}] {}", err.source, "failed".red(), err.code, err.message);
                            }
                            println!("{} of {} servers synced", report.synced.len(), report.attempted);
                        }
                    }
                }
            }
        }
        RemoteCommand::Status { name } => {
            let engine = engine(config)?;
            let statuses = match name {
                Some(name) => vec![engine.get_remote_status(&fed, &name)?],
                None => engine.get_remote_status_all(&fed)?,
            };
            match format {
                OutputFormat::Json => print_json(&statuses)?,
                OutputFormat::Text => {
                    for s in &statuses {
                        let online = if s.online {
                            format!("online {}ms", s.latency_ms.unwrap_or_default()).green()
                        } else {
                            "offline".red()
                        };
                        println!(
                            "{:<16} {:<14} cache={} repos={}{}",
                            s.name.bold(),
                            online,
                            s.cache_state,
                            s.cached_repo_count,
                            s.ping_error.as_deref().map(|e| format!("  {}", e)).unwrap_or_default()
                        );
                    }
                }
            }
        }
        RemoteCommand::Repos { name } => {
            let repos = remote::remote_repos(&fed, &name, time::now_epoch())?;
            match format {
                OutputFormat::Json => print_json(&repos)?,
                OutputFormat::Text => {
                    for r in &repos {
                        println!(
                            "{:<24} {:<6} modules={} hotspots={}  {}",
                            r.repo_id.bold(),
                            if r.fresh { "fresh" } else { "stale" },
                            r.counts.modules,
                            r.counts.hotspots,
                            r.description
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn set_enabled(fed: &Federation, format: OutputFormat, name: &str, enabled: bool) -> Result<(), FederationError> {
    let server = federation::set_remote_enabled(fed, name, enabled)?;
    match format {
        OutputFormat::Json => print_json(&server),
        OutputFormat::Text => {
            println!(
                "Remote server {}: {}",
                if enabled { "enabled" } else { "disabled" },
                server.name
            );
            Ok(())
        }
    }
}
