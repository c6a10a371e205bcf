use anyhow::{Context, Result};
use clap::Parser;
use fedindex::cli::Cli;
use fedindex::core::logging;
use fedindex::core::store::Store;
use std::path::PathBuf;

const HOME_ENV_VAR: &str = "FEDINDEX_HOME";

/// `--home`, else `$FEDINDEX_HOME`, else `~/.fedindex`.
fn resolve_home(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(home) = flag {
        return Ok(home);
    }
    if let Some(home) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    let user_home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .context("cannot locate a home directory; pass --home or set FEDINDEX_HOME")?;
    Ok(PathBuf::from(user_home).join(".fedindex"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose, cli.log_json);

    let home = resolve_home(cli.home.clone())?;
    let store = Store::new(&home);
    fedindex::run(cli, &store).with_context(|| format!("fedindex (home: {})", home.display()))
}
