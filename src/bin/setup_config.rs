//! setup-config: first-time setup of API keys.
//!
//! Loads `config.toml` (or defaults when it does not exist yet), reads the
//! Manifold and college football API keys, checks the Manifold key against
//! `/me`, and writes the keys back to the config file.
//!
//! By default, keys are read interactively (hidden input) to keep them out
//! of shell history. Use the flags only for scripted use.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use manifootball::cache::ResponseCache;
use manifootball::config::{AppConfig, CONFIG_PATH};
use manifootball::manifold::ManifoldClient;

#[derive(Parser)]
#[command(
    name = "setup-config",
    about = "Validate API keys and save them to config.toml"
)]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Manifold API key. If omitted, read with hidden input.
    #[arg(long)]
    manifold_api_key: Option<String>,

    /// College football data API key. If omitted, read with hidden input.
    #[arg(long)]
    cfb_api_key: Option<String>,
}

fn read_key(flag: Option<String>, prompt: &str) -> Result<String> {
    let key = match flag {
        Some(key) => key,
        None => rpassword::prompt_password(prompt).context("failed to read API key")?,
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("API key cannot be empty");
    }
    Ok(key.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_path();

    let mut app_config = if config_path.exists() {
        AppConfig::load(config_path)?
    } else {
        AppConfig::default()
    };

    println!("=== manifootball Config Setup ===\n");

    // ── Step 1: Read keys ──────────────────────────────────────────
    let manifold_key = read_key(cli.manifold_api_key, "Enter Manifold API key: ")?;
    let cfb_key = read_key(cli.cfb_api_key, "Enter college football data API key: ")?;

    // ── Step 2: Validate Manifold key ──────────────────────────────
    println!("Validating Manifold API key...");
    app_config.manifold.api_key = manifold_key;
    let cache = ResponseCache::new(&app_config.settings.cache_path);
    let manifold = ManifoldClient::new(&app_config.manifold, &cache)?;
    let user = manifold
        .me()
        .await
        .context("Manifold rejected the key, check it on your profile page")?;
    println!("  Account:  @{} ({})", user.username, user.name);
    println!("  Balance:  M{:.0}", user.balance);
    println!();

    // ── Step 3: Save config ────────────────────────────────────────
    println!("Updating keys in {}...", config_path.display());
    app_config.stats.api_key = cfb_key;
    app_config.save(config_path)?;
    println!("  Config updated successfully");
    println!();

    println!("=== Setup Complete ===");
    println!();
    println!("Next steps:");
    println!("  cargo run --bin mf -- scoreboard --week 1");
    println!("  cargo run --bin mf -- autocreate --week 1");
    println!("  cargo run --bin mf -- comment --week 1");
    println!("  cargo run --bin mf -- live --game <event id>");

    Ok(())
}
