//! `locshare auth` subcommands: inspect, save, and clear credentials.

use std::io::{self, BufRead, Write};

use anyhow::Result;

use crate::config::{self, Configuration};
use crate::store::ReadingStore;

pub fn run(action: Option<&str>) -> Result<()> {
    let config = Configuration::create()?;

    match action {
        Some("status") => show_status(&config),
        Some("login") => login(&config),
        Some("logout") => logout(&config),
        _ => {
            show_help();
            Ok(())
        }
    }
}

fn show_status(config: &Configuration) -> Result<()> {
    let settings = config::read_settings(&config.settings_file)?;

    let env_token = std::env::var("LOCSHARE_TOKEN").ok();
    let settings_token = settings.auth_token.as_ref();
    let has_token = env_token.is_some() || settings_token.is_some();
    let token_source = if env_token.is_some() {
        "environment"
    } else if settings_token.is_some() {
        "settings file"
    } else {
        "none"
    };

    println!("\nAgent Status\n");
    println!(
        "  Hub URL: {}",
        settings.hub_url.as_deref().unwrap_or(&config.hub_url)
    );
    println!("  Token: {}", if has_token { "set" } else { "missing" });
    println!("  Token Source: {token_source}");
    println!("  Data Dir: {}", config.home_dir.display());

    if let Ok(store) = ReadingStore::new(&config.db_file.to_string_lossy()) {
        println!("  Pending Readings: {}", store.pending_count()?);
    }

    if !has_token {
        println!();
        println!("  Token not configured. Run: locshare auth login");
    }

    Ok(())
}

fn login(config: &Configuration) -> Result<()> {
    print!("Enter auth token: ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    let token = stdin
        .lock()
        .lines()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no input"))??;
    let token = token.trim().to_string();

    if token.is_empty() {
        eprintln!("Token cannot be empty");
        std::process::exit(1);
    }

    config::update_settings(&config.settings_file, |s| {
        s.auth_token = Some(token.clone());
    })?;

    println!("\nToken saved to {}", config.settings_file.display());
    Ok(())
}

fn logout(config: &Configuration) -> Result<()> {
    config::update_settings(&config.settings_file, |s| {
        s.auth_token = None;
    })?;

    // Queued readings belong to the departing identity.
    if config.db_file.exists() {
        let store = ReadingStore::new(&config.db_file.to_string_lossy())?;
        store.clear_all()?;
    }

    println!("Cleared saved token and local reading queue.");
    println!("Note: if LOCSHARE_TOKEN is set via environment variable, it will still be used.");
    Ok(())
}

fn show_help() {
    println!(
        r#"
locshare auth - Authentication management

Usage:
  locshare auth status            Show current configuration
  locshare auth login             Enter and save the hub auth token
  locshare auth logout            Clear saved credentials and local queue

Token priority (highest to lowest):
  1. LOCSHARE_TOKEN environment variable
  2. ~/.locshare/settings.json
"#
    );
}
