//! Init command implementation

use crate::cache::LocalCache;
use crate::config::Config;
use crate::error::{Error, Result};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use tracing::info;
use url::Url;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
    pub non_interactive: bool,
}

/// Write a configuration file and create the local cache database
pub async fn cmd_init(options: InitOptions) -> Result<()> {
    let InitOptions {
        base_dir,
        config_path,
        force,
        non_interactive,
    } = options;

    let interactive = resolve_interactive(io::stdin().is_terminal(), non_interactive)?;

    if config_path.exists() && !force {
        return Err(Error::AlreadyInitialized(config_path.display().to_string()));
    }

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path;

    if interactive {
        run_init_wizard(&mut config)?;
    }

    config.validate()?;
    config.save()?;

    let cache = LocalCache::open(&config.paths.cache_file, &config.cache).await?;
    cache.purge_expired().await?;
    info!("Created cache at {:?}", config.paths.cache_file);

    println!("✓ Initialized kbchat at {:?}", config.paths.base_dir);
    println!("\nConfiguration: {:?}", config.paths.config_file);
    println!("Cache: {:?}", config.paths.cache_file);
    println!("\nNext steps:");
    println!("  kbchat docs upload ./report.pdf          # Add a document");
    println!("  kbchat ask \"what does @-report say?\"     # Ask about it");

    Ok(())
}

fn resolve_interactive(is_tty: bool, non_interactive: bool) -> Result<bool> {
    if !is_tty && !non_interactive {
        return Err(Error::Config(
            "stdin is not a TTY. Use --non-interactive to write defaults.".to_string(),
        ));
    }
    Ok(is_tty && !non_interactive)
}

fn run_init_wizard(config: &mut Config) -> Result<()> {
    println!("\nWelcome to the kbchat setup wizard.\n");

    config.api_url = prompt_string("Backend API URL", &config.api_url, validate_url)?;
    config.ml_server_url = prompt_string("ML server URL", &config.ml_server_url, validate_url)?;
    config.user_id = prompt_string("User id", &config.user_id, |value| {
        if value.trim().is_empty() {
            Err("User id cannot be empty".to_string())
        } else {
            Ok(())
        }
    })?;

    let timeout = prompt_string(
        "Request timeout (seconds)",
        &config.request_timeout_secs.to_string(),
        |value| match value.parse::<u64>() {
            Ok(0) => Err("Timeout must be > 0".to_string()),
            Ok(_) => Ok(()),
            Err(_) => Err("Enter a valid number.".to_string()),
        },
    )?;
    config.request_timeout_secs = timeout
        .parse()
        .map_err(|_| Error::Config("Invalid timeout".to_string()))?;

    Ok(())
}

fn validate_url(value: &str) -> std::result::Result<(), String> {
    Url::parse(value).map(|_| ()).map_err(|_| "Invalid URL".to_string())
}

fn prompt_string<F>(label: &str, default: &str, validate: F) -> Result<String>
where
    F: Fn(&str) -> std::result::Result<(), String>,
{
    loop {
        print!("{} [{}]: ", label, default);
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let value = input.trim();
        let value = if value.is_empty() { default } else { value };

        if let Err(message) = validate(value) {
            println!("{}", message);
            continue;
        }
        return Ok(value.to_string());
    }
}
