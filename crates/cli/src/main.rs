//! resync command-line tool.
//!
//! Connects an account (discovery and authorization), reads and writes
//! synchronized resources through the local cache, watches a resource for
//! remote changes, and generates / validates configuration files.

mod signals;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use resync_core::auth::{self, AuthRequest, Session, SessionStore};
use resync_core::cache::LocalCache;
use resync_core::config::AppConfig;
use resync_core::discovery::Discovery;
use resync_core::models::CycleOutcome;
use resync_core::remote::{HttpRemote, RemoteClient};
use resync_core::resource::SyncResource;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// resync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "resync",
    version,
    about = "Keep JSON resources in sync with a remote storage account"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Minimum log level (overrides the configuration file).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file.
    Validate,

    /// Look up the storage account and print the authorization URL.
    Discover {
        /// Account to look up (defaults to `account.resource`).
        resource: Option<String>,
    },

    /// Finish authorization with the URL the browser was redirected to.
    Login {
        /// Full redirect URL, including the `#access_token=...` fragment.
        redirect_url: String,
    },

    /// Show the connection and the cached resources.
    Status,

    /// Sync a resource once and print its content.
    Get {
        path: String,

        /// Pretty-print JSON content.
        #[arg(long)]
        pretty: bool,
    },

    /// Replace a resource with the content of a file ("-" for stdin).
    Put {
        path: String,
        file: PathBuf,

        /// Content type to store.
        #[arg(short = 't', long, default_value = "application/json")]
        content_type: String,
    },

    /// Follow a resource and print every change until interrupted.
    Watch { path: String },

    /// Remove the cached resources and the stored session.
    Forget,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            AppConfig::load_from_file(&config_path)
                .ok()
                .map(|c| c.logging.level)
        })
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .with_target(false)
        .without_time()
        .init();

    match run(cli.command, &config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Init { output } => cmd_init(output.as_deref().unwrap_or(config_path)),
        Commands::Validate => cmd_validate(config_path),
        command => {
            // Everything else needs a valid config and the cache.
            let config = load_config(config_path)?;
            let cache = open_cache(&config)?;

            match command {
                Commands::Discover { resource } => cmd_discover(&config, resource).await,
                Commands::Login { redirect_url } => cmd_login(&config, &cache, &redirect_url).await,
                Commands::Status => cmd_status(&cache),
                Commands::Get { path, pretty } => cmd_get(&config, &cache, &path, pretty).await,
                Commands::Put {
                    path,
                    file,
                    content_type,
                } => cmd_put(&config, &cache, &path, &file, &content_type).await,
                Commands::Watch { path } => cmd_watch(&config, &cache, &path).await,
                Commands::Forget => cmd_forget(&cache),
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("resync").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("resync.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("resync"))
        .unwrap_or_else(|| PathBuf::from(".resync"))
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn open_cache(config: &AppConfig) -> Result<LocalCache> {
    let db_path = config.cache.db_path();
    LocalCache::open(&db_path)
        .with_context(|| format!("failed to open cache at {}", db_path.display()))
}

fn discovery(config: &AppConfig) -> Result<Discovery> {
    Discovery::new(config.sync.request_timeout()).context("failed to build HTTP client")
}

/// The remote for the configured account.
///
/// A token from the environment plus an explicit storage URL skips the
/// stored session entirely.
fn open_remote(config: &AppConfig, cache: &LocalCache) -> Result<Arc<dyn RemoteClient>> {
    let timeout = config.sync.request_timeout();
    if let (Some(url), Some(token)) = (&config.account.storage_url, &config.account.token) {
        let remote = HttpRemote::new(url, token, timeout).context("failed to build HTTP client")?;
        return Ok(Arc::new(remote));
    }

    let session = SessionStore::new(cache.clone())
        .require()
        .context("no stored session")?;
    let remote = auth::connect(&session, timeout).context("failed to connect")?;
    Ok(Arc::new(remote))
}

fn resource(config: &AppConfig, cache: &LocalCache, path: &str) -> Result<SyncResource> {
    let remote = open_remote(config, cache)?;
    Ok(SyncResource::builder(path, remote, cache.clone())
        .interval(config.sync.poll_interval())
        .shared_resolver(config.sync.resolver())
        .build())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let data_dir = default_data_dir();
    let default_config = format!(
        r#"# resync configuration

[account]
resource = "acct:user@example.com"
client_id = "resync"
scope = "*:rw"
redirect_uri = "http://localhost:8000/"
# storage_url = "https://storage.example.com/user"
# token_env = "RESYNC_TOKEN"

[sync]
poll_interval_ms = 2000
request_timeout_secs = 30
# keep_local, take_remote or union
conflict = "keep_local"
union_key = "id"
# union_order_by = "created"

[cache]
data_dir = '{}'

[logging]
level = "info"
"#,
        data_dir.display()
    );

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Set account.resource to your storage account");
    println!("  2. Validate with: resync validate --config {}", output.display());
    println!("  3. Connect with:  resync discover --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Account       : {}", config.account.resource);
    println!(
        "  Storage URL   : {}",
        config.account.storage_url.as_deref().unwrap_or("discovered")
    );
    println!(
        "  Token (env)   : {}",
        if config.account.token.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    println!("  Poll interval : {}ms", config.sync.poll_interval_ms);
    println!("  Timeout       : {}s", config.sync.request_timeout_secs);
    println!("  Conflicts     : {:?}", config.sync.conflict);
    println!("  Cache         : {}", config.cache.db_path().display());
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_discover(config: &AppConfig, resource: Option<String>) -> Result<()> {
    let resource = resource.unwrap_or_else(|| config.account.resource.clone());
    let record = discovery(config)?
        .storage(&resource)
        .await
        .with_context(|| format!("discovery failed for {}", resource))?;

    println!("Account       : {}", resource);
    println!("Storage root  : {}", record.href);
    println!(
        "Protocol      : {}",
        record.storage_version.as_deref().unwrap_or("unknown")
    );

    let Some(endpoint) = record.auth_endpoint else {
        println!("Authorization : not advertised");
        return Ok(());
    };
    let url = auth::build_auth_url(
        &endpoint,
        &AuthRequest {
            redirect_uri: &config.account.redirect_uri,
            client_id: &config.account.client_id,
            scope: &config.account.scope,
        },
    )?;
    println!();
    println!("Open this URL to authorize access:");
    println!("  {}", url);
    println!();
    println!("Then run: resync login '<redirect url>'");

    Ok(())
}

async fn cmd_login(config: &AppConfig, cache: &LocalCache, redirect_url: &str) -> Result<()> {
    let token = auth::parse_redirect(redirect_url).context("authorization failed")?;
    let resource = &config.account.resource;

    let session = match &config.account.storage_url {
        Some(url) => Session {
            resource: resource.clone(),
            endpoint: url.clone(),
            token,
        },
        None => Session::establish(&discovery(config)?, resource, token)
            .await
            .context("failed to discover storage")?,
    };
    SessionStore::new(cache.clone())
        .save(&session)
        .context("failed to store session")?;

    println!("Connected {} ({})", session.resource, session.endpoint);
    Ok(())
}

fn cmd_status(cache: &LocalCache) -> Result<()> {
    let session = SessionStore::new(cache.clone())
        .load()
        .context("failed to read session")?;
    let paths = cache.paths().context("failed to list cached paths")?;

    println!("resync status");
    println!("=============");
    println!();
    match session {
        Some(s) => {
            println!("  Account : {}", s.resource);
            println!("  Storage : {}", s.endpoint);
        }
        None => println!("  Account : not connected"),
    }
    println!();

    if paths.is_empty() {
        println!("No cached resources.");
        return Ok(());
    }

    println!("{:<32} {:<24} {:<10} {:>8}", "PATH", "VERSION", "STATE", "BYTES");
    println!("{}", "-".repeat(78));
    for path in &paths {
        let Some(status) = cache.status(path).context("failed to read cache")? else {
            continue;
        };
        println!(
            "{:<32} {:<24} {:<10} {:>8}",
            truncate(&status.path, 32),
            truncate(status.version.as_deref().unwrap_or("-"), 24),
            if status.pending { "pending" } else { "synced" },
            status.content_bytes,
        );
    }
    println!();
    println!("{} resource(s) cached", paths.len());

    Ok(())
}

async fn cmd_get(config: &AppConfig, cache: &LocalCache, path: &str, pretty: bool) -> Result<()> {
    let res = resource(config, cache, path)?;
    let outcome = res.poll().await;
    info!(path, %outcome, "synced");
    if outcome == CycleOutcome::Failed {
        eprintln!("warning: could not reach the remote; showing cached content");
    }

    let Some(content) = cache.get_file(path).context("failed to read cache")? else {
        anyhow::bail!("no content for '{}'", path);
    };
    if pretty {
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(_) => println!("{}", content),
        }
    } else {
        println!("{}", content);
    }
    Ok(())
}

async fn cmd_put(
    config: &AppConfig,
    cache: &LocalCache,
    path: &str,
    file: &Path,
    content_type: &str,
) -> Result<()> {
    let content = if file == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };

    let res = resource(config, cache, path)?;
    let outcome = res
        .update(&content, content_type)
        .await
        .context("failed to write local cache")?;

    match outcome {
        CycleOutcome::Pushed => println!("Stored {} ({} bytes)", path, content.len()),
        CycleOutcome::Resolved => println!("Stored {} after resolving a conflict", path),
        other => println!(
            "Saved {} locally ({}); it will be pushed on the next sync",
            path, other
        ),
    }
    Ok(())
}

async fn cmd_watch(config: &AppConfig, cache: &LocalCache, path: &str) -> Result<()> {
    let res = resource(config, cache, path)?;
    let mut changes = res.watch();

    println!("Watching {} (Ctrl+C to stop)", path);
    let sync = res.clone();
    tokio::spawn(async move {
        sync.subscribe().await;
    });

    let shutdown = signals::wait_for_shutdown();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            change = changes.recv() => {
                let Some((content, node)) = change else { break };
                println!(
                    "[{}] {} version={}",
                    chrono::Local::now().format("%H:%M:%S"),
                    path,
                    node.version.as_deref().unwrap_or("-"),
                );
                println!("{}", content);
            }
        }
    }

    res.unsubscribe();
    println!("Stopped watching {}", path);
    Ok(())
}

fn cmd_forget(cache: &LocalCache) -> Result<()> {
    auth::forget(cache).context("failed to clear local data")?;
    println!("Local cache and session removed.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
