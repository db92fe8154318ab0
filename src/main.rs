use anyhow::Result;
use clap::{Parser, Subcommand};
use klaudkod_core::config::{AppConfig, PermissionMode};
use klaudkod_core::tool_registry::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "klaudkod",
    about = "WebSocket server for an agentic coding assistant",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/klaudkod/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the model name
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket server (default)
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
        /// Directory the tools are confined to
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective configuration
    Show,
    /// Write a default configuration file if none exists
    Init,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "klaudkod=info,warn".into()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.apply_env()?;

    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(api_base) = &cli.api_base {
        config.provider.api_base = api_base.clone();
    }

    match cli.command {
        Some(Commands::Config { action }) => handle_config_command(action, &config),
        Some(Commands::Serve {
            host,
            port,
            working_dir,
        }) => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            if let Some(dir) = working_dir {
                config.tools.working_dir = Some(dir);
            }
            run_server(config).await
        }
        None => run_server(config).await,
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    let working_dir = config.working_dir()?;
    let mut registry = ToolRegistry::new(&working_dir, config.tools.permission_mode)?;

    if config.tools.enabled {
        klaudkod_tools::register_all(&mut registry, &config);
        if config.tools.permission_mode == PermissionMode::Ask {
            tracing::warn!("permission_mode 'ask' has no approval channel; tools run as in 'auto'");
        }
    } else {
        tracing::info!("Tools disabled; prompts stream plain completions");
    }
    let registry = Arc::new(registry);

    tracing::info!(
        "Loaded {} tools, model: {}, endpoint: {}, working dir: {}",
        registry.len(),
        config.provider.model,
        config.provider.api_base,
        registry.working_dir().display(),
    );
    if config.provider.api_key.is_none() {
        tracing::warn!("No API key configured (LLM_API_KEY); requests may be rejected");
    }

    if let Err(e) = klaudkod_server::serve(config, registry).await {
        tracing::error!("Server error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                AppConfig::default().save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
