//! newsapi-mcp: MCP gateway exposing News API search tools
//!
//! Serves the `search_articles` and `get_top_headlines` tools to MCP clients
//! over streamable HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use newsapi_mcp::config;
use newsapi_mcp::mcp::{serve, GatewayState, McpServer};
use newsapi_mcp::newsapi::NewsApiClient;
use newsapi_mcp::tools::news::register_news_tools;
use newsapi_mcp::tools::ToolRegistry;

/// MCP gateway exposing News API search tools.
///
/// Clients connect over streamable HTTP; the News API key is read from the
/// environment variable named in the configuration (`NEWSAPI_KEY` by default).
#[derive(Parser, Debug)]
#[command(name = "newsapi-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the configuration file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the configuration file)
    #[arg(long)]
    port: Option<u16>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "info" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Startup licence notice required by GPLv3 section 5d.
fn license_notice() -> String {
    format!(
        "newsapi-mcp {}  Copyright (C) 2026  The Embedded Society\n\
         This program comes with ABSOLUTELY NO WARRANTY.\n\
         This is free software, licensed under GPL-3.0-or-later.\n\
         Source: {}\n",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_REPOSITORY"),
    )
}

/// Entry point for the newsapi-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfiguration read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    if let Some(host) = args.host {
        cfg.server.host = host;
    }
    if let Some(port) = args.port {
        cfg.server.port = port;
    }

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    eprintln!("{}", license_notice());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting newsapi-mcp server"
    );

    let client = match NewsApiClient::from_config(&cfg.newsapi) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create News API client");
            return ExitCode::FAILURE;
        }
    };
    if !client.has_api_key() {
        warn!(
            env_var = %cfg.newsapi.api_key_env,
            "News API key not set; tool calls will fail until it is provided"
        );
    }

    let mut tools = ToolRegistry::new();
    if let Err(e) = register_news_tools(&mut tools, Arc::new(client)) {
        error!(error = %e, "Tool registration failed");
        return ExitCode::FAILURE;
    }
    info!(tools = tools.len(), "Tools registered");

    let state = GatewayState::new(
        Arc::new(McpServer::new(tools)),
        cfg.server.max_body_bytes,
    );

    // Run the server
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(serve(&cfg.server, state));

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
