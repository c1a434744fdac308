//! mcpgate - MCP resource server with an OAuth facade.
//!
//! `serve` runs the protected MCP server whose clients log in through the
//! facade; `stateless` runs an unauthenticated arithmetic MCP server;
//! `client` logs in to a protected server and calls its tools.

use anyhow::Context;
use clap::{Parser, Subcommand};
use mcpgate_auth::{FacadeConfig, GoogleProvider, MemoryStore, OAuthFacade};
use mcpgate_mcp::{
    arithmetic_tools, create_mcp_router, protected_tools, LoginOptions, McpHttpClient,
    McpHttpState,
};
use mcpgate_server::{create_router, spawn_sweeper, AppState, SWEEP_INTERVAL};
use mcpgate_util::{log, LogConfig, LogLevel, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const PROTECTED_SERVER_NAME: &str = "MCP RS with Google OAuth";
const PROTECTED_SERVER_INSTRUCTIONS: &str =
    "Protected MCP server that delegates OAuth to Google via a DCR-capable proxy.";
const STATELESS_SERVER_NAME: &str = "Stateless Math Server";

#[derive(Parser)]
#[command(name = "mcpgate")]
#[command(author, version, about = "MCP server with an OAuth facade delegating login to Google", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the OAuth-protected MCP server
    Serve {
        /// JSON configuration file (environment variables still override it)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// Bind port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run the unauthenticated stateless arithmetic MCP server
    Stateless {
        /// Port to listen on (binds localhost)
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Log in to a protected MCP server and call its tools
    Client {
        /// MCP endpoint of the server
        #[arg(default_value = "http://localhost:8005/mcp")]
        url: String,

        /// Scope to request (repeatable; defaults to what the server advertises)
        #[arg(long = "scope")]
        scopes: Vec<String>,

        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,

        /// Host of the loopback redirect URI
        #[arg(long, default_value = "localhost")]
        callback_host: String,
    },
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::parse(s).ok_or_else(|| format!("unknown log level '{s}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => LogLevel::Info,
        Commands::Stateless { .. } => LogLevel::Debug,
        Commands::Client { .. } => LogLevel::Info,
    };
    log::init(LogConfig {
        level: cli.log_level.unwrap_or(default_level),
        ..LogConfig::default()
    });

    match cli.command {
        Commands::Serve { config, host, port } => run_serve(config, host, port).await,
        Commands::Stateless { port } => run_stateless(port).await,
        Commands::Client {
            url,
            scopes,
            no_browser,
            callback_host,
        } => run_client(url, scopes, no_browser, callback_host).await,
    }
}

/// Assemble the facade configuration: file or defaults, then environment,
/// then command-line flags.
fn load_config(
    path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<FacadeConfig> {
    let mut config = match path {
        Some(path) => FacadeConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => FacadeConfig::from_env(),
    };
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    config.validate()?;
    Ok(config)
}

async fn run_serve(
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let config = load_config(config, host, port)?;
    let address = config.bind_address();

    let upstream = GoogleProvider::new(config.upstream.clone())?;
    let facade = OAuthFacade::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(upstream),
        Arc::new(SystemClock),
    )?;

    let mcp = McpHttpState::new(
        PROTECTED_SERVER_NAME,
        env!("CARGO_PKG_VERSION"),
        protected_tools(),
    )
    .with_instructions(PROTECTED_SERVER_INSTRUCTIONS);

    let sweeper = spawn_sweeper(facade.clone(), SWEEP_INTERVAL);
    let app = create_router(AppState::new(facade.clone(), mcp));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let config = facade.config();
    info!(
        address = %address,
        base_url = %config.base_url,
        resource = %config.resource(),
        callback = %config.upstream_redirect_uri(),
        "MCP server with OAuth facade listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

async fn run_stateless(port: u16) -> anyhow::Result<()> {
    let mcp = McpHttpState::new(
        STATELESS_SERVER_NAME,
        env!("CARGO_PKG_VERSION"),
        arithmetic_tools(),
    );
    let app = create_mcp_router(mcp, "/mcp").layer(TraceLayer::new_for_http());

    let address = format!("localhost:{port}");
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(address = %address, "Stateless MCP server listening on /mcp");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn run_client(
    url: String,
    scopes: Vec<String>,
    no_browser: bool,
    callback_host: String,
) -> anyhow::Result<()> {
    let mut options = LoginOptions::new(move |auth_url| {
        println!("Open this URL to log in:\n  {auth_url}");
        if !no_browser {
            if let Err(e) = open::that(auth_url) {
                warn!(error = %e, "Failed to open browser");
            }
        }
        Ok(())
    });
    options.callback_host = callback_host;
    if !scopes.is_empty() {
        options.scopes = Some(scopes);
    }

    let client = McpHttpClient::new(url)?;
    let server = client
        .connect(&options)
        .await
        .with_context(|| format!("failed to connect to {}", client.url()))?;
    println!("Connected to {}", server.server_info.name);

    let tools = client.list_tools().await?;
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    println!("Tools: {}", names.join(", "));

    let info = client.call_tool("get_user_info", None).await?;
    match info.json() {
        Some(user) => {
            println!("User info: {user}");
            println!("Google user: {}", user["email"].as_str().unwrap_or("-"));
            println!("Name: {}", user["name"].as_str().unwrap_or("-"));
        }
        None => println!("User info: {}", info.text()),
    }

    let time = client.call_tool("get_time", None).await?;
    match time.json() {
        Some(value) => println!("Time: {value}"),
        None => println!("Time: {}", time.text()),
    }
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
    }
}
