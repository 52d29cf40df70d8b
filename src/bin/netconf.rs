//! NETCONF server CLI binary.
//!
//! # Commands
//!
//! - `subsystem` - Serve one session on stdin/stdout (SSH subsystem handler)
//! - `listen` - Serve sessions over plain TCP (development only)
//!
//! Logs always go to stderr; in subsystem mode stdout carries the protocol.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use netconf::{
    config::Config,
    protocol::WithDefaultsMode,
    server::ServerContext,
    set_default_capabilities, CapabilitySet, MemoryDatastore, Session, SessionConfig,
    TcpTransport, TransportInfo, TransportKind, VERSION,
};

#[derive(Parser)]
#[command(name = "netconf")]
#[command(version = VERSION)]
#[command(about = "NETCONF session engine - server front end", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/netconf/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Capability URI to advertise (repeatable, replaces the configured list)
    #[arg(long = "capability", global = true)]
    capabilities: Vec<String>,

    /// with-defaults basic mode (report-all, trim, explicit)
    #[arg(long, global = true)]
    with_defaults: Option<WithDefaultsMode>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a single session on stdin/stdout
    Subsystem {
        /// Authenticated user name supplied by the transport
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Listen for plain TCP connections (development only)
    Listen {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for protocol traffic
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = load_config(&cli)?;
    let session_config = config.session_config();
    set_default_capabilities(session_config.capabilities.clone());

    let mut ctx = ServerContext::new(Arc::new(MemoryDatastore::new()))
        .with_basic_mode(config.server.with_defaults);
    if let Some(modes) = config.server.also_supported.clone() {
        ctx = ctx.with_also_supported(modes);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Subsystem { user } => {
            let user = user.or_else(|| std::env::var("USER").ok());
            runtime.block_on(cmd_subsystem(user, session_config, ctx))
        },
        Commands::Listen { port, host } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("invalid listen address {host}:{port}"))?;
            runtime.block_on(cmd_listen(addr, session_config, ctx))
        },
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let file_config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => match Config::default_path().filter(|p| p.exists()) {
            Some(path) => Config::from_file(&path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::default(),
        },
    };

    let mut config = file_config.merge(Config::from_env());
    if !cli.capabilities.is_empty() {
        config.session.capabilities = cli.capabilities.clone();
    }
    if cli.with_defaults.is_some() {
        config.server.with_defaults = cli.with_defaults;
    }

    let caps: CapabilitySet = config.session.capabilities.iter().map(String::as_str).collect();
    if !config.session.capabilities.is_empty() && caps.highest_version().is_none() {
        anyhow::bail!("capability list advertises no base protocol version");
    }
    Ok(config)
}

async fn cmd_subsystem(
    user: Option<String>,
    config: SessionConfig,
    ctx: ServerContext,
) -> anyhow::Result<()> {
    let mut session = Session::accept_stdio(user, &config, ctx)
        .await
        .context("hello exchange failed")?;
    session.serve().await?;

    let stats = session.stats();
    tracing::info!(
        session_id = stats.session_id,
        in_rpcs = stats.in_rpcs,
        in_bad_rpcs = stats.in_bad_rpcs,
        out_rpc_errors = stats.out_rpc_errors,
        "subsystem session finished"
    );
    Ok(())
}

async fn cmd_listen(addr: SocketAddr, config: SessionConfig, ctx: ServerContext) -> anyhow::Result<()> {
    tracing::info!("Starting NETCONF server on {} (plain TCP, development only)", addr);
    let config = Arc::new(config);

    TcpTransport::new(addr)
        .serve(move |stream, peer| {
            let config = Arc::clone(&config);
            let ctx = ctx.clone();
            async move {
                let info = TransportInfo {
                    host: Some(peer.ip().to_string()),
                    port: Some(peer.port()),
                    user: None,
                    kind: TransportKind::Tcp,
                };
                let mut session = match Session::accept_with(info, &config, stream, ctx).await {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::warn!(%peer, error = %e, "session setup failed");
                        return;
                    },
                };
                if let Err(e) = session.serve().await {
                    tracing::warn!(%peer, session_id = session.id(), error = %e, "session ended with error");
                }
            }
        })
        .await?;
    Ok(())
}
