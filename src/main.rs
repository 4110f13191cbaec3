use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tmdb_proxy::config::config_search_paths;
use tmdb_proxy::{build_router, AccessLog, AppState, ProxyConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "tmdb-proxy",
    about = "Transparent reverse proxy for the TMDB API and image CDN",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Path prefix stripped before routing, e.g. "/api/tmdb" (overrides config)
    #[arg(long)]
    mount_prefix: Option<String>,

    /// Write a JSONL access log to this file (overrides config)
    #[arg(long)]
    access_log: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tmdb_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(prefix) = cli.mount_prefix {
        config.mount_prefix = prefix;
    }
    if let Some(path) = cli.access_log {
        config.access_log = Some(path);
    }

    // CLI overrides need the same checks as the file
    let config = config.validate()?;

    let access_log = config
        .access_log
        .as_ref()
        .map(AccessLog::open)
        .transpose()?;

    info!("tmdb-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  API origin:    {}", config.upstream.api_origin);
    info!("  Image origin:  {}", config.upstream.image_origin);
    info!(
        "  Mount prefix:  {}",
        if config.mount_prefix.is_empty() { "(none)" } else { config.mount_prefix.as_str() }
    );
    if let Some(ref path) = config.access_log {
        info!("  Access log:    {}", path.display());
    }

    let bind_addr = config.bind_addr();
    let log_handle = access_log.clone();
    let state = Arc::new(AppState::new(config, access_log)?);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(log) = log_handle {
        log.flush().await;
    }

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
