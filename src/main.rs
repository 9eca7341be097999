//! TCP tunnel: accepts connections and relays each one to an upstream.
//!
//! ```text
//!  client ──▶ Listener ──▶ supervised task ──▶ Tunnel ──▶ upstream
//!                │                               │
//!          QuitSignal /                     StreamRelay
//!          drain on stop                  (pooled buffers)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tcp_tunnel::config::loader::{apply_env_overrides, read_config_or_default, ConfigSource};
use tcp_tunnel::config::schema::Environment;
use tcp_tunnel::config::validation::validate_config;
use tcp_tunnel::config::{ConfigError, LogFormat, TunnelConfig};
use tcp_tunnel::lifecycle::signals::wait_for_signal;
use tcp_tunnel::observability::{logging, metrics};
use tcp_tunnel::{BufferPool, Listener, StreamRelay, Tunnel};

#[derive(Parser)]
#[command(name = "tcp-tunnel", version)]
#[command(about = "Forward TCP connections to an upstream with graceful shutdown", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "./config/default.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Environment (dev, test, prod)
    #[arg(long)]
    env: Option<Environment>,

    /// Local address to listen on, host:port
    #[arg(short, long)]
    listen: Option<String>,

    /// Upstream address to relay to, host:port
    #[arg(short, long)]
    upstream: Option<String>,

    /// Seconds to wait for connections to drain on shutdown
    #[arg(long)]
    shutdown_timeout: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut TunnelConfig) {
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        if let Some(env) = self.env {
            config.env = env;
        }
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(upstream) = &self.upstream {
            config.relay.upstream_address = Some(upstream.clone());
        }
        if let Some(secs) = self.shutdown_timeout {
            config.listener.shutdown_timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (mut config, source) = read_config_or_default(&cli.config)?;
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.log)?;

    match source {
        ConfigSource::File => {
            tracing::info!(path = %cli.config.display(), "Loaded config from file")
        }
        ConfigSource::Defaults => tracing::warn!(
            path = %cli.config.display(),
            "Config file not found, using defaults and environment"
        ),
    }
    tracing::info!(
        env = ?config.env,
        bind_address = %config.listener.bind_address,
        shutdown_timeout_secs = config.listener.shutdown_timeout_secs,
        "Configuration loaded"
    );

    let upstream = config
        .relay
        .upstream_address
        .clone()
        .ok_or("no upstream configured: set relay.upstream_address or pass --upstream")?;

    if let Some(addr) = &config.observability.metrics_address {
        // Already validated as a socket address.
        match addr.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(metrics_address = %addr, error = %e, "Failed to parse metrics address"),
        }
    }

    let relay = StreamRelay::new(BufferPool::new(config.relay.buffer_pool()));
    let tunnel = Arc::new(Tunnel::new(upstream, config.relay.connect_timeout(), relay));

    let listener = Listener::from_config(&config.listener);
    let handler_tunnel = Arc::clone(&tunnel);
    listener
        .start_listen(move |stream| {
            let tunnel = Arc::clone(&handler_tunnel);
            async move { tunnel.handle(stream).await }
        })
        .await?;

    if let Some(local) = listener.local_addr() {
        tracing::info!(address = %local, upstream = %tunnel.upstream(), "Tunnel listening");
    }

    wait_for_signal().await?;

    if let Err(e) = listener
        .stop_gracefully(config.listener.shutdown_timeout())
        .await
    {
        tracing::warn!(
            error = %e,
            active_connections = listener.active_connections(),
            "Graceful shutdown incomplete"
        );
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
