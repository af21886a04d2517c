use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jobmonitor::config::{Command, Config, ConfigFile, LogFormat, MonitorConfig};
use jobmonitor::credentials::EnvSecretStore;
use jobmonitor::dedup::SqliteDedupStore;
use jobmonitor::monitor::{Monitor, SeedOutcome};
use jobmonitor::notify::{CommandSurface, LogSurface, NotificationDispatcher, NotificationSurface};
use jobmonitor::routes::{self, AppState};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("jobmonitor=info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// `--notify-command "notify-send -u low"` runs `notify-send -u low <title> <body>`.
fn notification_surface(command: Option<&str>) -> Arc<dyn NotificationSurface> {
    let mut parts = command.unwrap_or_default().split_whitespace();
    match parts.next() {
        Some(program) => {
            tracing::info!("Notifications go to `{program}`");
            Arc::new(CommandSurface::new(program).with_args(parts.map(str::to_string).collect()))
        }
        None => Arc::new(LogSurface),
    }
}

fn load_monitor_config(config: &Config) -> anyhow::Result<MonitorConfig> {
    let monitor_config = ConfigFile::load_or_init(&config.config)?
        .into_monitor_config()
        .with_context(|| format!("invalid config {}", config.config.display()))?;
    if monitor_config.sources.is_empty() {
        tracing::warn!("No sources enabled in {}", config.config.display());
    }
    Ok(monitor_config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);

    match config.resolved_command() {
        Command::InitConfig { force } => init_config(&config, force),
        Command::Seed => seed(&config).await,
        Command::Run => run(&config).await,
    }
}

fn init_config(config: &Config, force: bool) -> anyhow::Result<()> {
    if config.config.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            config.config.display()
        );
    }
    ConfigFile::default().write(&config.config)?;
    tracing::info!("Wrote default configuration to {}", config.config.display());
    Ok(())
}

async fn seed(config: &Config) -> anyhow::Result<()> {
    let monitor_config = load_monitor_config(config)?;
    let store = SqliteDedupStore::open(&config.state_db).await?;

    let outcomes = Monitor::seed(
        &monitor_config,
        &EnvSecretStore::new(),
        Arc::new(store.clone()),
    )
    .await;
    store.close().await;

    let seeded = outcomes
        .values()
        .filter(|o| matches!(o, SeedOutcome::Seeded(_)))
        .count();
    if !outcomes.is_empty() && seeded == 0 {
        bail!("no source could be seeded");
    }
    Ok(())
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let monitor_config = load_monitor_config(config)?;

    tracing::info!("Opening state database {}", config.state_db.display());
    let store = SqliteDedupStore::open(&config.state_db).await?;

    let listener = match &config.status_addr {
        Some(addr) => Some(
            tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding status server to {addr}"))?,
        ),
        None => None,
    };

    let dispatcher = NotificationDispatcher::new(notification_surface(
        config.notify_command.as_deref(),
    ))
    .with_timeout(monitor_config.dispatch_timeout);

    let monitor = Monitor::start(
        &monitor_config,
        &EnvSecretStore::new(),
        Arc::new(store.clone()),
        dispatcher,
    );

    let server = listener.map(|listener| {
        let state = AppState {
            status: monitor.status(),
            pool: store.pool().clone(),
        };
        serve_status(listener, state, monitor.cancellation_token())
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Could not listen for shutdown signal: {e}");
    }
    tracing::info!("Shutdown signal received, stopping gracefully");
    monitor.stop(config.grace_period()).await;

    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => tracing::error!("Status server error: {e}"),
            Err(e) => tracing::error!("Status server task failed: {e}"),
            Ok(Ok(())) => {}
        }
    }
    store.close().await;
    Ok(())
}

fn serve_status(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> JoinHandle<std::io::Result<()>> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Status server listening on {addr}");
    }
    let app = routes::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    })
}
