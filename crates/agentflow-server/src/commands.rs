use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Commands};
use crate::config::AppConfig;
use crate::cron_runner::{CronRunner, NoopChatClient};
use crate::insight::{InsightScheduler, NoopAnalyzer, DEFAULT_INTERVAL};
use crate::state::AppState;
use crate::{doctor, router};
use agentflow_store::{SqliteStore, Store};

pub fn run(cli: Cli) -> Result<()> {
    init_tracing();

    match cli.command {
        Commands::Serve => {
            let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
            runtime.block_on(serve())
        }
        Commands::Migrate => migrate(),
        Commands::Doctor => {
            let config = AppConfig::from_env();
            doctor::run(&config.db_path)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn migrate() -> Result<()> {
    let config = AppConfig::from_env();
    SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    println!("schema is current at {}", config.db_path.display());
    Ok(())
}

async fn serve() -> Result<()> {
    let config = AppConfig::from_env();
    let port = config.port;
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );
    let state = AppState::new(store, config);

    let insight_scheduler = Arc::new(InsightScheduler::new(&state, Arc::new(NoopAnalyzer)));
    state.set_insight_scheduler(insight_scheduler.clone());
    tokio::spawn(insight_scheduler.run_loop(DEFAULT_INTERVAL));

    let cron_runner = Arc::new(CronRunner::new(state.clone(), Arc::new(NoopChatClient)));
    tokio::spawn(cron_runner.run_loop(Duration::from_secs(30)));

    let app = router::build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;

    tracing::info!(port, "agentflow-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
