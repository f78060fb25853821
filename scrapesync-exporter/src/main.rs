#![forbid(unsafe_code)]

use std::{io, net::SocketAddr, time::Duration};

use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use prometheus::Registry;
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::Conf,
    extract::{ConfigExtractor, ScrapeSource},
    metrics::ExporterMetrics,
    query::SystemSampler,
    sync::SyncLoop,
};

mod config;
mod extract;
mod http_util;
mod metrics;
#[cfg(test)]
mod mock;
mod query;
mod remote;
mod resolve;
mod route;
mod sync;

#[derive(Debug, Parser)]
#[command(name = "scrapesync-exporter")]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Path to config file")]
    config_path: Option<String>,
    #[command(subcommand)]
    commands: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the exporter (default)
    Serve,

    /// Query the monitoring system once and print what the exporter would publish
    Probe,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: Registry,
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(route::metrics))
        .route("/metrics", get(route::metrics))
        .route("/health", get(route::health))
        .layer((
            TraceLayer::new_for_http(),
            // Prevent requests to hang forever
            TimeoutLayer::new(Duration::from_secs(10)),
        ))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    trace!("using command line arguments {:?}", cli);

    let config = config::load(cli.config_path.as_deref().unwrap_or("config.toml"))?;
    trace!("using config {:?}", config);

    match cli.commands.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Probe => probe(&config.extractor()).await,
    }
}

async fn serve(config: Conf) -> anyhow::Result<()> {
    let registry = Registry::new();
    let metrics = ExporterMetrics::new(&registry)?;

    let addr = SocketAddr::from((config.exporter.address, config.exporter.port));
    info!("listening on {addr}");
    let listener = TcpListener::bind(addr).await?;

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let sync_task = tracker.spawn({
        let shutdown = shutdown.clone();
        let extractor = config.extractor();
        let sampler = SystemSampler::new(config.sync.cpu_window);
        let retry = config.bootstrap_retry();
        async move {
            if let Some(sync) =
                SyncLoop::bootstrap(extractor, sampler, metrics, retry, &shutdown).await
            {
                sync.run(shutdown).await;
            }
        }
    });
    tracker.close();

    let server = axum::serve(listener, app(AppState { registry }))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .into_future();
    supervise(server, sync_task, &shutdown).await?;

    trace!("waiting for sync loop shutdown");
    tracker.wait().await;

    Ok(())
}

/// Serves until shutdown. A sync loop that dies on its own ends serving
/// with an error.
async fn supervise<F>(
    server: F,
    mut sync_task: JoinHandle<()>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::pin!(server);

    tokio::select! {
        res = &mut server => Ok(res?),
        res = &mut sync_task => match res {
            // only returns once shutdown was requested
            Ok(()) => Ok(server.await?),
            Err(e) => {
                error!("sync loop aborted: {e}");
                shutdown.cancel();
                Err(anyhow::anyhow!("sync loop aborted: {e}"))
            }
        },
    }
}

async fn probe(extractor: &ConfigExtractor) -> anyhow::Result<()> {
    let interval = extractor.scrape_interval().await?;
    let sample = extractor.scrape_duration().await?;
    let percent = sample.seconds / interval.as_secs() as f64 * 100.0;

    println!("target:          {}", extractor.identity());
    println!("health:          {}", if sample.healthy { "up" } else { "down" });
    println!("scrape interval: {interval}");
    println!(
        "scrape duration: {:.3}s ({percent:.2}% of interval)",
        sample.seconds
    );

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                #[cfg(debug_assertions)]
                let default_log_level =
                    format!("{}=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into();

                #[cfg(not(debug_assertions))]
                let default_log_level =
                    format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME")).into();

                default_log_level
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal(token: CancellationToken) {
    let _shutdown_guard = token.drop_guard();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
