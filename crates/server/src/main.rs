use clap::Parser;
use hybriddb_core::{config, Engine, EngineConfig};
use hybriddb_server::api::create_router;
use hybriddb_server::api::handlers::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hybrid-db", about = "In-process hybrid database server")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = config::DEFAULT_BIND_ADDR)]
    bind: String,

    /// Data directory for table snapshots
    #[arg(short, long, default_value = config::DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Seconds the write worker waits between flush cycles
    #[arg(long, default_value_t = config::FLUSH_INTERVAL_SECS)]
    flush_interval: u64,

    /// Write queue capacity
    #[arg(long, default_value_t = config::WRITE_QUEUE_CAPACITY)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(
                    "hybriddb_server=info"
                        .parse()
                        .expect("valid directive literal"),
                )
                .add_directive(
                    "hybriddb_core=info"
                        .parse()
                        .expect("valid directive literal"),
                ),
        )
        .init();

    let args = Args::parse();

    let data_path = std::path::Path::new(&args.data_dir);
    if data_path.exists() && !data_path.is_dir() {
        eprintln!(
            "Error: data_dir '{}' exists but is not a directory",
            args.data_dir
        );
        std::process::exit(1);
    }

    let engine = Engine::open(EngineConfig {
        data_dir: PathBuf::from(&args.data_dir),
        queue_capacity: args.queue_capacity,
        flush_interval: Duration::from_secs(args.flush_interval.max(1)),
        ..EngineConfig::default()
    })
    .unwrap_or_else(|e| {
        eprintln!("Error: failed to open engine at '{}': {}", args.data_dir, e);
        std::process::exit(1);
    });
    let engine = Arc::new(engine);

    let state = AppState {
        engine: Arc::clone(&engine),
        start_time: Instant::now(),
    };
    let app = create_router(state);

    // A bind failure propagates out of main as a non-zero exit
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %args.bind,
        data_dir = %args.data_dir,
        tables = engine.table_stats().len(),
        "hybrid.db ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    tracing::info!("all requests drained, flushing pending writes");
    let flush_engine = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || flush_engine.flush()).await?;
    drop(engine);
    tracing::info!("shutdown complete");

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    tracing::info!("Shutting down gracefully, draining in-flight requests...");
}
