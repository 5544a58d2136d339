use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    routing::{get, post},
    Extension, Router,
};
use clap::Parser;
use haarsig::{Mode, QueryConfig, SqlDB, DB};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod response;
mod routes;
mod utils;

#[derive(Parser)]
struct Args {
    /// The address to bind to
    #[arg(short = 'H', long = "host", default_value = "0.0.0.0")]
    host: String,
    /// The port to listen on
    #[arg(short = 'p', long = "port", default_value_t = 5588)]
    port: u16,
    /// The path to the sqlite db
    #[arg(short = 'd', long = "database", default_value = "haarsig.sqlite")]
    db_path: PathBuf,
    /// Coefficients a candidate must share with the query, 0 scans everything
    #[arg(long = "min-shared", default_value_t = 1)]
    min_shared: usize,
    /// Score with the sketch weights unless a query says otherwise
    #[arg(long = "sketch")]
    sketch: bool,
}

impl Args {
    fn query_config(&self) -> QueryConfig {
        let mode = if self.sketch {
            Mode::Sketch
        } else {
            Mode::Photographic
        };
        QueryConfig::new()
            .with_mode(mode)
            .with_min_shared(self.min_shared)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let sql_db = SqlDB::open(&args.db_path)?;
    let rows = sql_db.load()?;
    let total = rows.len();
    let signatures: Vec<_> = rows
        .into_iter()
        .filter_map(|(id, signature)| signature.ok().map(|s| (id, s)))
        .collect();
    if signatures.len() < total {
        warn!(
            skipped = total - signatures.len(),
            "stored signatures left out of the index"
        );
    }
    let db = DB::from_signatures(args.query_config(), signatures)?;

    let db = Arc::new(db);
    let sql_db = Arc::new(Mutex::new(sql_db));

    let app = Router::new()
        .route("/query", get(routes::query::get).post(routes::query::get))
        .route(
            "/images/:id",
            post(routes::images::post).delete(routes::images::delete),
        )
        .route("/status", get(routes::status::get))
        .layer(Extension(db))
        .layer(Extension(sql_db));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(%error, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(%error, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
