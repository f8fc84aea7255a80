use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pve_scripthub::config::ServerConfig;
use pve_scripthub::db::{schema, services as db_services};
use pve_scripthub::script_store::ScriptStore;
use pve_scripthub::sync::scheduler;
use pve_scripthub::version::VERSION;
use pve_scripthub::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address override, e.g. 0.0.0.0:3000
    #[arg(short, long)]
    listen: Option<String>,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "scripthub.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn,russh=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("pve-scripthub {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    init_logging();
    info!("Starting pve-scripthub, version: {}", VERSION);
    dotenv().ok();

    let mut config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    let config = Arc::new(config);

    tokio::fs::create_dir_all(&config.data_dir).await?;
    tokio::fs::create_dir_all(&config.scripts_dir).await?;

    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(10);
    let db: DatabaseConnection = Database::connect(opt).await?;

    schema::init_schema(&db).await?;
    db_services::seed_default_repo(&db).await?;

    let store = ScriptStore::new(config.scripts_dir.clone());
    let sync_guard: scheduler::SyncGuard = Arc::new(Mutex::new(()));

    scheduler::spawn_auto_sync(db.clone(), config.clone(), store.clone(), sync_guard.clone());

    let app_state = Arc::new(AppState {
        db,
        config: config.clone(),
        store,
        sync_guard,
    });
    let router = web::create_router(app_state);

    info!("Listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
