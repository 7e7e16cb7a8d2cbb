//! Collaborators Worker - Backend service for collaborator management
//!
//! This worker connects to NATS, answers collaborator requests and runs the CSV import queue.

mod accounts;
mod auth;
mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sqlx::PgPool;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use config::Config;
use db::store::{PgCollaboratorStore, PgUserDirectory};
use handlers::HandlerContext;
use services::cache::CollaboratorsCache;
use services::cache_sync::CacheSync;
use services::collaborator::CollaboratorService;
use services::email_sender::{EmailSender, LogEmailSender, ResendEmailSender};
use services::import_job::{ImportJobRunner, RetryPolicy};
use services::import_processor::ImportProcessor;
use services::importer::CsvImporter;
use services::mail_queue::MailQueue;
use services::rate_limiter::RateLimiter;
use services::storage::{LocalDisk, StorageRegistry};
use services::store::{CollaboratorStore, UserDirectory};
use services::upload::UploadHandoff;

const MAX_DB_CONNECTIONS: u32 = 10;
const LOCAL_DISK: &str = "local";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    dotenvy::dotenv().ok();
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,collaborators_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, MAX_DB_CONNECTIONS).await?;
    info!("Connected to PostgreSQL");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            db::run_migrations(&pool).await?;
            info!("Database migrations complete");
            Ok(())
        }
        Command::CreateUser { email, name } => {
            db::run_migrations(&pool).await?;
            let users = PgUserDirectory::new(pool);
            accounts::create_user_interactive(&users, &email, &name).await?;
            Ok(())
        }
        Command::Serve => serve(config, pool).await,
    }
}

async fn serve(config: Config, pool: PgPool) -> Result<()> {
    info!("Starting Collaborators Worker...");

    db::run_migrations(&pool).await?;
    info!("Database migrations complete");

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (&config.nats_user, &config.nats_password) {
        (Some(user), Some(password)) => {
            async_nats::ConnectOptions::new()
                .user_and_password(user.clone(), password.clone())
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let disks = StorageRegistry::new().with_disk(
        LOCAL_DISK,
        Arc::new(LocalDisk::new(config.storage_root.clone())),
    );
    if disks.disk(&config.storage_disk).is_none() {
        anyhow::bail!("STORAGE_DISK '{}' is not configured", config.storage_disk);
    }

    let sender: Arc<dyn EmailSender> = match config.resend_api_key {
        Some(ref key) => {
            info!("Mail delivery via Resend from {}", config.email_from);
            Arc::new(ResendEmailSender::new(key.clone(), config.email_from.clone()))
        }
        None => {
            warn!("RESEND_API_KEY not set, mails will only be logged");
            Arc::new(LogEmailSender)
        }
    };
    let (mail, mail_worker) = MailQueue::start(sender);

    let store: Arc<dyn CollaboratorStore> = Arc::new(PgCollaboratorStore::new(pool.clone()));
    let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool));
    let (flush_tx, flush_rx) = tokio::sync::mpsc::unbounded_channel();
    let cache = Arc::new(CollaboratorsCache::new().with_broadcast(flush_tx));
    let cache_sync = CacheSync::new(nats_client.clone(), Arc::clone(&cache));

    let importer = Arc::new(CsvImporter::new(Arc::clone(&store), disks.clone()));
    let runner = Arc::new(ImportJobRunner::new(
        importer,
        Arc::clone(&users),
        Arc::clone(&cache),
        mail,
        disks.clone(),
        RetryPolicy::default(),
    ));

    let processor = Arc::new(
        ImportProcessor::new(
            nats_client.clone(),
            runner,
            config.import_concurrency,
            config.import_ack_wait,
        )
        .await?,
    );

    let ctx = Arc::new(HandlerContext {
        collaborators: CollaboratorService::new(store, cache),
        users,
        uploads: UploadHandoff::new(disks, config.storage_disk.clone(), processor.clone()),
        login_limiter: RateLimiter::new(5, Duration::from_secs(60)),
        jwt_secret: config.jwt_secret.clone(),
        jwt_ttl: config.jwt_ttl,
    });

    let processor_handle = tokio::spawn(Arc::clone(&processor).start_processing());
    info!("Import processor started");

    let cache_sync_handle = tokio::spawn(cache_sync.run(flush_rx));

    tokio::select! {
        result = handlers::start_handlers(nats_client, ctx) => {
            if let Err(e) = result {
                error!("Handler error: {}", e);
                return Err(e);
            }
        }
        result = processor_handle => {
            error!("Import processor finished: {:?}", result);
        }
        result = cache_sync_handle => {
            error!("Cache flush sharing finished: {:?}", result);
        }
        _ = mail_worker => {
            error!("Mail queue worker finished");
        }
    }

    Ok(())
}
