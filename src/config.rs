//! Configuration management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{self, Context, Result};

const MIN_JWT_SECRET_BYTES: usize = 32;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Optional NATS credentials
    pub nats_user: Option<String>,
    pub nats_password: Option<String>,

    /// PostgreSQL connection string
    pub database_url: String,

    /// JWT secret key for token signing/validation
    pub jwt_secret: String,

    /// Access token lifetime
    pub jwt_ttl: Duration,

    /// Root directory of the `local` storage disk
    pub storage_root: PathBuf,

    /// Disk uploads are written to
    pub storage_disk: String,

    /// Import jobs processed in parallel
    pub import_concurrency: usize,

    /// Execution-time limit of one import delivery
    pub import_ack_wait: Duration,

    /// Resend API key; mails are only logged without it
    pub resend_api_key: Option<String>,

    pub email_from: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let nats_url = var("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let jwt_secret = var("JWT_SECRET")
            .context("JWT_SECRET must be set, generate one with: openssl rand -base64 48")?;

        if jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            anyhow::bail!(
                "JWT_SECRET must be at least {} bytes (current: {} bytes). Generate one with: openssl rand -base64 48",
                MIN_JWT_SECRET_BYTES,
                jwt_secret.len()
            );
        }

        let jwt_ttl_minutes: u64 = parse_or(var("JWT_TTL_MINUTES"), "JWT_TTL_MINUTES", 60)?;
        if jwt_ttl_minutes == 0 {
            anyhow::bail!("JWT_TTL_MINUTES must be greater than zero");
        }

        let import_concurrency: usize = parse_or(var("IMPORT_CONCURRENCY"), "IMPORT_CONCURRENCY", 2)?;
        if import_concurrency == 0 {
            anyhow::bail!("IMPORT_CONCURRENCY must be greater than zero");
        }

        let import_ack_wait_secs: u64 =
            parse_or(var("IMPORT_ACK_WAIT_SECS"), "IMPORT_ACK_WAIT_SECS", 900)?;

        Ok(Self {
            nats_url,
            nats_user: var("NATS_USER"),
            nats_password: var("NATS_PASSWORD"),
            database_url,
            jwt_secret,
            jwt_ttl: Duration::from_secs(jwt_ttl_minutes * 60),
            storage_root: var("STORAGE_ROOT").unwrap_or_else(|| "storage".to_string()).into(),
            storage_disk: var("STORAGE_DISK").unwrap_or_else(|| "local".to_string()),
            import_concurrency,
            import_ack_wait: Duration::from_secs(import_ack_wait_secs),
            resend_api_key: var("RESEND_API_KEY"),
            email_from: var("EMAIL_FROM_ADDRESS")
                .unwrap_or_else(|| "noreply@colaboradores.app".to_string()),
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number (got {:?})", key, raw)),
        None => Ok(default),
    }
}
