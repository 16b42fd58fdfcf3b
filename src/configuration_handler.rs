use crate::configuration::Configuration;
use clap::{ArgAction, Parser};
use std::time::Duration;

/// Service settings, read from the command line with environment (and
/// `.env`) fallbacks.
#[derive(Debug, Clone, Parser)]
#[command(name = "appointment_manager", about = "Professor appointment booking service")]
pub struct ConfigurationHandler {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Without a database URL appointments are kept in memory only.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "DATABASE_POOL_SIZE", default_value_t = 10)]
    database_pool_size: u32,

    /// Upper bound for a single persistence call, in milliseconds.
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 2000)]
    store_timeout_ms: u64,

    #[arg(long, env = "VALIDATE_STUDENTS", default_value_t = true, action = ArgAction::Set)]
    validate_students: bool,
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            tracing::debug!(%err, "No .env file loaded");
        }
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn port(&self) -> u16 {
        self.port
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn database_pool_size(&self) -> u32 {
        self.database_pool_size
    }

    fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    fn validate_students(&self) -> bool {
        self.validate_students
    }
}
