use crate::{
    configuration::Configuration, configuration_handler::ConfigurationHandler,
    database_interface::DatabaseInterface, http::create_app, local_scheduling::LocalScheduling,
};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod backend;
mod configuration;
mod configuration_handler;
mod database_interface;
mod engine;
#[cfg(test)]
mod engine_proptest;
mod error;
mod http;
mod ledger;
mod local_scheduling;
mod principal;
mod schema;
mod slot_set;
#[cfg(test)]
mod testutils;
mod types;

const DATABASE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let configuration = ConfigurationHandler::parse_arguments();
    let app = match configuration.database_url() {
        Some(database_url) => {
            let database_interface = loop {
                match DatabaseInterface::new(
                    &database_url,
                    configuration.database_pool_size(),
                    configuration.store_timeout(),
                ) {
                    Ok(database_interface) => break database_interface,
                    Err(err) => {
                        error!(%err, "Failed to connect to database, retrying");
                        tokio::time::sleep(DATABASE_RETRY_INTERVAL).await;
                    }
                }
            };
            info!("Connected to database");
            create_app(database_interface, configuration.clone())
        }
        None => {
            warn!("No database configured, appointments are kept in memory");
            create_app(LocalScheduling::default(), configuration.clone())
        }
    };

    let address = format!("0.0.0.0:{}", configuration.port());
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %address, "Failed to bind listener");
            std::process::exit(1);
        }
    };
    info!(%address, "Listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(%err, "Server terminated with error");
        std::process::exit(1);
    }
    info!("Server shut down");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
