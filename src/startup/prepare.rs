use secrecy::ExposeSecret;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;

use std::net::TcpListener;

use crate::configuration::{mask_database_url, DatabaseSettings, Settings};

/// Connects the persistence layer to the application.
///
/// The ORM side (models, migrations, queries) lives behind this seam; the
/// factory only needs a pool back or an error to abort startup with.
pub trait DatabaseBinding {
    fn init_app(&self, settings: &DatabaseSettings) -> Result<AnyPool, sqlx::Error>;
}

/// Binds through sqlx's runtime-selected `Any` driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxBinding;

impl DatabaseBinding for SqlxBinding {
    fn init_app(&self, settings: &DatabaseSettings) -> Result<AnyPool, sqlx::Error> {
        prepare_db_pool(settings)
    }
}

pub fn prepare_listener(config: &Settings) -> Result<TcpListener, std::io::Error> {
    let address = format!("{}:{}", config.application.host, config.application.port);
    TcpListener::bind(address)
}

/// The pool connects lazily, so an unreachable server is reported on first use
/// rather than at startup.
pub fn prepare_db_pool(settings: &DatabaseSettings) -> Result<AnyPool, sqlx::Error> {
    install_default_drivers();

    tracing::debug!(
        database = %mask_database_url(settings.url.expose_secret()),
        track_modifications = settings.track_modifications,
        max_connections = settings.max_connections,
        "Preparing database pool"
    );

    AnyPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy(settings.url.expose_secret())
}
