//! The application factory.
//!
//! [`create_app`] brings the service to a ready state in a fixed order:
//! logging, configuration, route groups, database binding. The first failing
//! step aborts startup and nothing half-built is handed back.

pub mod blueprints;
pub mod engine;
pub mod prepare;

use sqlx::AnyPool;
use tracing_subscriber::fmt::MakeWriter;

use std::path::{Path, PathBuf};

use crate::configuration::{
    self, configuration_directory, ConfigurationError, EnvSnapshot, SecretKeySource, Settings,
};
use crate::routes::auth;
use crate::telemetry::{LogSession, LoggerOutbound, TelemetryError, TelemetrySettings};

use blueprints::{register_blueprints, BlueprintRegistry};
use prepare::{DatabaseBinding, SqlxBinding};

#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error("Failed to prepare logging at {path:?}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Failed to initialize the database binding")]
    Binding(#[source] sqlx::Error),
    #[error(transparent)]
    Telemetry(TelemetryError),
}

impl From<TelemetryError> for StartupError {
    fn from(e: TelemetryError) -> Self {
        match e {
            TelemetryError::Filesystem { path, source } => Self::Filesystem { path, source },
            other => Self::Telemetry(other),
        }
    }
}

/// A fully initialized service, ready to be handed to the [`engine::Engine`].
#[derive(Debug)]
pub struct Application {
    settings: Settings,
    blueprints: BlueprintRegistry,
    db_pool: AnyPool,
    log_session: LogSession,
}

impl Application {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn blueprint_names(&self) -> Vec<&'static str> {
        self.blueprints.names()
    }

    pub fn db_pool(&self) -> &AnyPool {
        &self.db_pool
    }

    pub fn log_session(&self) -> &LogSession {
        &self.log_session
    }
}

/// Build the application from the real process: `.env` + environment,
/// `./configurations`, console logs on stderr.
///
/// Must be called from within a tokio runtime.
pub fn create_app() -> Result<Application, StartupError> {
    let env = EnvSnapshot::load()?;
    let configuration_directory = configuration_directory()?;

    create_app_with(
        &env,
        &configuration_directory,
        LoggerOutbound::new(std::io::stderr),
        &SqlxBinding,
    )
}

pub fn create_app_with<Sink>(
    env: &EnvSnapshot,
    configuration_directory: &Path,
    console: LoggerOutbound<Sink>,
    binding: &impl DatabaseBinding,
) -> Result<Application, StartupError>
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let telemetry = TelemetrySettings::from_env(env);
    let log_session = LogSession::start(&telemetry, console)?;

    let (settings, blueprints, db_pool) = log_session.in_scope(|| -> Result<_, StartupError> {
        tracing::info!(log_file = ?log_session.file_path(), "Logging initialized");
        if let Some(rejected) = &telemetry.rejected_format {
            tracing::warn!(rejected = %rejected, "Unknown LOG_FORMAT, using the line format");
        }

        let settings = configuration::resolve(env, configuration_directory)
            .inspect_err(|e| tracing::error!("Failed to resolve configuration: {e:?}"))?;
        tracing::info!(config = ?settings.redacted(), "Service configuration resolved");
        if settings.secret_key_source == SecretKeySource::Generated {
            tracing::warn!(
                "SECRET_KEY is not set, using a generated key; signed sessions will not survive a restart"
            );
        }

        let mut blueprints = BlueprintRegistry::default();
        register_blueprints(&mut blueprints, [auth::blueprint()])
            .inspect_err(|e| tracing::error!("{e:?}"))?;

        let db_pool = binding
            .init_app(&settings.database)
            .inspect_err(|e| tracing::error!("Failed to bind database: {e:?}"))
            .map_err(StartupError::Binding)?;
        tracing::info!("Database binding initialized");

        tracing::info!("Bridge disease backend is ready");
        Ok((settings, blueprints, db_pool))
    })?;

    Ok(Application {
        settings,
        blueprints,
        db_pool,
        log_session,
    })
}
