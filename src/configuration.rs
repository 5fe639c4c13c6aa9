use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretBox};

/// Used when `DATABASE_URL` is absent: a file database next to the process.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://bridgedisease.db?mode=rwc";

const SECRET_KEY_BYTES: usize = 32;
const SUPPORTED_DATABASE_SCHEMES: [&str; 5] =
    ["sqlite", "postgres", "postgresql", "mysql", "mariadb"];

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error(transparent)]
    SourceError(#[from] config::ConfigError),
    #[error("Failed to load .env")]
    DotEnv(#[source] dotenvy::Error),
    #[error("Failed to determine the current directory")]
    WorkingDirectory(#[source] std::io::Error),
    #[error("{0}")]
    UnknownEnvironment(String),
    #[error("SECRET_KEY is set but empty")]
    EmptySecretKey,
    #[error("DATABASE_URL is not a supported connection string: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Blueprint `{0}` is already registered")]
    DuplicateBlueprint(String),
}

/// A frozen copy of environment variables.
///
/// Resolution only ever reads from a snapshot, so tests can hand in exactly
/// the variables they care about without touching the process environment.
#[derive(Clone, Default)]
pub struct EnvSnapshot(HashMap<String, String>);

impl EnvSnapshot {
    pub fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    /// Loads `.env` from the working directory (if any) before snapshotting.
    pub fn load() -> Result<Self, ConfigurationError> {
        Self::after_dotenv(dotenvy::dotenv().map(drop))
    }

    /// Like [`EnvSnapshot::load`], with an explicit `.env` path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigurationError> {
        Self::after_dotenv(dotenvy::from_path(path))
    }

    fn after_dotenv(loaded: Result<(), dotenvy::Error>) -> Result<Self, ConfigurationError> {
        match loaded {
            Ok(()) => Ok(Self::from_process()),
            // A missing .env is fine as long as the variables are exported.
            Err(e) if e.not_found() => Ok(Self::from_process()),
            Err(e) => Err(ConfigurationError::DotEnv(e)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn to_source_map(&self) -> config::Map<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for EnvSnapshot
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug)]
pub struct Settings {
    pub application: AppSettings,
    pub database: DatabaseSettings,
    pub secret_key: SecretBox<String>,
    pub secret_key_source: SecretKeySource,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug)]
pub struct DatabaseSettings {
    pub url: SecretBox<String>,
    pub track_modifications: bool,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKeySource {
    /// `SECRET_KEY` or a `secret_key` entry in a config file.
    Configured,
    /// Fresh random key; sessions signed with it do not survive a restart.
    Generated,
}

#[derive(serde::Deserialize)]
struct RawSettings {
    application: AppSettings,
    database: RawDatabaseSettings,
    #[serde(default)]
    secret_key: Option<String>,
}

#[derive(serde::Deserialize)]
struct RawDatabaseSettings {
    url: String,
    max_connections: u32,
}

/// What gets written to the log instead of [`Settings`] itself.
#[derive(Debug)]
pub struct RedactedSettings {
    pub secret_key_configured: bool,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub track_modifications: bool,
    pub max_connections: u32,
    pub secret_key: &'static str,
}

impl Settings {
    pub fn redacted(&self) -> RedactedSettings {
        RedactedSettings {
            secret_key_configured: self.secret_key_source == SecretKeySource::Configured,
            host: self.application.host.clone(),
            port: self.application.port,
            database_url: mask_database_url(self.database.url.expose_secret()),
            track_modifications: self.database.track_modifications,
            max_connections: self.database.max_connections,
            secret_key: "[REDACTED]",
        }
    }
}

/// Replaces the password of a connection string, if it has one.
pub fn mask_database_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                // Only fails for cannot-be-a-base URLs, which carry no password.
                let _ = parsed.set_password(Some("****"));
            }
            parsed.to_string()
        }
        Err(_) => "[UNPARSEABLE]".into(),
    }
}

fn validate_database_url(raw: &str) -> Result<(), ConfigurationError> {
    let parsed =
        url::Url::parse(raw).map_err(|e| ConfigurationError::InvalidDatabaseUrl(e.to_string()))?;

    if !SUPPORTED_DATABASE_SCHEMES.contains(&parsed.scheme()) {
        return Err(ConfigurationError::InvalidDatabaseUrl(format!(
            "unsupported scheme `{}`",
            parsed.scheme()
        )));
    }

    Ok(())
}

fn generate_secret_key() -> String {
    let mut bytes = [0u8; SECRET_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `<cwd>/configurations`, where the optional layered config files live.
pub fn configuration_directory() -> Result<PathBuf, ConfigurationError> {
    let base_path = std::env::current_dir().map_err(ConfigurationError::WorkingDirectory)?;
    Ok(base_path.join("configurations"))
}

/// Resolve the runtime settings from an environment snapshot.
///
/// Sources, lowest precedence first: built-in defaults, `base.*`, `secret.*`,
/// `<APP_ENV>.*`, `APP_`-prefixed variables (`__` for nesting), and finally
/// `SECRET_KEY` / `DATABASE_URL`. All config files are optional.
pub fn resolve(
    env: &EnvSnapshot,
    configuration_directory: &Path,
) -> Result<Settings, ConfigurationError> {
    let environment: Environment = env
        .get("APP_ENV")
        .unwrap_or("local")
        .to_string()
        .try_into()?;

    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")?
        .set_default("application.port", 5000)?
        .set_default("database.url", DEFAULT_DATABASE_URL)?
        .set_default("database.max_connections", 10)?
        .add_source(config::File::from(configuration_directory.join("base")).required(false))
        // Kept out of version control
        .add_source(config::File::from(configuration_directory.join("secret")).required(false))
        .add_source(
            config::File::from(configuration_directory.join(environment.as_str())).required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .source(Some(env.to_source_map())),
        )
        .set_override_option("secret_key", env.get("SECRET_KEY"))?
        .set_override_option("database.url", env.get("DATABASE_URL"))?
        .build()?;

    let raw: RawSettings = settings.try_deserialize()?;

    let (secret_key, secret_key_source) = match raw.secret_key {
        Some(key) if key.is_empty() => return Err(ConfigurationError::EmptySecretKey),
        Some(key) => (key, SecretKeySource::Configured),
        None => (generate_secret_key(), SecretKeySource::Generated),
    };

    validate_database_url(&raw.database.url)?;

    Ok(Settings {
        application: raw.application,
        database: DatabaseSettings {
            url: SecretBox::new(Box::new(raw.database.url)),
            track_modifications: false,
            max_connections: raw.database.max_connections,
        },
        secret_key: SecretBox::new(Box::new(secret_key)),
        secret_key_source,
    })
}

/// The possible runtime environment for our application.
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = ConfigurationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(ConfigurationError::UnknownEnvironment(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_files() -> PathBuf {
        PathBuf::from("/noexist/configurations")
    }

    fn env(vars: &[(&str, &str)]) -> EnvSnapshot {
        vars.iter().copied().collect()
    }

    #[test]
    fn explicit_secret_key_is_used_verbatim() {
        let settings = resolve(&env(&[("SECRET_KEY", "s3cr3t  key")]), &no_files()).unwrap();
        assert_eq!(settings.secret_key.expose_secret(), "s3cr3t  key");
        assert_eq!(settings.secret_key_source, SecretKeySource::Configured);
    }

    #[test]
    fn missing_secret_key_is_generated_fresh_each_time() {
        let first = resolve(&EnvSnapshot::default(), &no_files()).unwrap();
        let second = resolve(&EnvSnapshot::default(), &no_files()).unwrap();

        assert_eq!(first.secret_key_source, SecretKeySource::Generated);
        assert_eq!(first.secret_key.expose_secret().len(), SECRET_KEY_BYTES * 2);
        assert!(first
            .secret_key
            .expose_secret()
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
        assert_ne!(
            first.secret_key.expose_secret(),
            second.secret_key.expose_secret()
        );
    }

    #[test]
    fn empty_secret_key_is_rejected() {
        let result = resolve(&env(&[("SECRET_KEY", "")]), &no_files());
        assert!(matches!(result, Err(ConfigurationError::EmptySecretKey)));
    }

    #[test]
    fn missing_database_url_falls_back_to_local_file() {
        let settings = resolve(&EnvSnapshot::default(), &no_files()).unwrap();
        assert_eq!(settings.database.url.expose_secret(), DEFAULT_DATABASE_URL);
        assert!(!settings.database.track_modifications);
    }

    #[test]
    fn database_url_is_kept_unmodified() {
        let settings =
            resolve(&env(&[("DATABASE_URL", "postgres://u:p@h/db")]), &no_files()).unwrap();
        assert_eq!(settings.database.url.expose_secret(), "postgres://u:p@h/db");
    }

    #[test]
    fn malformed_database_url_is_a_configuration_error() {
        for bad in ["not a url", "redis://localhost:6379"] {
            let result = resolve(&env(&[("DATABASE_URL", bad)]), &no_files());
            assert!(
                matches!(result, Err(ConfigurationError::InvalidDatabaseUrl(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn resolving_twice_with_pinned_key_is_stable() {
        let vars = env(&[("SECRET_KEY", "pinned"), ("DATABASE_URL", "mysql://a:b@c/d")]);
        let first = resolve(&vars, &no_files()).unwrap();
        let second = resolve(&vars, &no_files()).unwrap();

        assert_eq!(
            first.secret_key.expose_secret(),
            second.secret_key.expose_secret()
        );
        assert_eq!(
            first.database.url.expose_secret(),
            second.database.url.expose_secret()
        );
        assert_eq!(first.application.port, second.application.port);
    }

    #[test]
    fn prefixed_variables_override_application_settings() {
        let settings = resolve(
            &env(&[("APP_APPLICATION__PORT", "8080"), ("APP_APPLICATION__HOST", "0.0.0.0")]),
            &no_files(),
        )
        .unwrap();
        assert_eq!(settings.application.port, 8080);
        assert_eq!(settings.application.host, "0.0.0.0");
    }

    #[test]
    fn environment_files_are_layered_over_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "application:\n  port: 7000\ndatabase:\n  max_connections: 3\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("production.yaml"), "application:\n  port: 7001\n").unwrap();

        let local = resolve(&EnvSnapshot::default(), dir.path()).unwrap();
        assert_eq!(local.application.port, 7000);
        assert_eq!(local.database.max_connections, 3);

        let production = resolve(&env(&[("APP_ENV", "production")]), dir.path()).unwrap();
        assert_eq!(production.application.port, 7001);
    }

    #[test]
    fn secret_file_key_counts_as_configured() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.yaml"), "secret_key: from-file\n").unwrap();

        let from_file = resolve(&EnvSnapshot::default(), dir.path()).unwrap();
        assert_eq!(from_file.secret_key.expose_secret(), "from-file");
        assert_eq!(from_file.secret_key_source, SecretKeySource::Configured);

        let from_env = resolve(&env(&[("SECRET_KEY", "from-env")]), dir.path()).unwrap();
        assert_eq!(from_env.secret_key.expose_secret(), "from-env");
    }

    #[test]
    fn broken_dotenv_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "BRIDGE_DOTENV_FIRST=ok\nTHIS LINE IS BROKEN'\nBRIDGE_DOTENV_LATER=later\n",
        )
        .unwrap();

        let result = EnvSnapshot::load_from(&path);
        assert!(matches!(result, Err(ConfigurationError::DotEnv(_))));
    }

    #[test]
    fn missing_dotenv_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = EnvSnapshot::load_from(&dir.path().join(".env")).unwrap();
        assert!(snapshot.get("BRIDGE_DOTENV_NEVER_SET").is_none());
    }

    #[test]
    fn dotenv_values_reach_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "BRIDGE_DOTENV_LOADED=from-dotenv\n").unwrap();

        let snapshot = EnvSnapshot::load_from(&path).unwrap();
        assert_eq!(snapshot.get("BRIDGE_DOTENV_LOADED"), Some("from-dotenv"));
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let result = resolve(&env(&[("APP_ENV", "staging")]), &no_files());
        assert!(matches!(result, Err(ConfigurationError::UnknownEnvironment(_))));
    }

    #[test]
    fn redacted_view_hides_secrets() {
        let settings = resolve(
            &env(&[("SECRET_KEY", "hunter2"), ("DATABASE_URL", "postgres://u:p@h/db")]),
            &no_files(),
        )
        .unwrap();

        let printed = format!("{:?}", settings.redacted());
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains(":p@"));
        assert!(printed.contains("postgres://u:****@h/db"));

        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
