use once_cell::sync::Lazy;
use tempfile::TempDir;

use std::path::PathBuf;

use bridge_disease::configuration::EnvSnapshot;
use bridge_disease::startup::create_app_with;
use bridge_disease::startup::engine::Engine as WebEngine;
use bridge_disease::startup::prepare::SqlxBinding;
use bridge_disease::telemetry::{get_subscriber, init_subscriber, LoggerFormat, LoggerOutbound};

static TRACING: Lazy<()> = Lazy::new(|| {
    let use_test_log = std::env::var("TEST_LOG").map_or(false, |x| {
        matches!(x.as_str(), "1" | "true" | "yes" | "TRUE")
    });

    let valid_levels = ["info", "error", "trace", "warn", "debug"];
    let level = std::env::var("LOG_LEVEL").ok();
    let log_level = level
        .as_deref()
        .filter(|lvl| valid_levels.contains(lvl))
        .unwrap_or("error");

    let format = LoggerFormat::Pretty;

    let subscriber = if use_test_log {
        get_subscriber(
            log_level.into(),
            format,
            LoggerOutbound::new(std::io::stderr),
            None,
        )
    } else {
        get_subscriber("debug".into(), format, LoggerOutbound::new(std::io::sink), None)
    };
    init_subscriber(subscriber).expect("Failed to set subscriber");
});

pub struct TestApp {
    pub address: String,
    pub log_file: PathBuf,
    pub client: reqwest::Client,
    // Holds the log directory until the test ends
    _workdir: TempDir,
}

impl TestApp {
    pub async fn spawn_server() -> TestApp {
        Lazy::force(&TRACING);
        let listener =
            std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to create listener");
        let port = listener.local_addr().unwrap().port();
        let address = format!("http://127.0.0.1:{}", port);

        let workdir = tempfile::tempdir().expect("Failed to create working directory");
        let env: EnvSnapshot = [
            ("LOG_DIR", workdir.path().join("logs").to_str().unwrap()),
            ("SECRET_KEY", "integration-secret"),
            ("DATABASE_URL", "sqlite::memory:"),
        ]
        .into_iter()
        .collect();

        let app = create_app_with(
            &env,
            &workdir.path().join("configurations"),
            LoggerOutbound::new(std::io::sink),
            &SqlxBinding,
        )
        .expect("Failed to create application");
        let log_file = app.log_session().file_path().to_path_buf();

        let engine = WebEngine::build(app, listener).unwrap();
        tokio::spawn(engine.spinup());

        TestApp {
            address,
            log_file,
            client: reqwest::Client::new(),
            _workdir: workdir,
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to send request")
    }
}
