use actix_web::dev::Server;
use actix_web::middleware::{self, TrailingSlash};
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use tracing_actix_web::TracingLogger;

use std::net::TcpListener;

use crate::routes::*;
use crate::telemetry::LogSession;

use super::Application;

pub struct Engine {
    web_server: Server,
    // Keeps the log file writer alive for as long as requests are served.
    _log_session: LogSession,
}

impl Engine {
    pub fn build(app: Application, listener: TcpListener) -> Result<Self> {
        let Application {
            blueprints,
            db_pool,
            log_session,
            ..
        } = app;

        let db_pool = web::Data::new(db_pool);

        let server = HttpServer::new(move || {
            App::new()
                .wrap(TracingLogger::default())
                .wrap(middleware::NormalizePath::new(TrailingSlash::Trim))
                .route("/health_check", web::get().to(health_check))
                .configure(|cfg| blueprints.mount(cfg))
                .app_data(db_pool.clone())
        })
        .listen(listener)?
        .run();

        Ok(Self {
            web_server: server,
            _log_session: log_session,
        })
    }

    pub async fn spinup(self) -> Result<(), std::io::Error> {
        self.web_server.await
    }
}
