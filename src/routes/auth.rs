//! The `auth` route group.
//!
//! Login, registration and token handling are provided by the auth service
//! itself; this module only owns how the group is mounted.

use actix_web::{web, HttpResponse};

use crate::startup::blueprints::Blueprint;

pub const NAME: &str = "auth";
pub const URL_PREFIX: &str = "/auth";

pub fn blueprint() -> Blueprint {
    Blueprint {
        name: NAME,
        url_prefix: URL_PREFIX,
        configure,
    }
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::get().to(auth_status));
}

#[tracing::instrument(name = "Auth status")]
async fn auth_status() -> HttpResponse {
    tracing::debug!("Auth group is mounted");
    HttpResponse::Ok().finish()
}
