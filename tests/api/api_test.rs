mod auth;
mod health_check;
mod utils;
