pub mod app;
pub mod auth_handlers;
pub mod config;
pub mod metrics;
pub mod mfa;
pub mod mfa_handlers;
pub mod password;
pub mod pg_store;
pub mod roles_handlers;
pub mod service;
pub mod store;
pub mod tokens;

pub use app::{build_router, AppState};
