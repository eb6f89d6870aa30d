pub mod auth;
#[cfg(feature = "postgres-store")]
pub mod db;
pub mod error;
pub mod models;
pub mod nav;
pub mod oauth;
pub mod openapi;
pub mod pages;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod routes;
pub mod security;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
