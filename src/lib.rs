pub mod config;
pub mod error;
pub mod logbuf;
pub mod models;
pub mod openapi;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod store;
pub mod totp;

// Re-export commonly used items for tests / external users
pub use routes::AppState;
