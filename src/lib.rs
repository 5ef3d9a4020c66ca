pub mod auth;
pub mod cache;
pub mod error;
pub mod form;
pub mod lockout;
pub mod models;
pub mod mutate;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;
pub mod validate;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
