pub mod app;
pub mod audit;
pub mod authz;
pub mod call;
pub mod config;
pub mod db;
pub mod docs;
pub mod errors;
pub mod jwt;
pub mod models;
pub mod operations;
pub mod pipeline;
pub mod relay;
pub mod routes;
pub mod utils;

// Re-export commonly used items for tests
pub use app::{create_app, AppState};
