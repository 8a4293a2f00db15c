pub mod cli;
pub mod commands;
pub mod config;
pub mod observability;
pub mod services;

pub use config::AppConfig;
pub use services::Services;
