pub mod api;
pub mod config;
pub mod error;
pub mod host;
pub mod scheduler;
pub mod server;
pub mod sim;
