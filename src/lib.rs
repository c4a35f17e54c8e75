//! Serve a local directory over HTTP until told to stop on standard input.

pub mod error;
pub mod lifecycle;
pub mod logger;
pub mod server;

pub use error::ServeError;
pub use lifecycle::{Controller, LifecycleState};
pub use server::HttpServer;
pub use server::config::ServerConfig;
