#![forbid(unsafe_code)]

pub mod config;
mod connection;
pub mod handler;
pub mod pool;
pub mod server;

pub use config::ServerConfig;
pub use connection::Connection;
pub use handler::{execute_command, handle_connection};
pub use pool::{SubmitError, WorkerPool};
pub use server::{Server, State};
