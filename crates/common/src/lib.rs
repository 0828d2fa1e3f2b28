#![forbid(unsafe_code)]

mod error;
mod shutdown;

pub use error::*;
pub use shutdown::Shutdown;

pub const DEFAULT_PORT: u16 = 25666;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_INIT_THREADS: usize = 1;
pub const DEFAULT_MAX_THREADS: usize = 10;
pub const DEFAULT_CLEAR_INTERVAL_MS: u64 = 10_000;
pub const MIN_CLEAR_INTERVAL_MS: u64 = 1_000;
pub const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024; // 4 KB
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024; // 64 MB
