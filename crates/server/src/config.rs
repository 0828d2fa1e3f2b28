use std::fmt;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

use nour_common::{
    ConfigError, DEFAULT_CLEAR_INTERVAL_MS, DEFAULT_HOST, DEFAULT_INIT_THREADS,
    DEFAULT_MAX_THREADS, DEFAULT_PORT, MIN_CLEAR_INTERVAL_MS,
};

pub const KEY_HOST: &str = "server.host";
pub const KEY_PORT: &str = "server.port";
pub const KEY_INIT_THREADS: &str = "server.init.thread.count";
pub const KEY_MAX_THREADS: &str = "server.max.thread.count";
pub const KEY_CLEAR_INTERVAL: &str = "storage.clear.data.interval.ms";

/// Configuração do servidor, já validada quando passa por `Server::new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub init_threads: usize,
    pub max_threads: usize,
    pub clear_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            init_threads: DEFAULT_INIT_THREADS,
            max_threads: DEFAULT_MAX_THREADS,
            clear_interval: Duration::from_millis(DEFAULT_CLEAR_INTERVAL_MS),
        }
    }
}

impl ServerConfig {
    /// Carrega um arquivo `.properties` sobre os valores padrão.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_properties(&text)
    }

    pub fn from_properties(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_properties(text)?;
        Ok(config)
    }

    /// Sobrescreve os campos presentes no texto (`chave=valor`, `#`/`!` comentam a linha).
    pub fn apply_properties(&mut self, text: &str) -> Result<(), ConfigError> {
        for (key, value) in parse_properties(text) {
            match key {
                KEY_HOST => self.host = value.to_string(),
                KEY_PORT => self.port = parse_port(value)?,
                KEY_INIT_THREADS => self.init_threads = parse_thread_count(key, value)?,
                KEY_MAX_THREADS => self.max_threads = parse_thread_count(key, value)?,
                KEY_CLEAR_INTERVAL => self.clear_interval = parse_clear_interval(value)?,
                _ => warn!("propriedade desconhecida ignorada: {key}"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.init_threads < 1 {
            return Err(ConfigError::InvalidThreadCount(KEY_INIT_THREADS.into()));
        }
        if self.max_threads < 1 {
            return Err(ConfigError::InvalidThreadCount(KEY_MAX_THREADS.into()));
        }
        if self.max_threads < self.init_threads {
            return Err(ConfigError::ThreadBounds {
                init: self.init_threads,
                max: self.max_threads,
            });
        }
        if self.clear_interval < Duration::from_millis(MIN_CLEAR_INTERVAL_MS) {
            return Err(ConfigError::ClearIntervalTooShort);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServerConfig: host={}, port={}, init_threads={}, max_threads={}, clear_interval={}ms",
            self.host,
            self.port,
            self.init_threads,
            self.max_threads,
            self.clear_interval.as_millis()
        )
    }
}

fn parse_properties(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let (key, value) = line.split_once(['=', ':'])?;
            Some((key.trim(), value.trim()))
        })
}

fn parse_number(key: &str, value: &str) -> Result<i64, ConfigError> {
    value
        .parse::<i64>()
        .map_err(|_| ConfigError::NotANumber(key.to_string()))
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    let port = parse_number(KEY_PORT, value)?;
    u16::try_from(port).map_err(|_| ConfigError::PortOutOfRange)
}

fn parse_thread_count(key: &str, value: &str) -> Result<usize, ConfigError> {
    let count = parse_number(key, value)?;
    if count < 1 {
        return Err(ConfigError::InvalidThreadCount(key.to_string()));
    }
    usize::try_from(count).map_err(|_| ConfigError::InvalidThreadCount(key.to_string()))
}

fn parse_clear_interval(value: &str) -> Result<Duration, ConfigError> {
    let ms = parse_number(KEY_CLEAR_INTERVAL, value)?;
    if ms < MIN_CLEAR_INTERVAL_MS as i64 {
        return Err(ConfigError::ClearIntervalTooShort);
    }
    Ok(Duration::from_millis(ms as u64))
}
