use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Item armazenado: payload + instante absoluto de expiração opcional.
#[derive(Debug, Clone)]
pub struct Item {
    pub key: String,
    pub payload: Bytes,
    pub expires_at: Option<Instant>,
}

impl Item {
    /// O TTL é convertido em instante absoluto uma única vez, na inserção.
    /// Um TTL além do representável equivale a nunca expirar.
    pub fn new(key: String, ttl: Option<Duration>, payload: Bytes) -> Self {
        Self {
            key,
            payload,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]={} bytes", self.key, self.payload.len())?;
        if let Some(at) = self.expires_at {
            let left = at.saturating_duration_since(Instant::now());
            write!(f, " (expira em {}ms)", left.as_millis())?;
        }
        Ok(())
    }
}
