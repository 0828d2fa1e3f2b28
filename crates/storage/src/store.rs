use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use nour_protocol::Status;

use crate::entry::Item;

/// Handle para o storage in-memory. Clonar compartilha o mesmo mapa.
///
/// Cada operação é atômica por chave; não há atomicidade entre chaves.
#[derive(Clone, Default)]
pub struct Store {
    data: Arc<DashMap<String, Item>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insere ou substitui o item. A substituição ignora a expiração do item anterior.
    pub fn put(&self, key: String, ttl: Option<Duration>, payload: Bytes) -> Status {
        let item = Item::new(key.clone(), ttl, payload);
        match self.data.insert(key, item) {
            Some(_) => Status::Replaced,
            None => Status::Added,
        }
    }

    /// Expiração lazy: nunca devolve um payload vencido, mesmo que o sweep
    /// ainda não tenha passado.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let item = self.data.get(key)?;
        if item.is_expired() {
            return None;
        }
        Some(item.payload.clone())
    }

    /// Remove a entrada sempre que ela existir. Se já estava expirada, a
    /// entrada sai do mapa mas o status reportado é `NotFound`.
    pub fn remove(&self, key: &str) -> Status {
        match self.data.remove(key) {
            Some((_, item)) if !item.is_expired() => Status::Removed,
            _ => Status::NotFound,
        }
    }

    pub fn clear(&self) -> Status {
        self.data.clear();
        Status::Cleaned
    }

    /// Uma passada completa do sweep: remove todo item expirado. O(n).
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.data.retain(|_, item| {
            if item.is_expired_at(now) {
                debug!("item expirado removido: {item}");
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Número de entradas no mapa, incluindo expiradas ainda não purgadas.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
