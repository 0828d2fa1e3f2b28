use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Token de cancelamento compartilhado entre as threads do servidor.
///
/// Clonar o token compartilha o mesmo estado. `cancel()` é definitivo e
/// acorda quem estiver bloqueado em `wait_timeout`.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Dorme até `timeout` ou até o cancelamento. Retorna `true` se cancelado.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        if !*cancelled {
            // Spurious wakeups: wait_while_for revalida o predicado
            self.inner
                .cond
                .wait_while_for(&mut cancelled, |c| !*c, timeout);
        }
        *cancelled
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
