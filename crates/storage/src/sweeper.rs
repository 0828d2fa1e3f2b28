use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use nour_common::Shutdown;

use crate::Store;

/// Inicia a thread de sweep que purga itens expirados a cada `interval`.
///
/// A espera entre ciclos é o único ponto de suspensão: cancelar o `shutdown`
/// acorda a thread, que termina sem completar outro ciclo.
pub fn spawn_sweeper(
    store: Store,
    interval: Duration,
    shutdown: Shutdown,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("nour-sweeper".into())
        .spawn(move || run_sweeper(&store, interval, &shutdown))
}

fn run_sweeper(store: &Store, interval: Duration, shutdown: &Shutdown) {
    debug!("sweeper iniciado com intervalo de {}ms", interval.as_millis());
    while !shutdown.is_cancelled() {
        let removed = store.purge_expired();
        trace!("ciclo de sweep: {removed} itens removidos");

        if shutdown.wait_timeout(interval) {
            break;
        }
    }
    debug!("sweeper encerrado");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Instant;

    #[test]
    fn sweeper_reclaims_expired_items() {
        let store = Store::new();
        let shutdown = Shutdown::new();
        store.put("short".into(), Some(Duration::from_millis(20)), Bytes::from("x"));
        store.put("long".into(), None, Bytes::from("y"));

        let tick = Duration::from_millis(25);
        let handle = spawn_sweeper(store.clone(), tick, shutdown.clone()).unwrap();

        // Sem nenhum get: apenas o sweep pode remover a chave
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.len() > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("long"), Some(Bytes::from("y")));

        shutdown.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn cancel_interrupts_sleep() {
        let shutdown = Shutdown::new();
        let hour = Duration::from_secs(3600);
        let handle = spawn_sweeper(Store::new(), hour, shutdown.clone()).unwrap();

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        shutdown.cancel();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cancelled_before_start_exits_immediately() {
        let shutdown = Shutdown::new();
        shutdown.cancel();
        let hour = Duration::from_secs(3600);
        let handle = spawn_sweeper(Store::new(), hour, shutdown).unwrap();
        handle.join().unwrap();
    }
}
