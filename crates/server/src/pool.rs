use std::io;
use std::net::{Shutdown as SocketShutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use nour_common::Shutdown;
use nour_storage::Store;

use crate::{Connection, handle_connection};

/// Tempo que um worker acima do núcleo espera por trabalho antes de sair.
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Motivo de uma conexão não ter sido aceita pelo pool. O socket já foi fechado.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("pool saturado")]
    Saturated,
    #[error("pool encerrado")]
    Closed,
    #[error("falha ao criar worker: {0}")]
    Spawn(#[source] io::Error),
}

struct Job {
    stream: TcpStream,
    addr: SocketAddr,
}

impl Job {
    fn reject(self) {
        let _ = self.stream.shutdown(SocketShutdown::Both);
    }
}

struct PoolShared {
    store: Store,
    shutdown: Shutdown,
    /// Sockets em atendimento, para o shutdown forçado.
    active: DashMap<u64, TcpStream>,
    next_conn_id: AtomicU64,
    next_worker_id: AtomicUsize,
    live: AtomicUsize,
    max: usize,
    keep_alive: Duration,
}

/// Pool de threads entre `core` e `max` workers, com hand-off de capacidade zero.
///
/// Uma conexão só entra se algum worker estiver ocioso ou se ainda houver
/// espaço para criar um novo; nunca fica em fila.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Cria o pool e já inicia os `core` workers permanentes.
    pub fn start(core: usize, max: usize, store: Store, shutdown: Shutdown) -> io::Result<Self> {
        Self::with_keep_alive(core, max, KEEP_ALIVE, store, shutdown)
    }

    pub(crate) fn with_keep_alive(
        core: usize,
        max: usize,
        keep_alive: Duration,
        store: Store,
        shutdown: Shutdown,
    ) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        let pool = Self {
            shared: Arc::new(PoolShared {
                store,
                shutdown,
                active: DashMap::new(),
                next_conn_id: AtomicU64::new(0),
                next_worker_id: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                max: max.max(core),
                keep_alive,
            }),
            sender: Mutex::new(Some(sender)),
            receiver,
            handles: Mutex::new(Vec::with_capacity(max)),
        };

        for _ in 0..core {
            pool.shared.live.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = pool.spawn_worker(None, true) {
                pool.shutdown();
                return Err(e);
            }
        }
        debug!("pool iniciado: {core} workers permanentes, máximo {max}");
        Ok(pool)
    }

    /// Entrega a conexão a um worker ocioso ou a um worker novo.
    ///
    /// Sem capacidade livre a conexão é rejeitada e o socket fechado na hora.
    pub fn submit(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), SubmitError> {
        let job = Job { stream, addr };
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            job.reject();
            return Err(SubmitError::Closed);
        };

        let job = match tx.try_send(job) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(job)) => job,
            Err(TrySendError::Disconnected(job)) => {
                job.reject();
                return Err(SubmitError::Closed);
            }
        };

        if !self.reserve_worker() {
            job.reject();
            return Err(SubmitError::Saturated);
        }
        // Com o lock do sender, shutdown() não perde este handle
        self.spawn_worker(Some(job), false)
            .map_err(SubmitError::Spawn)
    }

    /// Fecha o pool: workers ociosos saem, conexões ativas são abortadas.
    ///
    /// Bloqueia até todos os workers terminarem. Chamadas repetidas são no-op.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        drop(self.sender.lock().take());

        for entry in self.shared.active.iter() {
            let _ = entry.value().shutdown(SocketShutdown::Both);
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("worker terminou com pânico");
            }
        }
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn active_connections(&self) -> usize {
        self.shared.active.len()
    }

    fn reserve_worker(&self) -> bool {
        self.shared
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.shared.max).then_some(live + 1)
            })
            .is_ok()
    }

    /// O slot em `live` já foi reservado pelo chamador; é liberado em caso de falha.
    fn spawn_worker(&self, first: Option<Job>, core: bool) -> io::Result<()> {
        let id = self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        let receiver = self.receiver.clone();

        let spawned = thread::Builder::new()
            .name(format!("nour-worker-{id}"))
            .spawn(move || {
                let _slot = WorkerSlot(&shared.live);
                run_worker(&shared, &receiver, first, core);
            });

        match spawned {
            Ok(handle) => {
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                Ok(())
            }
            Err(e) => {
                // Closure descartada: o job (e o socket) já foram fechados
                self.shared.live.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

/// Libera a vaga do worker mesmo se a thread terminar com pânico.
struct WorkerSlot<'a>(&'a AtomicUsize);

impl Drop for WorkerSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_worker(shared: &PoolShared, receiver: &Receiver<Job>, first: Option<Job>, core: bool) {
    if let Some(job) = first {
        shared.serve(job);
    }

    loop {
        let job = if core {
            match receiver.recv() {
                Ok(job) => job,
                Err(_) => break,
            }
        } else {
            match receiver.recv_timeout(shared.keep_alive) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("worker ocioso encerrado após keep-alive");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };
        shared.serve(job);
    }
}

impl PoolShared {
    fn serve(&self, job: Job) {
        let Job { stream, addr } = job;
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        match stream.try_clone() {
            Ok(handle) => {
                self.active.insert(id, handle);
            }
            Err(e) => {
                error!("falha ao registrar conexão {addr}: {e}");
                let _ = stream.shutdown(SocketShutdown::Both);
                return;
            }
        }

        // Registrado antes do teste: ou o shutdown vê o socket, ou vemos o cancelamento
        if self.shutdown.is_cancelled() {
            let _ = stream.shutdown(SocketShutdown::Both);
            self.active.remove(&id);
            return;
        }

        match handle_connection(Connection::new(stream), &self.store, &self.shutdown) {
            Ok(()) => info!("conexão encerrada: {addr}"),
            Err(e) if self.shutdown.is_cancelled() => debug!("conexão {addr} abortada: {e}"),
            Err(e) => error!("erro na conexão {addr}: {e}"),
        }
        self.active.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use nour_protocol::{Request, Response, Status};
    use std::io::{Cursor, Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    /// Aceita uma conexão de teste e devolve (cliente, socket aceito, endereço do peer).
    fn accept_one(listener: &TcpListener) -> (TcpStream, TcpStream, SocketAddr) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, addr) = listener.accept().unwrap();
        (client, server, addr)
    }

    fn roundtrip(client: &mut TcpStream, request: &Request) -> Response {
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        client.write_all(&buf).unwrap();

        let mut received = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = client.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed before response");
            received.extend_from_slice(&chunk[..n]);
            let mut cursor = Cursor::new(&received[..]);
            if Response::check(&mut cursor).is_ok() {
                cursor.set_position(0);
                return Response::parse(&mut cursor).unwrap();
            }
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn start_spawns_core_workers() {
        let pool = WorkerPool::start(3, 5, Store::new(), Shutdown::new()).unwrap();
        assert_eq!(pool.live_workers(), 3);
        pool.shutdown();
        assert_eq!(pool.live_workers(), 0);
    }

    #[test]
    fn idle_worker_serves_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = WorkerPool::start(1, 1, Store::new(), Shutdown::new()).unwrap();

        // Até o worker permanente chegar ao recv, o pool está saturado
        let mut accepted = None;
        assert!(wait_until(|| {
            let (client, server, addr) = accept_one(&listener);
            match pool.submit(server, addr) {
                Ok(()) => {
                    accepted = Some(client);
                    true
                }
                Err(SubmitError::Saturated) => false,
                Err(e) => panic!("unexpected submit error: {e}"),
            }
        }));
        let mut client = accepted.unwrap();
        assert_eq!(pool.live_workers(), 1);

        let response = roundtrip(&mut client, &Request::put("k", vec![1u8], None));
        assert_eq!(response, Response::new(Status::Added));
        assert_eq!(pool.active_connections(), 1);

        drop(client);
        assert!(wait_until(|| pool.active_connections() == 0));
        pool.shutdown();
    }

    #[test]
    fn grows_up_to_max_then_rejects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = WorkerPool::start(0, 2, Store::new(), Shutdown::new()).unwrap();

        let (mut c1, s1, a1) = accept_one(&listener);
        let (mut c2, s2, a2) = accept_one(&listener);
        pool.submit(s1, a1).unwrap();
        pool.submit(s2, a2).unwrap();
        assert_eq!(pool.live_workers(), 2);

        let (mut c3, s3, a3) = accept_one(&listener);
        assert!(matches!(pool.submit(s3, a3), Err(SubmitError::Saturated)));

        // Rejeitado: fechado sem atendimento
        let mut buf = [0u8; 1];
        assert!(matches!(c3.read(&mut buf), Ok(0) | Err(_)));

        // Os dois primeiros continuam atendidos
        assert_eq!(
            roundtrip(&mut c1, &Request::get("x")),
            Response::new(Status::NotFound)
        );
        assert_eq!(
            roundtrip(&mut c2, &Request::clear()),
            Response::new(Status::Cleaned)
        );
        pool.shutdown();
    }

    #[test]
    fn extra_worker_exits_after_keep_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = WorkerPool::with_keep_alive(
            0,
            1,
            Duration::from_millis(50),
            Store::new(),
            Shutdown::new(),
        )
        .unwrap();

        let (client, server, addr) = accept_one(&listener);
        pool.submit(server, addr).unwrap();
        drop(client);

        assert!(wait_until(|| pool.live_workers() == 0));
        pool.shutdown();
    }

    #[test]
    fn shutdown_aborts_active_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = WorkerPool::start(0, 1, Store::new(), Shutdown::new()).unwrap();

        let (mut client, server, addr) = accept_one(&listener);
        pool.submit(server, addr).unwrap();
        assert!(wait_until(|| pool.active_connections() == 1));

        let start = Instant::now();
        pool.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(pool.live_workers(), 0);

        let mut buf = [0u8; 1];
        assert!(matches!(client.read(&mut buf), Ok(0) | Err(_)));
    }

    #[test]
    fn submit_after_shutdown_is_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = WorkerPool::start(1, 2, Store::new(), Shutdown::new()).unwrap();
        pool.shutdown();
        pool.shutdown();

        let (_client, server, addr) = accept_one(&listener);
        assert!(matches!(pool.submit(server, addr), Err(SubmitError::Closed)));
    }
}
