use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use nour_common::{ServerError, Shutdown};
use nour_storage::{Store, spawn_sweeper};

use crate::ServerConfig;
use crate::pool::{SubmitError, WorkerPool};

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Estado do ciclo de vida. `Stopped` é final: não há reinício.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    New,
    Running,
    Stopped,
}

/// Servidor de cache: socket de escuta, pool de workers e sweep de expiração.
pub struct Server {
    inner: Arc<Inner>,
    accept: Mutex<Option<JoinHandle<()>>>,
    local_addr: OnceLock<SocketAddr>,
}

struct Inner {
    config: ServerConfig,
    store: Store,
    shutdown: Shutdown,
    state: Mutex<State>,
    pool: OnceLock<WorkerPool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Valida a configuração. Nada é aberto até `start()`.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store: Store::new(),
                shutdown: Shutdown::new(),
                state: Mutex::new(State::New),
                pool: OnceLock::new(),
                sweeper: Mutex::new(None),
            }),
            accept: Mutex::new(None),
            local_addr: OnceLock::new(),
        })
    }

    pub fn start(&self) -> Result<(), ServerError> {
        let mut state = self.inner.state.lock();
        if *state != State::New {
            return Err(ServerError::AlreadyStarted);
        }

        match self.launch() {
            Ok(addr) => {
                *state = State::Running;
                info!("servidor escutando em {addr} ({})", self.inner.config);
                Ok(())
            }
            Err(e) => {
                *state = State::Stopped;
                drop(state);
                self.inner.destroy();
                Err(e)
            }
        }
    }

    /// Para o servidor. No-op se nunca iniciou ou se já parou.
    ///
    /// Conexões em andamento são abortadas, não drenadas.
    pub fn stop(&self) {
        let was_running = {
            let mut state = self.inner.state.lock();
            let running = *state == State::Running;
            if running {
                *state = State::Stopped;
            }
            running
        };

        if was_running {
            info!("parando servidor");
            self.inner.shutdown.cancel();
            if let Some(addr) = self.local_addr.get() {
                wake_acceptor(*addr);
            }
        }

        // Após falha do listener o resto já parou; falta só o join
        if let Some(handle) = self.accept.lock().take() {
            if handle.join().is_err() {
                error!("thread de accept terminou com pânico");
            }
        }

        if was_running {
            self.inner.destroy();
            info!("servidor parado");
        }
    }

    pub fn state(&self) -> State {
        *self.inner.state.lock()
    }

    /// Endereço efetivamente aberto. `None` antes de `start()`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    fn launch(&self) -> Result<SocketAddr, ServerError> {
        let config = &self.inner.config;
        let addr = config.bind_address();
        let bind_error = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };

        let listener = TcpListener::bind(&addr).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        let _ = self.local_addr.set(local_addr);

        let sweeper = spawn_sweeper(
            self.inner.store.clone(),
            config.clear_interval,
            self.inner.shutdown.clone(),
        )
        .map_err(ServerError::Spawn)?;
        *self.inner.sweeper.lock() = Some(sweeper);

        let pool = WorkerPool::start(
            config.init_threads,
            config.max_threads,
            self.inner.store.clone(),
            self.inner.shutdown.clone(),
        )
        .map_err(ServerError::Spawn)?;
        let _ = self.inner.pool.set(pool);

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("nour-accept".into())
            .spawn(move || run_acceptor(move || listener.accept(), &inner))
            .map_err(ServerError::Spawn)?;
        *self.accept.lock() = Some(handle);

        Ok(local_addr)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    /// Falha fatal do listener: mesmo efeito de `stop()`, a partir da thread de accept.
    fn fail(&self) {
        {
            let mut state = self.state.lock();
            if *state != State::Running {
                return;
            }
            *state = State::Stopped;
        }
        self.destroy();
    }

    /// Cancela tudo, aborta as conexões e espera as threads de fundo.
    fn destroy(&self) {
        self.shutdown.cancel();
        if let Some(pool) = self.pool.get() {
            pool.shutdown();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            if handle.join().is_err() {
                error!("thread de sweep terminou com pânico");
            }
        }
    }
}

/// `accept` é dono do listener, que é fechado uma única vez quando esta função retorna.
fn run_acceptor<A>(mut accept: A, inner: &Inner)
where
    A: FnMut() -> io::Result<(TcpStream, SocketAddr)>,
{
    let Some(pool) = inner.pool.get() else {
        return;
    };

    loop {
        let accepted = accept();
        if inner.shutdown.is_cancelled() {
            break;
        }

        match accepted {
            Ok((stream, addr)) => match pool.submit(stream, addr) {
                Ok(()) => info!("nova conexão: {addr}"),
                Err(SubmitError::Saturated) => debug!("conexão rejeitada, pool saturado: {addr}"),
                Err(e) => error!("falha ao despachar conexão {addr}: {e}"),
            },
            Err(e) => {
                error!("erro fatal no listener: {e}");
                inner.fail();
                break;
            }
        }
    }
    debug!("loop de accept encerrado");
}

/// Desbloqueia o `accept` pendente com uma conexão local descartável.
fn wake_acceptor(mut addr: SocketAddr) {
    if addr.ip().is_unspecified() {
        let loopback = match addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        addr.set_ip(loopback);
    }
    if let Err(e) = TcpStream::connect_timeout(&addr, WAKE_TIMEOUT) {
        // Sem a conexão de despertar, o join da thread de accept não retorna
        warn!("não foi possível acordar o accept em {addr}: {e}");
    }
}
