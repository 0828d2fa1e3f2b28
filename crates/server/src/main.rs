use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use nour_server::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "nour-server", about = "Nour: cache in-memory com TTL")]
struct Args {
    /// Arquivo `.properties` com a configuração base
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    init_threads: Option<usize>,
    #[arg(long)]
    max_threads: Option<usize>,
    #[arg(long, value_name = "MS")]
    clear_interval_ms: Option<u64>,
}

impl Args {
    /// Padrões, depois o arquivo, depois as flags.
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(n) = self.init_threads {
            config.init_threads = n;
        }
        if let Some(n) = self.max_threads {
            config.max_threads = n;
        }
        if let Some(ms) = self.clear_interval_ms {
            config.clear_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nour_server=info".into()),
        )
        .init();

    let config = Args::parse().into_config()?;
    let server = Arc::new(Server::new(config)?);
    server.start()?;
    info!("digite 'q' para parar o servidor");

    let mut commands = spawn_stdin_reader();
    let shutdown_signal = wait_for_signal();
    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            line = commands.recv() => match line.as_deref().map(str::trim) {
                Some(cmd) if is_quit_command(cmd) => break,
                Some("") => {}
                Some(other) => warn!("comando desconhecido: {other}"),
                None => {
                    // stdin fechado (ex.: rodando em background): só sinais param
                    (&mut shutdown_signal).await?;
                    break;
                }
            },
            result = &mut shutdown_signal => {
                result?;
                break;
            }
        }
    }

    let handle = Arc::clone(&server);
    tokio::task::spawn_blocking(move || handle.stop()).await?;
    Ok(())
}

fn is_quit_command(line: &str) -> bool {
    matches!(line.to_lowercase().as_str(), "q" | "quit" | "exit")
}

/// Ctrl+C ou, em Unix, SIGTERM.
async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    info!("shutdown signal recebido");
    Ok(())
}

/// Lê o stdin numa thread dedicada; a leitura bloqueante não cancela.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_commands_ignore_case() {
        for cmd in ["q", "Q", "quit", "QUIT", "Exit"] {
            assert!(is_quit_command(cmd), "{cmd}");
        }
        assert!(!is_quit_command("stop"));
        assert!(!is_quit_command(""));
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "nour-server",
            "--port",
            "7001",
            "--max-threads",
            "4",
            "--clear-interval-ms",
            "2000",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.max_threads, 4);
        assert_eq!(config.init_threads, 1);
        assert_eq!(config.clear_interval, Duration::from_millis(2000));
    }
}
