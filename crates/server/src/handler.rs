use tracing::{debug, error};

use nour_common::{CommandError, ConnectionError, Shutdown};
use nour_protocol::{Command, Request, Response, Status};
use nour_storage::Store;

use crate::Connection;

/// Loop principal de tratamento de uma conexão: lê, despacha, responde.
///
/// O socket é fechado em qualquer caminho de saída.
pub fn handle_connection(
    mut conn: Connection,
    store: &Store,
    shutdown: &Shutdown,
) -> Result<(), ConnectionError> {
    let result = serve_requests(&mut conn, store, shutdown);
    conn.close();
    result
}

fn serve_requests(
    conn: &mut Connection,
    store: &Store,
    shutdown: &Shutdown,
) -> Result<(), ConnectionError> {
    while !shutdown.is_cancelled() {
        let request = match conn.read_request() {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()), // EOF
            Err(e) if e.is_recoverable() => {
                error!("requisição descartada: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };

        match execute_command(&request, store) {
            Ok(response) => {
                conn.write_response(&response)?;
                debug!("comando {request} -> {response}");
            }
            // Indica protocolo divergente entre cliente e servidor
            Err(e) => error!("falha ao tratar requisição {request}: {e}"),
        }
    }
    Ok(())
}

/// Executa uma requisição contra o storage e monta a resposta.
pub fn execute_command(request: &Request, store: &Store) -> Result<Response, CommandError> {
    let response = match request.command {
        Command::Clear => Response::new(store.clear()),
        Command::Put => {
            let key = require_key(request)?;
            let payload = request
                .payload
                .clone()
                .ok_or(CommandError::MissingPayload)?;
            Response::new(store.put(key.to_string(), request.ttl, payload))
        }
        Command::Get => match store.get(require_key(request)?) {
            Some(payload) => Response::gotten(payload),
            None => Response::new(Status::NotFound),
        },
        Command::Remove => Response::new(store.remove(require_key(request)?)),
        Command::Unknown(code) => return Err(CommandError::Unsupported(code)),
    };
    Ok(response)
}

fn require_key(request: &Request) -> Result<&str, CommandError> {
    request
        .key
        .as_deref()
        .ok_or(CommandError::MissingKey(request.command.name()))
}
