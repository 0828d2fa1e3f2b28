use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, bail};
use bytes::BytesMut;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use nour_common::DEFAULT_PORT;
use nour_protocol::{Request, Response, Status};

#[derive(Parser, Debug)]
#[command(name = "nour-cli", about = "Cliente do Nour")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Comando para executar diretamente (modo não interativo)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let mut stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("não foi possível conectar em {addr}"))?;

    // Modo comando único (via argumentos)
    if !args.command.is_empty() {
        let request = build_request(&args.command)?;
        let response = execute_request(&mut stream, &request).await?;
        println!("{}", format_response(&response));
        return Ok(());
    }

    println!("Conectado a {addr}");

    let stdin = io::stdin();
    let mut input = String::new();

    loop {
        print!("nour> ");
        io::stdout().flush()?;

        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        let request = match build_request(&tokenize(line)) {
            Ok(request) => request,
            Err(e) => {
                println!("(error) {e}");
                continue;
            }
        };

        match execute_request(&mut stream, &request).await {
            Ok(response) => println!("{}", format_response(&response)),
            Err(e) => {
                // Servidor fechou (ex.: pool saturado): não há como continuar
                println!("(error) {e}");
                break;
            }
        }
    }

    Ok(())
}

async fn execute_request(stream: &mut TcpStream, request: &Request) -> anyhow::Result<Response> {
    let mut buf = BytesMut::new();
    request.encode(&mut buf)?;

    stream.write_all(&buf).await?;
    stream.flush().await?;

    // Ler resposta
    let mut response_buf = BytesMut::with_capacity(4096);
    loop {
        let n = stream.read_buf(&mut response_buf).await?;
        if n == 0 {
            bail!("servidor fechou a conexão");
        }

        let mut cursor = std::io::Cursor::new(&response_buf[..]);
        if Response::check(&mut cursor).is_ok() {
            cursor.set_position(0);
            return Ok(Response::parse(&mut cursor)?);
        }
    }
}

/// Monta a requisição a partir dos tokens: `put <key> <value> [ttl_ms]`,
/// `get <key>`, `remove <key>` ou `clear`.
fn build_request(tokens: &[String]) -> anyhow::Result<Request> {
    let Some((command, args)) = tokens.split_first() else {
        bail!("comando vazio");
    };

    let request = match (command.to_ascii_lowercase().as_str(), args) {
        ("put", [key, value]) => Request::put(key.as_str(), value.clone().into_bytes(), None),
        ("put", [key, value, ttl]) => {
            let ms: u64 = ttl
                .parse()
                .with_context(|| format!("ttl inválido: '{ttl}'"))?;
            Request::put(
                key.as_str(),
                value.clone().into_bytes(),
                Some(Duration::from_millis(ms)),
            )
        }
        ("get", [key]) => Request::get(key.as_str()),
        ("remove" | "del", [key]) => Request::remove(key.as_str()),
        ("clear", []) => Request::clear(),
        ("put" | "get" | "remove" | "del" | "clear", _) => {
            bail!("número de argumentos inválido para '{command}'")
        }
        _ => bail!("comando desconhecido: '{command}'"),
    };
    Ok(request)
}

/// Tokeniza a linha de input com suporte a strings quoted.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut quote_char = '"';
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quote {
            if c == quote_char {
                in_quote = false;
            } else if c == '\\' {
                match chars.peek() {
                    Some(&next) if matches!(next, '\\' | '"' | '\'') => {
                        current.push(next);
                        chars.next();
                    }
                    Some('n') => {
                        current.push('\n');
                        chars.next();
                    }
                    Some('t') => {
                        current.push('\t');
                        chars.next();
                    }
                    _ => current.push(c),
                }
            } else {
                current.push(c);
            }
        } else if c == '"' || c == '\'' {
            in_quote = true;
            quote_char = c;
        } else if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Formata uma resposta para exibição humana.
fn format_response(response: &Response) -> String {
    match (&response.status, &response.payload) {
        (Status::Gotten, Some(data)) => match std::str::from_utf8(data) {
            Ok(s) => format!("\"{s}\""),
            Err(_) => format!("(binary) {} bytes", data.len()),
        },
        (Status::NotFound, _) => "(nil)".to_string(),
        (status, _) => format!("({status})"),
    }
}
