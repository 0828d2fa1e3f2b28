use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// Comandos do protocolo. Códigos desconhecidos são preservados em `Unknown`
/// para que o dispatcher decida o que fazer com eles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Clear,
    Put,
    Get,
    Remove,
    Unknown(u8),
}

impl Command {
    pub fn from_code(code: u8) -> Command {
        match code {
            0 => Command::Clear,
            1 => Command::Put,
            2 => Command::Get,
            3 => Command::Remove,
            other => Command::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Command::Clear => 0,
            Command::Put => 1,
            Command::Get => 2,
            Command::Remove => 3,
            Command::Unknown(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Clear => "CLEAR",
            Command::Put => "PUT",
            Command::Get => "GET",
            Command::Remove => "REMOVE",
            Command::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Status devolvido ao cliente.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Added,
    Replaced,
    Gotten,
    NotFound,
    Removed,
    Cleaned,
}

impl Status {
    pub fn from_code(code: u8) -> Option<Status> {
        match code {
            0 => Some(Status::Added),
            1 => Some(Status::Replaced),
            2 => Some(Status::Gotten),
            3 => Some(Status::NotFound),
            4 => Some(Status::Removed),
            5 => Some(Status::Cleaned),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Status::Added => 0,
            Status::Replaced => 1,
            Status::Gotten => 2,
            Status::NotFound => 3,
            Status::Removed => 4,
            Status::Cleaned => 5,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Added => "ADDED",
            Status::Replaced => "REPLACED",
            Status::Gotten => "GOTTEN",
            Status::NotFound => "NOT_FOUND",
            Status::Removed => "REMOVED",
            Status::Cleaned => "CLEANED",
        };
        f.write_str(name)
    }
}

/// Requisição decodificada. Imutável depois do parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub command: Command,
    pub key: Option<String>,
    pub ttl: Option<Duration>,
    pub payload: Option<Bytes>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            key: None,
            ttl: None,
            payload: None,
        }
    }

    pub fn clear() -> Self {
        Self::new(Command::Clear)
    }

    pub fn put(key: impl Into<String>, payload: impl Into<Bytes>, ttl: Option<Duration>) -> Self {
        Self {
            command: Command::Put,
            key: Some(key.into()),
            ttl,
            payload: Some(payload.into()),
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(Command::Get)
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(Command::Remove)
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.command {
            Command::Unknown(code) => write!(f, "UNKNOWN({code:#x})")?,
            cmd => f.write_str(cmd.name())?,
        }
        if let Some(key) = &self.key {
            write!(f, " [{key}]")?;
        }
        if let Some(ttl) = self.ttl {
            write!(f, " ttl={}ms", ttl.as_millis())?;
        }
        if let Some(payload) = &self.payload {
            write!(f, " {} bytes", payload.len())?;
        }
        Ok(())
    }
}

/// Resposta do servidor. O payload só existe para `Status::Gotten`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub payload: Option<Bytes>,
}

impl Response {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    pub fn gotten(payload: Bytes) -> Self {
        Self {
            status: Status::Gotten,
            payload: Some(payload),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(payload) = &self.payload {
            write!(f, " {} bytes", payload.len())?;
        }
        Ok(())
    }
}
