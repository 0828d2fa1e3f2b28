/// Erros do codec binário do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame incompleto")]
    Incomplete,
    #[error("versão de protocolo não suportada: {0:#x}")]
    UnsupportedVersion(u8),
    #[error("flags inválidas: {0:#010b}")]
    InvalidFlags(u8),
    #[error("chave excede tamanho máximo ({0} bytes)")]
    KeyTooLong(usize),
    #[error("payload excede tamanho máximo ({0} bytes)")]
    PayloadTooLarge(usize),
    #[error("encoding inválido: {0}")]
    InvalidEncoding(String),
    #[error("status desconhecido: {0:#x}")]
    UnknownStatus(u8),
}

/// Erros de uma requisição isolada. Não derrubam a conexão.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("comando não suportado: {0:#x}")]
    Unsupported(u8),
    #[error("chave ausente para {0}")]
    MissingKey(&'static str),
    #[error("payload ausente para PUT")]
    MissingPayload,
}

/// Erros de conexão TCP.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("conexão resetada pelo peer")]
    ConnectionReset,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocolo inválido: {0}")]
    Protocol(ProtocolError),
    #[error("requisição malformada: {0}")]
    MalformedRequest(ProtocolError),
}

impl ConnectionError {
    /// `true` quando o frame inteiro foi consumido e o stream continua alinhado.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ConnectionError::MalformedRequest(_))
    }
}

/// Erros de configuração. Fatais: o servidor não chega a abrir o socket.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} deve ser um número")]
    NotANumber(String),
    #[error("server.port deve estar entre 0 e 65535")]
    PortOutOfRange,
    #[error("{0} deve ser >= 1")]
    InvalidThreadCount(String),
    #[error(
        "server.max.thread.count ({max}) deve ser >= server.init.thread.count ({init})"
    )]
    ThreadBounds { init: usize, max: usize },
    #[error("storage.clear.data.interval.ms deve ser >= 1000 ms")]
    ClearIntervalTooShort,
    #[error("não foi possível ler {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Erros do ciclo de vida do servidor.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("servidor já foi iniciado")]
    AlreadyStarted,
    #[error("não foi possível abrir socket em {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("falha ao criar thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::Incomplete;
        assert_eq!(err.to_string(), "frame incompleto");
    }

    #[test]
    fn command_error_display() {
        let err = CommandError::MissingKey("GET");
        assert_eq!(err.to_string(), "chave ausente para GET");
        let err = CommandError::Unsupported(0x7f);
        assert_eq!(err.to_string(), "comando não suportado: 0x7f");
    }

    #[test]
    fn connection_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken");
        let err: ConnectionError = io_err.into();
        assert!(matches!(err, ConnectionError::Io(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn only_malformed_request_is_recoverable() {
        let malformed = ConnectionError::MalformedRequest(ProtocolError::InvalidEncoding(
            "utf-8".into(),
        ));
        assert!(malformed.is_recoverable());
        assert!(!ConnectionError::Protocol(ProtocolError::UnsupportedVersion(2)).is_recoverable());
        assert!(!ConnectionError::ConnectionReset.is_recoverable());
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::ThreadBounds { init: 4, max: 2 };
        assert_eq!(
            err.to_string(),
            "server.max.thread.count (2) deve ser >= server.init.thread.count (4)"
        );
        assert_eq!(
            ConfigError::ClearIntervalTooShort.to_string(),
            "storage.clear.data.interval.ms deve ser >= 1000 ms"
        );
    }

    #[test]
    fn server_error_from_config() {
        let err: ServerError = ConfigError::PortOutOfRange.into();
        assert!(matches!(
            err,
            ServerError::Config(ConfigError::PortOutOfRange)
        ));
        assert_eq!(err.to_string(), "server.port deve estar entre 0 e 65535");
    }
}
