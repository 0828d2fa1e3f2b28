use bytes::{Buf, BytesMut};
use std::io::{self, Cursor, Read, Write};
use std::net::{Shutdown, TcpStream};

use tracing::debug;

use nour_common::{ConnectionError, INITIAL_BUFFER_CAPACITY, ProtocolError};
use nour_protocol::{Request, Response};

/// Wrapper bloqueante sobre TcpStream com buffer para leitura/escrita de frames.
pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Lê uma requisição completa do stream. Retorna None no EOF.
    ///
    /// EOF no meio de um frame é `ConnectionReset`; um frame completo mas
    /// inválido é `MalformedRequest` e já foi descartado do buffer.
    pub fn read_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        loop {
            if let Some(request) = self.parse_request()? {
                return Ok(Some(request));
            }

            let filled = self.buffer.len();
            self.buffer.resize(filled + INITIAL_BUFFER_CAPACITY, 0);
            let n = match self.stream.read(&mut self.buffer[filled..]) {
                Ok(n) => n,
                Err(e) => {
                    self.buffer.truncate(filled);
                    if e.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(e.into());
                }
            };
            self.buffer.truncate(filled + n);

            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::ConnectionReset);
            }
        }
    }

    /// Escreve uma resposta e faz flush antes de retornar.
    pub fn write_response(&mut self, response: &Response) -> Result<(), ConnectionError> {
        let mut buf = BytesMut::new();
        response
            .encode(&mut buf)
            .map_err(ConnectionError::Protocol)?;
        self.stream.write_all(&buf)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Fecha o socket nos dois sentidos. Um socket já fechado não é erro.
    pub fn close(&self) {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => debug!("erro ao fechar socket: {e}"),
        }
    }

    fn parse_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        let mut cursor = Cursor::new(&self.buffer[..]);

        match Request::check(&mut cursor) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let parsed = Request::parse(&mut cursor);
                self.buffer.advance(len);
                parsed.map(Some).map_err(ConnectionError::MalformedRequest)
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(ConnectionError::Protocol(e)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    /// Par de sockets conectados: (cliente, servidor).
    pub(crate) fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    pub(crate) fn encode(request: &Request) -> BytesMut {
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn reads_request_split_across_writes() {
        let (mut client, server) = socket_pair();
        let mut conn = Connection::new(server);

        let data = encode(&Request::put("foo", vec![1u8, 2, 3], None));
        let (head, tail) = data.split_at(4);
        let head = head.to_vec();
        let tail = tail.to_vec();
        let writer = thread::spawn(move || {
            client.write_all(&head).unwrap();
            thread::sleep(Duration::from_millis(20));
            client.write_all(&tail).unwrap();
            client
        });

        let request = conn.read_request().unwrap().unwrap();
        assert_eq!(request, Request::put("foo", vec![1u8, 2, 3], None));
        drop(writer.join().unwrap());
    }

    #[test]
    fn reads_back_to_back_requests() {
        let (mut client, server) = socket_pair();
        let mut conn = Connection::new(server);

        let mut data = encode(&Request::get("a"));
        data.extend_from_slice(&encode(&Request::remove("b")));
        client.write_all(&data).unwrap();

        assert_eq!(conn.read_request().unwrap(), Some(Request::get("a")));
        assert_eq!(conn.read_request().unwrap(), Some(Request::remove("b")));
    }

    #[test]
    fn clean_eof_returns_none() {
        let (client, server) = socket_pair();
        let mut conn = Connection::new(server);
        drop(client);
        assert!(conn.read_request().unwrap().is_none());
    }

    #[test]
    fn eof_mid_frame_is_reset() {
        let (mut client, server) = socket_pair();
        let mut conn = Connection::new(server);

        let data = encode(&Request::get("truncated"));
        client.write_all(&data[..data.len() - 2]).unwrap();
        drop(client);

        assert!(matches!(
            conn.read_request(),
            Err(ConnectionError::ConnectionReset)
        ));
    }

    #[test]
    fn malformed_request_is_skipped() {
        let (mut client, server) = socket_pair();
        let mut conn = Connection::new(server);

        // Chave com UTF-8 inválido, seguida de uma requisição válida
        let mut data = BytesMut::from(&[nour_protocol::PROTOCOL_VERSION, 2, 0b001, 0, 1, 0xff][..]);
        data.extend_from_slice(&encode(&Request::get("ok")));
        client.write_all(&data).unwrap();

        let err = conn.read_request().unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(conn.read_request().unwrap(), Some(Request::get("ok")));
    }

    #[test]
    fn bad_version_loses_framing() {
        let (mut client, server) = socket_pair();
        let mut conn = Connection::new(server);
        client.write_all(&[0x01, 0, 0]).unwrap();

        let err = conn.read_request().unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Protocol(ProtocolError::UnsupportedVersion(0x01))
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn writes_response() {
        let (mut client, server) = socket_pair();
        let mut conn = Connection::new(server);
        conn.write_response(&Response::gotten(Bytes::from_static(b"v")))
            .unwrap();

        let mut buf = [0u8; 8];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [nour_protocol::PROTOCOL_VERSION, 2, 1, 0, 0, 0, 1, b'v']);
    }

    #[test]
    fn close_twice_is_quiet() {
        let (_client, server) = socket_pair();
        let conn = Connection::new(server);
        conn.close();
        conn.close();
    }
}
