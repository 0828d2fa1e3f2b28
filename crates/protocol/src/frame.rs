use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use std::time::Duration;

use nour_common::{MAX_PAYLOAD_SIZE, ProtocolError};

use crate::{Command, Request, Response, Status};

/// Primeiro byte de todo frame.
pub const PROTOCOL_VERSION: u8 = 0x10;

const FLAG_KEY: u8 = 0b001;
const FLAG_TTL: u8 = 0b010;
const FLAG_PAYLOAD: u8 = 0b100;

const REQUEST_FLAGS: u8 = FLAG_KEY | FLAG_TTL | FLAG_PAYLOAD;

const RESPONSE_FLAG_PAYLOAD: u8 = 0b001;
const RESPONSE_FLAGS: u8 = RESPONSE_FLAG_PAYLOAD;

// Layout de uma requisição (big-endian):
//   versão u8 | comando u8 | flags u8
//   [chave: u16 len + utf-8] [ttl: u64 ms] [payload: u32 len + bytes]
impl Request {
    /// Verifica se uma requisição completa está disponível no buffer.
    /// Erros diferentes de `Incomplete` significam que o framing se perdeu.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
        check_version(src)?;
        get_u8(src)?; // comando
        let flags = get_flags(src, REQUEST_FLAGS)?;

        if flags & FLAG_KEY != 0 {
            let len = get_u16(src)? as usize;
            skip(src, len)?;
        }
        if flags & FLAG_TTL != 0 {
            skip(src, 8)?;
        }
        if flags & FLAG_PAYLOAD != 0 {
            let len = get_payload_len(src)?;
            skip(src, len)?;
        }
        Ok(())
    }

    /// Faz o parse de uma requisição completa. Deve ser chamado apenas após
    /// `check()` retornar Ok, assim o tamanho do frame já é conhecido mesmo
    /// quando o conteúdo é inválido.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Request, ProtocolError> {
        check_version(src)?;
        let command = Command::from_code(get_u8(src)?);
        let flags = get_flags(src, REQUEST_FLAGS)?;

        let key = if flags & FLAG_KEY != 0 {
            let len = get_u16(src)? as usize;
            let raw = get_bytes(src, len)?;
            let key = std::str::from_utf8(raw)
                .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
            Some(key.to_string())
        } else {
            None
        };

        let ttl = if flags & FLAG_TTL != 0 {
            Some(Duration::from_millis(get_u64(src)?))
        } else {
            None
        };

        let payload = if flags & FLAG_PAYLOAD != 0 {
            let len = get_payload_len(src)?;
            Some(Bytes::copy_from_slice(get_bytes(src, len)?))
        } else {
            None
        };

        Ok(Request {
            command,
            key,
            ttl,
            payload,
        })
    }

    /// Encoda a requisição no buffer de saída.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut flags = 0;
        if let Some(key) = &self.key {
            if key.len() > u16::MAX as usize {
                return Err(ProtocolError::KeyTooLong(key.len()));
            }
            flags |= FLAG_KEY;
        }
        if self.ttl.is_some() {
            flags |= FLAG_TTL;
        }
        if let Some(payload) = &self.payload {
            check_payload_len(payload.len())?;
            flags |= FLAG_PAYLOAD;
        }

        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(self.command.code());
        dst.put_u8(flags);
        if let Some(key) = &self.key {
            dst.put_u16(key.len() as u16);
            dst.put(key.as_bytes());
        }
        if let Some(ttl) = self.ttl {
            dst.put_u64(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        }
        if let Some(payload) = &self.payload {
            dst.put_u32(payload.len() as u32);
            dst.put(payload.as_ref());
        }
        Ok(())
    }
}

// Layout de uma resposta: versão u8 | status u8 | flags u8 | [payload: u32 len + bytes]
impl Response {
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
        check_version(src)?;
        get_u8(src)?; // status
        let flags = get_flags(src, RESPONSE_FLAGS)?;
        if flags & RESPONSE_FLAG_PAYLOAD != 0 {
            let len = get_payload_len(src)?;
            skip(src, len)?;
        }
        Ok(())
    }

    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Response, ProtocolError> {
        check_version(src)?;
        let code = get_u8(src)?;
        let status = Status::from_code(code).ok_or(ProtocolError::UnknownStatus(code))?;
        let flags = get_flags(src, RESPONSE_FLAGS)?;

        let payload = if flags & RESPONSE_FLAG_PAYLOAD != 0 {
            let len = get_payload_len(src)?;
            Some(Bytes::copy_from_slice(get_bytes(src, len)?))
        } else {
            None
        };

        Ok(Response { status, payload })
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if let Some(payload) = &self.payload {
            check_payload_len(payload.len())?;
        }

        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(self.status.code());
        match &self.payload {
            Some(payload) => {
                dst.put_u8(RESPONSE_FLAG_PAYLOAD);
                dst.put_u32(payload.len() as u32);
                dst.put(payload.as_ref());
            }
            None => dst.put_u8(0),
        }
        Ok(())
    }
}

fn check_version(src: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
    match get_u8(src)? {
        PROTOCOL_VERSION => Ok(()),
        other => Err(ProtocolError::UnsupportedVersion(other)),
    }
}

fn get_flags(src: &mut Cursor<&[u8]>, allowed: u8) -> Result<u8, ProtocolError> {
    let flags = get_u8(src)?;
    if flags & !allowed != 0 {
        return Err(ProtocolError::InvalidFlags(flags));
    }
    Ok(flags)
}

fn get_payload_len(src: &mut Cursor<&[u8]>) -> Result<usize, ProtocolError> {
    let len = get_u32(src)? as usize;
    check_payload_len(len)?;
    Ok(len)
}

fn check_payload_len(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(len));
    }
    Ok(())
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u8())
}

fn get_u16(src: &mut Cursor<&[u8]>) -> Result<u16, ProtocolError> {
    if src.remaining() < 2 {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u16())
}

fn get_u32(src: &mut Cursor<&[u8]>) -> Result<u32, ProtocolError> {
    if src.remaining() < 4 {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u32())
}

fn get_u64(src: &mut Cursor<&[u8]>) -> Result<u64, ProtocolError> {
    if src.remaining() < 8 {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u64())
}

fn get_bytes<'a>(src: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], ProtocolError> {
    if src.remaining() < len {
        return Err(ProtocolError::Incomplete);
    }
    let data: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;
    src.set_position((start + len) as u64);
    Ok(&data[start..start + len])
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::Incomplete);
    }
    src.set_position(src.position() + n as u64);
    Ok(())
}
