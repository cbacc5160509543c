use std::io::{self, ErrorKind, Read, Write};

use thiserror::Error;

use crate::message::{Data, Header, Message, NAME_FIELD_LEN, Nick};
use crate::op::{OpCode, UnknownOpCode};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    BadOpCode(#[from] UnknownOpCode),
    #[error("nickname field is not valid UTF-8")]
    BadNickEncoding,
}

const HEADER_LEN: usize = 4 + NAME_FIELD_LEN;
const DATA_HDR_LEN: usize = NAME_FIELD_LEN + 4;

/// Reads `buf.len()` bytes, retrying on `Interrupted`.
///
/// Returns `Ok(false)` for an orderly close observed before any byte of
/// this read was consumed (a close mid-frame is reported as an error: a
/// partial frame can never be completed, so there is nothing "orderly"
/// about it).
fn read_full(stream: &mut impl Read, buf: &mut [u8]) -> Result<bool, CodecError> {
    let mut total = 0;
    while total < buf.len() {
        match stream.read(&mut buf[total..]) {
            Ok(0) if total == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(ErrorKind::UnexpectedEof, "connection closed mid-frame").into());
            }
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn write_full(stream: &mut impl Write, buf: &[u8]) -> Result<(), CodecError> {
    let mut total = 0;
    while total < buf.len() {
        match stream.write(&buf[total..]) {
            Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "write returned zero bytes").into()),
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Encodes a nickname into its fixed-width, null-padded wire field.
/// Exposed so callers can build multi-nickname payloads (online-user
/// lists) without going through a full `Data` frame.
pub fn encode_nick(nick: &Nick, out: &mut [u8; NAME_FIELD_LEN]) {
    out.fill(0);
    let bytes = nick.as_str().as_bytes();
    out[..bytes.len()].copy_from_slice(bytes);
}

fn decode_nick(raw: &[u8; NAME_FIELD_LEN]) -> Result<Nick, CodecError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let s = std::str::from_utf8(&raw[..end]).map_err(|_| CodecError::BadNickEncoding)?;
    Ok(Nick::from_str_truncate(s))
}

/// Reads one header. `Ok(None)` means the peer closed the connection
/// before sending anything (a normal disconnect, not an error).
pub fn read_header(stream: &mut impl Read) -> Result<Option<Header>, CodecError> {
    let mut buf = [0u8; HEADER_LEN];
    if !read_full(stream, &mut buf)? {
        return Ok(None);
    }
    let op = OpCode::try_from(u32::from_ne_bytes(buf[..4].try_into().unwrap()))?;
    let mut sender_raw = [0u8; NAME_FIELD_LEN];
    sender_raw.copy_from_slice(&buf[4..]);
    let sender = decode_nick(&sender_raw)?;
    Ok(Some(Header::new(op, sender)))
}

/// Reads one data block. `Ok(None)` means the peer closed the connection
/// before the block started.
pub fn read_data(stream: &mut impl Read) -> Result<Option<Data>, CodecError> {
    let mut hdr_buf = [0u8; DATA_HDR_LEN];
    if !read_full(stream, &mut hdr_buf)? {
        return Ok(None);
    }
    let mut receiver_raw = [0u8; NAME_FIELD_LEN];
    receiver_raw.copy_from_slice(&hdr_buf[..NAME_FIELD_LEN]);
    let receiver = decode_nick(&receiver_raw)?;
    let len = u32::from_ne_bytes(hdr_buf[NAME_FIELD_LEN..].try_into().unwrap()) as usize;

    let mut payload = vec![0u8; len];
    if len > 0 && !read_full(stream, &mut payload)? {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "connection closed mid-frame").into());
    }
    Ok(Some(Data::new(receiver, payload)))
}

/// Reads a full message (header + data). `Ok(None)` only if the close
/// happens cleanly between messages, i.e. before the header starts.
pub fn read_msg(stream: &mut impl Read) -> Result<Option<Message>, CodecError> {
    let Some(header) = read_header(stream)? else {
        return Ok(None);
    };
    let Some(data) = read_data(stream)? else {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "connection closed mid-frame").into());
    };
    Ok(Some(Message { header, data }))
}

pub fn send_header(stream: &mut impl Write, hdr: &Header) -> Result<(), CodecError> {
    let mut buf = [0u8; HEADER_LEN];
    buf[..4].copy_from_slice(&u32::from(hdr.op).to_ne_bytes());
    let mut sender_raw = [0u8; NAME_FIELD_LEN];
    encode_nick(&hdr.sender, &mut sender_raw);
    buf[4..].copy_from_slice(&sender_raw);
    write_full(stream, &buf)
}

pub fn send_data(stream: &mut impl Write, data: &Data) -> Result<(), CodecError> {
    let mut hdr_buf = [0u8; DATA_HDR_LEN];
    let mut receiver_raw = [0u8; NAME_FIELD_LEN];
    encode_nick(&data.receiver, &mut receiver_raw);
    hdr_buf[..NAME_FIELD_LEN].copy_from_slice(&receiver_raw);
    hdr_buf[NAME_FIELD_LEN..].copy_from_slice(&(data.payload.len() as u32).to_ne_bytes());
    write_full(stream, &hdr_buf)?;
    write_full(stream, &data.payload)
}

pub fn send_request(stream: &mut impl Write, msg: &Message) -> Result<(), CodecError> {
    send_header(stream, &msg.header)?;
    send_data(stream, &msg.data)
}
