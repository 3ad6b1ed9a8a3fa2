//! Hand-written parser for the client text protocol
//!
//! One command per frame, space delimited:
//! `SET <key> <value>`, `GET <key>`, `EXPIRE <key> <ttl>`, `TTL <key>`.
//! The SET value is the remainder of the line and may contain spaces.

use crate::ProtocolError;
use crate::protocol::command::ClientCommand;
use bytes::Bytes;

/// Case-insensitive command comparison (avoids allocation from to_ascii_lowercase)
#[inline]
fn cmd_eq(cmd: &[u8], expected: &[u8]) -> bool {
    cmd.eq_ignore_ascii_case(expected)
}

/// Parse one client command from a frame payload
pub fn parse(payload: &[u8]) -> Result<ClientCommand, ProtocolError> {
    let line = payload.trim_ascii();
    let (cmd_name, rest) = split_word(line);

    if cmd_name.is_empty() {
        return Err(ProtocolError::BadRequest("empty command".to_string()));
    }

    if cmd_eq(cmd_name, b"set") {
        parse_set(rest)
    } else if cmd_eq(cmd_name, b"get") {
        let key = single_key(rest, "GET <key>")?;
        Ok(ClientCommand::Get { key })
    } else if cmd_eq(cmd_name, b"expire") {
        parse_expire(rest)
    } else if cmd_eq(cmd_name, b"ttl") {
        let key = single_key(rest, "TTL <key>")?;
        Ok(ClientCommand::Ttl { key })
    } else {
        Err(ProtocolError::UnsupportedCommand(
            String::from_utf8_lossy(cmd_name).to_string(),
        ))
    }
}

/// Parse set command
fn parse_set(rest: &[u8]) -> Result<ClientCommand, ProtocolError> {
    let (key, value) = split_word(rest);
    if key.is_empty() || value.is_empty() {
        return Err(usage("SET <key> <value>"));
    }
    Ok(ClientCommand::Set {
        key: to_key(key)?,
        value: Bytes::copy_from_slice(value),
    })
}

/// Parse expire command
fn parse_expire(rest: &[u8]) -> Result<ClientCommand, ProtocolError> {
    let (key, rest) = split_word(rest);
    let (ttl, extra) = split_word(rest);
    if key.is_empty() || ttl.is_empty() || !extra.is_empty() {
        return Err(usage("EXPIRE <key> <ttl>"));
    }
    let ttl = std::str::from_utf8(ttl)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        // TTL replies are signed
        .filter(|&ttl| i64::try_from(ttl).is_ok())
        .ok_or(ProtocolError::InvalidTtl)?;
    Ok(ClientCommand::Expire {
        key: to_key(key)?,
        ttl,
    })
}

fn single_key(rest: &[u8], form: &str) -> Result<String, ProtocolError> {
    let (key, extra) = split_word(rest);
    if key.is_empty() || !extra.is_empty() {
        return Err(usage(form));
    }
    to_key(key)
}

/// Split off the first space-delimited word; the remainder has leading spaces removed
fn split_word(input: &[u8]) -> (&[u8], &[u8]) {
    let input = input.trim_ascii_start();
    match memchr::memchr(b' ', input) {
        Some(pos) => (&input[..pos], input[pos + 1..].trim_ascii_start()),
        None => (input, &input[input.len()..]),
    }
}

fn to_key(raw: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn usage(form: &str) -> ProtocolError {
    ProtocolError::BadRequest(format!("usage: {form}"))
}
