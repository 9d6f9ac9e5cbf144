//! Binary encoding of a single agent's state
//!
//! Layout (big-endian):
//!
//! ```text
//! u32  agent id
//! u16  name length, then UTF-8 name
//! f64  position.x, position.y, velocity.x, velocity.y,
//!      heading, max_speed, max_turn_rate, communication_range
//! u16  status length, then UTF-8 status name
//! f64  battery
//! i64  last update (ms since epoch)
//! ```
//!
//! The whole record may be gzip-compressed; whether it is depends on the
//! store configuration, not on anything inside the record.

use crate::agent::{AgentState, AgentStatus, Vec2};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Cursor, Read, Write};

/// Largest record `encode` can produce: both strings at their u16 limit
pub const MAX_RECORD_LEN: usize = 4 + (2 + u16::MAX as usize) + 8 * 8 + (2 + u16::MAX as usize) + 8 + 8;

/// Encode a state record
pub fn encode(state: &AgentState) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(128 + state.name.len());
    buf.write_u32::<BigEndian>(state.id)?;
    write_str(&mut buf, &state.name)?;
    for value in [
        state.position.x,
        state.position.y,
        state.velocity.x,
        state.velocity.y,
        state.heading,
        state.max_speed,
        state.max_turn_rate,
        state.communication_range,
    ] {
        buf.write_f64::<BigEndian>(value)?;
    }
    write_str(&mut buf, state.status.name())?;
    buf.write_f64::<BigEndian>(state.battery)?;
    buf.write_i64::<BigEndian>(state.last_update)?;
    Ok(buf)
}

/// Decode a state record, rejecting truncated or trailing data
pub fn decode(bytes: &[u8]) -> Result<AgentState> {
    let mut cursor = Cursor::new(bytes);

    let id = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    let name = read_str(&mut cursor)?;
    let mut f = || cursor.read_f64::<BigEndian>().map_err(truncated);
    let position = Vec2::new(f()?, f()?);
    let velocity = Vec2::new(f()?, f()?);
    let heading = f()?;
    let max_speed = f()?;
    let max_turn_rate = f()?;
    let communication_range = f()?;

    let status_name = read_str(&mut cursor)?;
    let status = AgentStatus::from_name(&status_name)
        .ok_or_else(|| Error::Serialization(format!("unknown status '{}'", status_name)))?;
    let battery = cursor.read_f64::<BigEndian>().map_err(truncated)?;
    let last_update = cursor.read_i64::<BigEndian>().map_err(truncated)?;

    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(Error::Serialization(format!(
            "{} trailing bytes after record",
            bytes.len() - consumed
        )));
    }

    Ok(AgentState {
        id,
        name,
        position,
        velocity,
        heading,
        max_speed,
        max_turn_rate,
        communication_range,
        status,
        battery,
        last_update,
    })
}

/// Encode and optionally gzip
pub fn to_bytes(state: &AgentState, compress: bool) -> Result<Vec<u8>> {
    let raw = encode(state)?;
    if compress { gzip(&raw) } else { Ok(raw) }
}

/// Optionally gunzip, then decode
pub fn from_bytes(bytes: &[u8], compressed: bool) -> Result<AgentState> {
    if compressed {
        decode(&gunzip(bytes)?)
    } else {
        decode(bytes)
    }
}

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| Error::Serialization(format!("Compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Serialization(format!("Compression finish failed: {}", e)))
}

/// Inflate a compressed record, refusing output larger than any valid record
pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes).take(MAX_RECORD_LEN as u64 + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Serialization(format!("Decompression failed: {}", e)))?;
    if out.len() > MAX_RECORD_LEN {
        return Err(Error::Serialization(format!(
            "decompressed record exceeds {} bytes",
            MAX_RECORD_LEN
        )));
    }
    Ok(out)
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::Serialization(format!("string too long ({} bytes)", s.len())))?;
    buf.write_u16::<BigEndian>(len)?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cursor.read_u16::<BigEndian>().map_err(truncated)? as usize;
    let mut raw = vec![0u8; len];
    cursor.read_exact(&mut raw).map_err(truncated)?;
    String::from_utf8(raw).map_err(|e| Error::Serialization(format!("invalid UTF-8: {}", e)))
}

fn truncated(e: std::io::Error) -> Error {
    Error::Serialization(format!("truncated record: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> AgentState {
        AgentState::new(42, "surveyor")
            .position(12.5, -3.25)
            .velocity(1.0, 0.5)
            .heading(1.57)
            .status(AgentStatus::Returning)
            .battery(63.5)
            .updated_at(1_700_000_000_123)
    }

    #[test]
    fn test_layout() {
        let bytes = encode(&sample()).unwrap();
        // id + name + 8 floats + status + battery + timestamp
        let expected = 4 + (2 + 8) + 8 * 8 + (2 + 9) + 8 + 8;
        assert_eq!(bytes.len(), expected);
        assert_eq!(&bytes[..4], &42u32.to_be_bytes());
        assert_eq!(&bytes[4..6], &8u16.to_be_bytes());
        assert_eq!(&bytes[6..14], b"surveyor");
    }

    #[test]
    fn test_round_trip_with_and_without_compression() {
        let state = sample();
        for compress in [false, true] {
            let bytes = to_bytes(&state, compress).unwrap();
            assert_eq!(from_bytes(&bytes, compress).unwrap(), state);
        }
    }

    #[test]
    fn test_truncated_record_rejected() {
        let bytes = encode(&sample()).unwrap();
        for cut in [0, 3, 10, bytes.len() - 1] {
            let err = decode(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, Error::Serialization(_)), "cut at {}", cut);
        }
    }

    #[test]
    fn test_oversized_compressed_payload_rejected() {
        let mut inflated = encode(&sample()).unwrap();
        inflated.resize(inflated.len() + 4 * 1024 * 1024, 0);
        let packed = gzip(&inflated).unwrap();
        assert!(packed.len() < 64 * 1024);

        match from_bytes(&packed, true) {
            Err(Error::Serialization(message)) => assert!(message.contains("exceeds"), "{}", message),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_largest_record_still_inflates() {
        let name = "n".repeat(u16::MAX as usize);
        let state = AgentState::new(1, name);
        let bytes = to_bytes(&state, true).unwrap();
        assert_eq!(from_bytes(&bytes, true).unwrap(), state);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        // Status name starts after id, name and the eight floats
        let status_at = 4 + 2 + 8 + 64 + 2;
        bytes[status_at] = b'X';
        assert!(matches!(decode(&bytes), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_garbage_is_not_gzip() {
        assert!(matches!(
            from_bytes(b"definitely not gzip", true),
            Err(Error::Serialization(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            id in any::<u32>(),
            name in "[a-zA-Z0-9 _-]{0,40}",
            x in -1e6f64..1e6,
            y in -1e6f64..1e6,
            battery in 0f64..100.0,
            ts in any::<i64>(),
            compress in any::<bool>(),
        ) {
            let state = AgentState::new(id, name)
                .position(x, y)
                .battery(battery)
                .updated_at(ts);
            let bytes = to_bytes(&state, compress).unwrap();
            prop_assert_eq!(from_bytes(&bytes, compress).unwrap(), state);
        }
    }
}
