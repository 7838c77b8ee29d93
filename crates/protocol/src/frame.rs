//! Binary frames: `DLV1` magic, SHA-256 of the body, then the body, which is
//! a zstd-compressed CBOR encoding of the message.

use crate::ProtocolError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

pub const FRAME_MAGIC: [u8; 4] = *b"DLV1";
const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = FRAME_MAGIC.len() + DIGEST_LEN;
const ZSTD_LEVEL: i32 = 3;

pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let cbor = cbor_serialize(message)?;
    let body = zstd_compress(&cbor)?;
    let digest = Sha256::digest(&body);

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&digest);
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated { len: frame.len() });
    }
    let (magic, rest) = frame.split_at(FRAME_MAGIC.len());
    if magic != FRAME_MAGIC {
        tracing::debug!(len = frame.len(), "frame rejected: bad magic");
        return Err(ProtocolError::BadMagic);
    }
    let (expected, body) = rest.split_at(DIGEST_LEN);
    let actual = Sha256::digest(body);
    if expected != actual.as_slice() {
        tracing::debug!(len = frame.len(), "frame rejected: digest mismatch");
        return Err(ProtocolError::IntegrityMismatch {
            expected: hex(expected),
            actual: hex(&actual),
        });
    }
    let cbor = zstd_decompress(body)?;
    cbor_deserialize(&cbor)
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    ciborium::from_reader(data).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ServerMessage;
    use delve_kernel::WorldEvent;

    fn sample() -> ServerMessage {
        ServerMessage::Event(WorldEvent::PortalSpawn { x: 7, y: 9 })
    }

    #[test]
    fn frame_carries_message() {
        let frame = encode_frame(&sample()).unwrap();
        assert_eq!(&frame[..4], b"DLV1");
        let back: ServerMessage = decode_frame(&frame).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn flipped_body_byte_fails_integrity() {
        let mut frame = encode_frame(&sample()).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(matches!(
            decode_frame::<ServerMessage>(&frame),
            Err(ProtocolError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn short_or_foreign_frames_are_rejected() {
        assert!(matches!(
            decode_frame::<ServerMessage>(b"DLV1"),
            Err(ProtocolError::Truncated { len: 4 })
        ));
        let mut frame = encode_frame(&sample()).unwrap();
        frame[0] = b'X';
        assert!(matches!(
            decode_frame::<ServerMessage>(&frame),
            Err(ProtocolError::BadMagic)
        ));
    }
}
