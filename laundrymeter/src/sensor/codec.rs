//! Framing and obfuscation for the TP-Link smart plug protocol.
//!
//! Each message is a JSON document run through an autokey XOR cipher
//! (initial key 171) and prefixed with its length as a 4-byte big-endian
//! integer:
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 BE)| XOR-encrypted JSON payload|
//! +----------------+---------------------------+
//! ```

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const INITIAL_KEY: u8 = 171;
const HEADER_LEN: usize = 4;

/// Upper bound for a response body. Realtime replies are ~200 bytes;
/// anything near this size means we are not talking to a plug.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Encrypt a plaintext payload. The key for each byte is the previous
/// ciphertext byte.
pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plain
        .iter()
        .map(|&byte| {
            key ^= byte;
            key
        })
        .collect()
}

/// Inverse of [`encrypt`].
pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    cipher
        .iter()
        .map(|&byte| {
            let plain = key ^ byte;
            key = byte;
            plain
        })
        .collect()
}

/// Codec turning JSON strings into length-prefixed encrypted frames and
/// back.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmartPlugCodec;

impl Encoder<String> for SmartPlugCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encrypt(item.as_bytes());
        let len = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "command too long"))?;

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(len);
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Decoder for SmartPlugCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {len} exceeds {MAX_FRAME_LEN} bytes"),
            ));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(len);

        String::from_utf8(decrypt(&body))
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
