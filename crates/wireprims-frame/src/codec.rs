use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Preamble: magic (2) + body length (4) = 6 bytes.
pub const PREAMBLE_SIZE: usize = 6;

/// Magic bytes: "WF" (0x57 0x46).
pub const MAGIC: [u8; 2] = [0x57, 0x46];

/// Default maximum plausible body length: 16 MiB.
///
/// The protocol itself does not bound message length; this ceiling only
/// marks a decoded length as implausible so the assembler treats it as
/// stream corruption and resynchronizes instead of buffering forever.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode a body length into a fixed-width preamble.
///
/// Wire format per message:
/// ```text
/// ┌──────────────┬───────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Body             │
/// │ 0x57 0x46    │ (4B LE)   │ (Length bytes)   │
/// │ "WF"         │           │                  │
/// └──────────────┴───────────┴─────────────────┘
/// ```
pub fn encode_length(len: u32) -> [u8; PREAMBLE_SIZE] {
    let mut preamble = [0u8; PREAMBLE_SIZE];
    preamble[..2].copy_from_slice(&MAGIC);
    preamble[2..].copy_from_slice(&len.to_le_bytes());
    preamble
}

/// Decode a preamble back into the expected body length.
///
/// Returns `None` when the window does not start with the magic bytes;
/// the caller must resynchronize via [`find_preamble`].
pub fn decode_length(preamble: &[u8; PREAMBLE_SIZE]) -> Option<u32> {
    if preamble[..2] != MAGIC {
        return None;
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&preamble[2..]);
    Some(u32::from_le_bytes(len))
}

/// Locate the next plausible preamble start within `window`.
///
/// Returns the offset of the first full magic match. A lone leading magic
/// byte at the very end of the window also counts: the rest of the magic
/// may simply not have arrived yet. Returns `None` when nothing in the
/// window could open a preamble.
///
/// Used only during resynchronization after a corrupted stream.
pub fn find_preamble(window: &[u8]) -> Option<usize> {
    if let Some(offset) = window.windows(2).position(|pair| pair == MAGIC) {
        return Some(offset);
    }
    match window.last() {
        Some(&byte) if byte == MAGIC[0] => Some(window.len() - 1),
        _ => None,
    }
}

/// Encode a complete message (preamble + body) into `dst`.
pub fn encode_message(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(PREAMBLE_SIZE + payload.len());
    dst.put_slice(&encode_length(payload.len() as u32));
    dst.put_slice(payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_roundtrip() {
        for len in [0u32, 1, 255, 1024, 1_000_000, u32::MAX] {
            let preamble = encode_length(len);
            assert_eq!(decode_length(&preamble), Some(len));
        }
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut preamble = encode_length(42);
        preamble[0] = 0xFF;
        assert_eq!(decode_length(&preamble), None);

        let mut preamble = encode_length(42);
        preamble[1] = 0x00;
        assert_eq!(decode_length(&preamble), None);
    }

    #[test]
    fn encode_message_layout() {
        let mut buf = BytesMut::new();
        encode_message(b"hello", &mut buf).unwrap();

        assert_eq!(buf.len(), PREAMBLE_SIZE + 5);
        assert_eq!(&buf[..2], &MAGIC);
        assert_eq!(&buf[2..6], &5u32.to_le_bytes());
        assert_eq!(&buf[6..], b"hello");
    }

    #[test]
    fn encode_empty_message() {
        let mut buf = BytesMut::new();
        encode_message(b"", &mut buf).unwrap();
        assert_eq!(buf.len(), PREAMBLE_SIZE);
    }

    #[test]
    fn find_preamble_full_match() {
        let mut window = vec![0x00, 0x11, 0x22];
        window.extend_from_slice(&encode_length(9));
        assert_eq!(find_preamble(&window), Some(3));
    }

    #[test]
    fn find_preamble_at_start() {
        let window = encode_length(1);
        assert_eq!(find_preamble(&window), Some(0));
    }

    #[test]
    fn find_preamble_partial_tail() {
        // A lone first magic byte at the tail is a plausible start.
        let window = [0x00, 0x01, MAGIC[0]];
        assert_eq!(find_preamble(&window), Some(2));
    }

    #[test]
    fn find_preamble_not_found() {
        assert_eq!(find_preamble(&[0x00, 0x01, 0x02, 0x03]), None);
        assert_eq!(find_preamble(&[]), None);
    }

    #[test]
    fn find_preamble_ignores_second_magic_byte_alone() {
        assert_eq!(find_preamble(&[MAGIC[1], MAGIC[1]]), None);
    }
}
