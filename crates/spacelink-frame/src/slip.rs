//! SLIP byte stuffing (RFC 1055).
//!
//! ```text
//! FEND | payload with FEND -> FESC TFEND, FESC -> FESC TFESC | FEND
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Frame delimiter.
pub const FEND: u8 = 0xC0;
/// Escape introducer.
pub const FESC: u8 = 0xDB;
/// Escaped FEND.
pub const TFEND: u8 = 0xDC;
/// Escaped FESC.
pub const TFESC: u8 = 0xDD;

/// Encode `payload` as one FEND-delimited SLIP frame into `dst`.
pub fn encode_into(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + payload.len() / 8 + 2);
    dst.put_u8(FEND);
    for &byte in payload {
        match byte {
            FEND => dst.put_slice(&[FESC, TFEND]),
            FESC => dst.put_slice(&[FESC, TFESC]),
            other => dst.put_u8(other),
        }
    }
    dst.put_u8(FEND);
}

/// Encode `payload` as one FEND-delimited SLIP frame.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut dst = BytesMut::new();
    encode_into(payload, &mut dst);
    dst.to_vec()
}

/// Decode the first SLIP frame in `frame`.
///
/// Leading FENDs are skipped and decoding stops at the closing FEND. Input
/// without a closing FEND, a dangling escape, or an unknown escape code is
/// rejected.
pub fn decode(frame: &[u8]) -> Result<Vec<u8>> {
    let start = frame
        .iter()
        .position(|&b| b != FEND)
        .ok_or(FrameError::Slip("no frame content"))?;
    let end = frame[start..]
        .iter()
        .position(|&b| b == FEND)
        .ok_or(FrameError::Slip("missing closing FEND"))?;
    unescape(&frame[start..start + end])
}

fn unescape(body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.iter();
    while let Some(&byte) = bytes.next() {
        if byte != FESC {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(&TFEND) => out.push(FEND),
            Some(&TFESC) => out.push(FESC),
            Some(_) => return Err(FrameError::Slip("invalid escape code")),
            None => return Err(FrameError::Slip("dangling escape")),
        }
    }
    Ok(out)
}

/// Pull the next complete frame out of a stream buffer.
///
/// Returns `Ok(None)` if no closing FEND has arrived yet. Empty frames
/// (back-to-back FENDs) are skipped. On success the frame bytes are
/// consumed from `src`; on an escape error the bad frame is consumed too so
/// the stream can resynchronize.
pub fn take_frame(src: &mut BytesMut) -> Result<Option<Vec<u8>>> {
    loop {
        let leading = src.iter().take_while(|&&b| b == FEND).count();
        src.advance(leading);
        if src.is_empty() {
            return Ok(None);
        }
        let Some(end) = src.iter().position(|&b| b == FEND) else {
            return Ok(None);
        };
        let body = src.split_to(end);
        if body.is_empty() {
            continue;
        }
        return unescape(&body).map(Some);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_special_bytes() {
        let encoded = encode(&[0x01, FEND, FESC, 0x02]);
        assert_eq!(
            encoded,
            vec![FEND, 0x01, FESC, TFEND, FESC, TFESC, 0x02, FEND]
        );
        assert_eq!(decode(&encoded).unwrap(), vec![0x01, FEND, FESC, 0x02]);
    }

    #[test]
    fn empty_payload_roundtrips() {
        let encoded = encode(&[]);
        assert_eq!(encoded, vec![FEND, FEND]);
        assert!(decode(&encoded).is_err());
        let mut buf = BytesMut::from(&encoded[..]);
        assert!(take_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_accepts_extra_leading_fends() {
        let mut wire = vec![FEND, FEND, FEND];
        wire.extend_from_slice(&encode(b"abc"));
        assert_eq!(decode(&wire).unwrap(), b"abc");
    }

    #[test]
    fn decode_rejects_truncated_frames() {
        assert!(matches!(
            decode(&[FEND, 0x01, 0x02]),
            Err(FrameError::Slip("missing closing FEND"))
        ));
        assert!(matches!(
            decode(&[FEND, 0x01, FESC, FEND]),
            Err(FrameError::Slip("dangling escape"))
        ));
        assert!(matches!(
            decode(&[FEND, FESC, 0x00, FEND]),
            Err(FrameError::Slip("invalid escape code"))
        ));
    }

    #[test]
    fn take_frame_splits_a_stream() {
        let mut buf = BytesMut::new();
        encode_into(b"one", &mut buf);
        encode_into(&[FEND], &mut buf);
        buf.put_slice(&[FEND, 0x55]);

        assert_eq!(take_frame(&mut buf).unwrap().unwrap(), b"one");
        assert_eq!(take_frame(&mut buf).unwrap().unwrap(), vec![FEND]);
        assert!(take_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.as_ref(), &[0x55]);
    }
}
