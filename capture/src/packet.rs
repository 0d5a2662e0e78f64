//! Raw data packet wire format.
//!
//! ```text
//! offset  size  field
//! 0       4     sequence number, u32 little-endian (first packet is 1)
//! 4       6     cumulative byte count before this packet, 48-bit little-endian
//! 10      n     payload, i16 little-endian words
//! ```
//!
//! The capture card writes the byte counter least-significant byte first;
//! decoding reverses the six bytes, zero-pads them to eight, and reads the
//! result big-endian, which is the same as a 48-bit little-endian read.

use crate::error::{CaptureError, Result};

/// Bytes before the payload.
pub const HEADER_LEN: usize = 10;

const BYTE_COUNT_MASK: u64 = (1 << 48) - 1;

/// One decoded data datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    pub byte_count: u64,
    pub payload: Vec<i16>,
}

impl Packet {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CaptureError::Malformed(format!(
                "{} bytes is shorter than the {HEADER_LEN}-byte header",
                bytes.len()
            )));
        }
        let body = &bytes[HEADER_LEN..];
        if body.len() % 2 != 0 {
            return Err(CaptureError::Malformed(format!(
                "odd payload length {}",
                body.len()
            )));
        }

        let seq = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut counter = [0u8; 8];
        counter[2..].copy_from_slice(&bytes[4..10]);
        counter[2..].reverse();
        let byte_count = u64::from_be_bytes(counter);

        let payload = body
            .chunks_exact(2)
            .map(|w| i16::from_le_bytes([w[0], w[1]]))
            .collect();
        Ok(Self {
            seq,
            byte_count,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() * 2);
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(&(self.byte_count & BYTE_COUNT_MASK).to_le_bytes()[..6]);
        for w in &self.payload {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_fields() {
        let mut bytes = vec![0x2a, 0x00, 0x00, 0x00];
        // byte count 0x0102_0304_0506, least-significant byte first
        bytes.extend_from_slice(&[0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        bytes.extend_from_slice(&[0xff, 0x7f, 0x00, 0x80, 0x01, 0x00]);
        let p = Packet::parse(&bytes).unwrap();
        assert_eq!(p.seq, 42);
        assert_eq!(p.byte_count, 0x0102_0304_0506);
        assert_eq!(p.payload, vec![i16::MAX, i16::MIN, 1]);
        assert_eq!(p.to_bytes(), bytes);
    }

    #[test]
    fn rejects_short_and_odd_datagrams() {
        assert!(matches!(Packet::parse(&[0; 9]), Err(CaptureError::Malformed(_))));
        assert!(matches!(Packet::parse(&[0; 13]), Err(CaptureError::Malformed(_))));
        let empty = Packet::parse(&[0; 10]).unwrap();
        assert!(empty.payload.is_empty());
    }
}
