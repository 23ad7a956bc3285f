//! The compact-size length prefix used by the block and transaction wire
//! format: one byte below 0xFD, `0xFD` + 2 LE bytes up to 65535, `0xFE` + 4
//! LE bytes up to 2^32-1, `0xFF` + 8 LE bytes otherwise.

use crate::{ChainDeserialize, ChainSerialize, SerializationError};
use byteorder::{LittleEndian, WriteBytesExt};

/// The largest size a decoded length prefix may claim.
///
/// Anything above this is rejected before allocation with
/// [`SerializationError::OversizedPayload`].
pub const MAX_SIZE: u64 = 0x0200_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactInt(u64);

impl CompactInt {
    pub fn new() -> CompactInt {
        CompactInt(0)
    }

    pub fn from(value: usize) -> CompactInt {
        CompactInt(value as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the encoded size of a prefix for `value`.
    pub fn size(value: usize) -> usize {
        if value < 253 {
            1
        } else if value <= std::u16::MAX as usize {
            3
        } else if value <= std::u32::MAX as usize {
            5
        } else {
            9
        }
    }
}

impl Default for CompactInt {
    fn default() -> Self {
        CompactInt::new()
    }
}

impl ChainSerialize for CompactInt {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        if self.value() < 253 {
            target.write_all(&[self.value() as u8])
        } else if self.value() <= std::u16::MAX as u64 {
            target.write_all(&[253])?;
            target.write_u16::<LittleEndian>(self.value() as u16)
        } else if self.value() <= std::u32::MAX as u64 {
            target.write_all(&[254])?;
            target.write_u32::<LittleEndian>(self.value() as u32)
        } else {
            target.write_all(&[255])?;
            target.write_u64::<LittleEndian>(self.value())
        }
    }
}

impl ChainDeserialize for CompactInt {
    fn chain_deserialize<R: std::io::Read>(
        mut target: R,
    ) -> Result<CompactInt, SerializationError> {
        let first = u8::chain_deserialize(&mut target)?;
        let value = if first < 253 {
            first as u64
        } else if first == 253 {
            u16::chain_deserialize(&mut target)? as u64
        } else if first == 254 {
            u32::chain_deserialize(&mut target)? as u64
        } else {
            u64::chain_deserialize(&mut target)?
        };
        if value > MAX_SIZE {
            return Err(SerializationError::OversizedPayload(value));
        }
        Ok(CompactInt(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: u64) -> (Vec<u8>, u64) {
        let mut bytes = Vec::new();
        CompactInt(value).chain_serialize(&mut bytes).unwrap();
        let decoded = CompactInt::chain_deserialize(&bytes[..]).unwrap().value();
        (bytes, decoded)
    }

    #[test]
    fn one_byte_boundary() {
        let (bytes, decoded) = roundtrip(0xFC);
        assert_eq!(bytes, [0xFC]);
        assert_eq!(decoded, 0xFC);
    }

    #[test]
    fn three_byte_boundary() {
        let (bytes, decoded) = roundtrip(0xFD);
        assert_eq!(bytes, [0xFD, 0xFD, 0x00]);
        assert_eq!(decoded, 0xFD);
    }

    #[test]
    fn five_byte_form() {
        let (bytes, decoded) = roundtrip(0x0001_0000);
        assert_eq!(bytes, [0xFE, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(decoded, 0x0001_0000);
    }

    #[test]
    fn oversized_is_rejected() {
        let mut bytes = Vec::new();
        CompactInt(MAX_SIZE + 1).chain_serialize(&mut bytes).unwrap();
        match CompactInt::chain_deserialize(&bytes[..]) {
            Err(SerializationError::OversizedPayload(n)) => assert_eq!(n, MAX_SIZE + 1),
            other => panic!("expected OversizedPayload, got {:?}", other.map(|c| c.value())),
        }
    }
}
