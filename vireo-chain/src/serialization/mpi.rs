//! Big-endian MPI encoding of unsigned 256-bit integers.
//!
//! The format is a 4-byte big-endian length prefix followed by the magnitude
//! bytes, most significant first; the top bit of the first magnitude byte is
//! reserved for the sign, so non-negative values whose leading byte would set
//! it gain an extra zero byte. The store uses this encoding to persist
//! chain-trust values.

use primitive_types::U256;

use super::SerializationError;

/// Encode a non-negative 256-bit value.
pub fn encode_mpi(value: &U256) -> Vec<u8> {
    let mut magnitude = [0u8; 32];
    value.to_big_endian(&mut magnitude);
    let start = magnitude.iter().position(|&b| b != 0).unwrap_or(32);
    let mut body: Vec<u8> = Vec::with_capacity(33 - start);
    // Reserve the sign bit of the first magnitude byte.
    if start < 32 && magnitude[start] & 0x80 != 0 {
        body.push(0);
    }
    body.extend_from_slice(&magnitude[start..]);

    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Decode an MPI-encoded value. Negative values and magnitudes wider than
/// 256 bits are rejected.
pub fn decode_mpi(bytes: &[u8]) -> Result<U256, SerializationError> {
    if bytes.len() < 4 {
        return Err(SerializationError::Parse("mpi length prefix truncated"));
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let body = &bytes[4..];
    if body.len() != len {
        return Err(SerializationError::Parse("mpi magnitude truncated"));
    }
    if len == 0 {
        return Ok(U256::zero());
    }
    if body[0] & 0x80 != 0 {
        return Err(SerializationError::Parse("negative mpi value"));
    }
    let magnitude = match body.iter().position(|&b| b != 0) {
        Some(first) => &body[first..],
        None => return Ok(U256::zero()),
    };
    if magnitude.len() > 32 {
        return Err(SerializationError::Parse("mpi magnitude exceeds 256 bits"));
    }
    Ok(U256::from_big_endian(magnitude))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_empty_magnitude() {
        assert_eq!(encode_mpi(&U256::zero()), [0, 0, 0, 0]);
        assert_eq!(decode_mpi(&[0, 0, 0, 0]).unwrap(), U256::zero());
    }

    #[test]
    fn sign_bit_gets_padding_byte() {
        // 0x80 needs a leading zero so the sign bit stays clear.
        let encoded = encode_mpi(&U256::from(0x80u64));
        assert_eq!(encoded, [0, 0, 0, 2, 0x00, 0x80]);
        assert_eq!(decode_mpi(&encoded).unwrap(), U256::from(0x80u64));
    }

    #[test]
    fn roundtrip() {
        for value in &[
            U256::from(1u64),
            U256::from(0x7Fu64),
            U256::from(u64::max_value()),
            U256::max_value(),
        ] {
            assert_eq!(decode_mpi(&encode_mpi(value)).unwrap(), *value);
        }
    }

    #[test]
    fn negative_rejected() {
        assert!(decode_mpi(&[0, 0, 0, 1, 0x81]).is_err());
    }
}
