//! The compact difficulty encoding and its 256-bit expansion.
//!
//! A compact difficulty is `size(8) | mantissa(24)`: the high byte is the
//! width of the encoded magnitude in bytes, the low three bytes are the most
//! significant bytes of the magnitude, and bit 23 of the mantissa carries the
//! sign. The encoding is canonical: a mantissa whose sign bit would be set is
//! shifted right one byte and the size incremented instead.

use std::{cmp::Ordering, fmt};

use primitive_types::{U256, U512};

use crate::{block, ChainDeserialize, ChainSerialize, SerializationError};

/// A difficulty target in compact form, as carried in a block header.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CompactDifficulty(pub u32);

/// A difficulty target expanded to its full 256-bit form.
///
/// Greater values represent *less* work: a block hash must be numerically
/// at or below the target for the proof to pass.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExpandedDifficulty(U256);

impl CompactDifficulty {
    /// The mantissa sign bit.
    const SIGN_BIT: u32 = 0x0080_0000;
    const MANTISSA_MASK: u32 = 0x007f_ffff;

    /// Expand this compact value into a 256-bit target.
    ///
    /// Returns `None` for zero, negative, and overflowing encodings, which
    /// are invalid as difficulty targets.
    pub fn to_expanded(self) -> Option<ExpandedDifficulty> {
        let size = (self.0 >> 24) as usize;
        if self.0 & Self::SIGN_BIT != 0 {
            return None;
        }
        let mantissa = self.0 & Self::MANTISSA_MASK;
        if mantissa == 0 {
            return None;
        }

        let result = if size <= 3 {
            U256::from(mantissa >> (8 * (3 - size)))
        } else {
            if size > 34 {
                return None;
            }
            // The mantissa occupies the top three bytes of a size-byte
            // magnitude.
            let power = U256::one() << (8 * (size - 3));
            U256::from(mantissa).checked_mul(power)?
        };
        if result == U256::zero() {
            None
        } else {
            Some(ExpandedDifficulty(result))
        }
    }
}

impl ExpandedDifficulty {
    pub fn from_u256(value: U256) -> ExpandedDifficulty {
        ExpandedDifficulty(value)
    }

    pub fn to_u256(self) -> U256 {
        self.0
    }

    /// The upper bound on targets for `network`: `2^256 >> shift`.
    pub fn target_difficulty_limit(network: crate::parameters::Network) -> ExpandedDifficulty {
        ExpandedDifficulty(U256::max_value() >> network.target_limit_shift())
    }

    /// Compress this target into compact form.
    pub fn to_compact(self) -> CompactDifficulty {
        let mut size = (self.0.bits() + 7) / 8;
        let mut compact = if size <= 3 {
            self.0.low_u32() << (8 * (3 - size))
        } else {
            (self.0 >> (8 * (size - 3))).low_u32()
        };
        // Canonical form: a mantissa with the sign bit set moves one byte
        // into the size field.
        if compact & CompactDifficulty::SIGN_BIT != 0 {
            compact >>= 8;
            size += 1;
        }
        CompactDifficulty(compact | (size as u32) << 24)
    }

    /// The chain-trust contribution of a block with this target:
    /// `2^256 / (target + 1)`.
    pub fn block_trust(self) -> U256 {
        // 2^256 is not representable, so compute
        // (~target / (target + 1)) + 1 instead.
        let target = self.0;
        (!target / (target.saturating_add(U256::one()))) + U256::one()
    }

    /// The product `self * factor`, widened to 512 bits.
    ///
    /// Kernel admission compares a 256-bit hash against a target scaled by
    /// coin-day weight; the scaled target routinely exceeds 256 bits.
    pub fn scale(self, factor: U256) -> U512 {
        self.0.full_mul(factor)
    }
}

/// Zero-extend a 256-bit value to 512 bits.
pub fn widen(value: U256) -> U512 {
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes[32..]);
    U512::from_big_endian(&bytes)
}

impl fmt::Debug for CompactDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("CompactDifficulty")
            .field(&format_args!("{:#010x}", self.0))
            .finish()
    }
}

impl fmt::Debug for ExpandedDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut buf = [0u8; 32];
        self.0.to_big_endian(&mut buf);
        f.debug_tuple("ExpandedDifficulty")
            .field(&hex::encode(&buf))
            .finish()
    }
}

impl ChainSerialize for CompactDifficulty {
    fn chain_serialize<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        self.0.chain_serialize(writer)
    }
}

impl ChainDeserialize for CompactDifficulty {
    fn chain_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(CompactDifficulty(u32::chain_deserialize(reader)?))
    }
}

impl From<block::Hash> for ExpandedDifficulty {
    /// A block hash, read as the 256-bit little-endian number it commits to.
    fn from(hash: block::Hash) -> Self {
        ExpandedDifficulty(U256::from_little_endian(&hash.0))
    }
}

impl PartialEq<block::Hash> for ExpandedDifficulty {
    fn eq(&self, other: &block::Hash) -> bool {
        self.0 == U256::from_little_endian(&other.0)
    }
}

impl PartialOrd<block::Hash> for ExpandedDifficulty {
    fn partial_cmp(&self, other: &block::Hash) -> Option<Ordering> {
        self.0.partial_cmp(&U256::from_little_endian(&other.0))
    }
}

impl PartialEq<ExpandedDifficulty> for block::Hash {
    fn eq(&self, other: &ExpandedDifficulty) -> bool {
        other == self
    }
}

impl PartialOrd<ExpandedDifficulty> for block::Hash {
    fn partial_cmp(&self, other: &ExpandedDifficulty) -> Option<Ordering> {
        U256::from_little_endian(&self.0).partial_cmp(&other.0)
    }
}
