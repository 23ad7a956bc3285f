use std::{fmt, io};

use scrypt::{scrypt, Params};

use crate::serialization::{ChainDeserialize, ChainSerialize, SerializationError};
use vireo_serde_derive::ChainSerialize;

use super::Header;

/// A hash of a block, used to identify blocks and link them into a chain.
///
/// This is the scrypt digest of the block *header*; since the header commits
/// to the Merkle root of the transaction tree, it binds the whole block. The
/// memory-hard parameters are consensus-critical and fixed.
///
/// Note: block hashes are displayed in big-endian byte order, following the
/// u256 convention set by the Bitcoin lineage.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, ChainSerialize)]
pub struct Hash(pub [u8; 32]);

/// The fixed scrypt cost parameters: `N = 1024 (log2 = 10), r = 1, p = 1`.
const SCRYPT_LOG_N: u8 = 10;
const SCRYPT_R: u32 = 1;
const SCRYPT_P: u32 = 1;

/// The scrypt hash of a serialized block header, salted with itself.
pub fn scrypt_blockhash(input: &[u8]) -> [u8; 32] {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P)
        .expect("hard-coded scrypt parameters are valid");
    let mut output = [0u8; 32];
    scrypt(input, input, &params, &mut output)
        .expect("32-byte output length is valid for scrypt");
    output
}

impl Hash {
    pub fn from_bytes_exact(bytes: [u8; 32]) -> Hash {
        Hash(bytes)
    }

    /// The all-zero hash, used as the previous-block reference of the
    /// genesis block.
    pub fn zero() -> Hash {
        Hash([0; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.write_str(&hex::encode(&reversed_bytes))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("block::Hash")
            .field(&hex::encode(&reversed_bytes))
            .finish()
    }
}

impl ChainDeserialize for Hash {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Hash(<[u8; 32]>::chain_deserialize(&mut reader)?))
    }
}

impl<'a> From<&'a Header> for Hash {
    fn from(header: &'a Header) -> Self {
        let bytes = header
            .chain_serialize_to_vec()
            .expect("serialization into a vec is infallible");
        Self(scrypt_blockhash(&bytes))
    }
}

impl std::str::FromStr for Hash {
    type Err = SerializationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; 32];
        if hex::decode_to_slice(s, &mut bytes[..]).is_err() {
            Err(SerializationError::Parse("hex decoding error"))
        } else {
            bytes.reverse();
            Ok(Hash(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrypt_hash_is_deterministic() {
        let header = [0x55u8; 80];
        assert_eq!(scrypt_blockhash(&header), scrypt_blockhash(&header));
        assert_ne!(scrypt_blockhash(&header), scrypt_blockhash(&[0x56u8; 80]));
    }

    #[test]
    fn display_reverses_byte_order() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0xab;
        assert!(Hash(bytes).to_string().starts_with("ab"));
    }
}
