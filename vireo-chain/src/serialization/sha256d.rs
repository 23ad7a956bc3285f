//! The double-SHA-256 hash used for transaction ids, Merkle nodes and the
//! proof-of-stake kernel, plus the SHA-256/RIPEMD-160 combination used for
//! key and script hashes.

use sha2::{Digest, Sha256};

/// A type that lets you write out SHA256d (double-SHA-256).
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl std::io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Writer {
    /// Consume the Writer and produce the hash result.
    pub fn finish(self) -> [u8; 32] {
        let result1 = self.hash.finalize();
        let result2 = Sha256::digest(result1.as_slice());
        let mut buffer = [0u8; 32];
        buffer[0..32].copy_from_slice(&result2[0..32]);
        buffer
    }
}

/// Two rounds of SHA-256 over `data`.
pub fn hash256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first.as_slice());
    let mut buffer = [0u8; 32];
    buffer.copy_from_slice(&second[0..32]);
    buffer
}

/// SHA-256 followed by RIPEMD-160, as used for pay-to-pubkey-hash and
/// pay-to-script-hash destinations.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use digest::Digest as _;
    use ripemd160::Ripemd160;
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha.as_slice());
    let mut buffer = [0u8; 20];
    buffer.copy_from_slice(&ripe[0..20]);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_matches_one_shot_hash() {
        use std::io::Write;

        let mut writer = Writer::default();
        writer.write_all(b"vireo").unwrap();
        assert_eq!(writer.finish(), hash256(b"vireo"));
    }

    #[test]
    fn hash256_empty_vector() {
        // SHA256d("") from the original protocol documentation.
        assert_eq!(
            hex::encode(hash256(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }
}
