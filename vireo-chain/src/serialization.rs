//! Consensus-critical serialization.
//!
//! This module contains the `ChainSerialize` and `ChainDeserialize` traits,
//! analogs of the Serde `Serialize` and `Deserialize` traits but intended for
//! the fixed, consensus-critical wire formats of blocks, transactions, coin
//! records and undo data. Fixed-width integers are little-endian; collections
//! are length-prefixed with a [`CompactInt`](crate::compactint::CompactInt).

mod deserialize;
mod error;

pub mod mpi;
pub mod sha256d;
pub mod varint;

pub use deserialize::{ChainDeserialize, ChainDeserializeInto};
pub use error::SerializationError;

use crate::compactint::CompactInt;
use byteorder::{LittleEndian, WriteBytesExt};

pub trait ChainSerialize {
    fn chain_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error>;

    fn chain_serialize_to_vec(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut data = Vec::new();
        self.chain_serialize(&mut data)?;
        Ok(data)
    }
}

impl ChainSerialize for bool {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(&[*self as u8])
    }
}

// A bare `u8` impl would make the generic `Vec<T>` impl overlap with the
// specialized `Vec<u8>` impl below, so single bytes go through a reference.
impl ChainSerialize for &u8 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(&[**self])
    }
}

impl ChainSerialize for u16 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u16::<LittleEndian>(*self)
    }
}

impl ChainSerialize for u32 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(*self)
    }
}

impl ChainSerialize for u64 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u64::<LittleEndian>(*self)
    }
}

impl ChainSerialize for i32 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i32::<LittleEndian>(*self)
    }
}

impl ChainSerialize for i64 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i64::<LittleEndian>(*self)
    }
}

impl ChainSerialize for &[u8] {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl ChainSerialize for [u8; 4] {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl ChainSerialize for [u8; 20] {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl ChainSerialize for [u8; 32] {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl ChainSerialize for Vec<u8> {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).chain_serialize(&mut target)?;
        target.write_all(self)?;
        Ok(())
    }
}

impl<T> ChainSerialize for Vec<T>
where
    T: ChainSerialize,
{
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).chain_serialize(&mut target)?;
        for item in self.iter() {
            item.chain_serialize(&mut target)?
        }
        Ok(())
    }
}

impl<T, U> ChainSerialize for (T, U)
where
    T: ChainSerialize,
    U: ChainSerialize,
{
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        self.0.chain_serialize(&mut target)?;
        self.1.chain_serialize(&mut target)?;
        Ok(())
    }
}

impl<T> ChainSerialize for std::sync::Arc<T>
where
    T: ChainSerialize,
{
    fn chain_serialize<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        T::chain_serialize(self, writer)
    }
}
