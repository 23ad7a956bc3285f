#![allow(clippy::unit_arg)]
use crate::{
    compactint::CompactInt,
    serialization::{ChainDeserialize, ChainSerialize, SerializationError},
};
use std::{
    fmt,
    io::{self, Read},
};

/// An encoding of a locking or signature script.
#[derive(Clone, Default, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn new(bytes: Vec<u8>) -> Script {
        Script(bytes)
    }

    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl ChainSerialize for Script {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        CompactInt::from(self.0.len()).chain_serialize(&mut writer)?;
        writer.write_all(&self.0[..])?;
        Ok(())
    }
}

impl ChainDeserialize for Script {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = CompactInt::chain_deserialize(&mut reader)?.value();
        let mut bytes = Vec::new();
        reader.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(SerializationError::Parse("script body truncated"));
        }
        Ok(Script(bytes))
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;
    use crate::serialization::{ChainDeserialize, ChainSerialize};

    proptest! {
        #[test]
        fn script_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..520)) {
            let script = Script(bytes);

            let mut encoded = Vec::new();
            script.chain_serialize(&mut encoded)?;

            let other_script = Script::chain_deserialize(&encoded[..])?;

            prop_assert_eq![script, other_script];
        }
    }
}
