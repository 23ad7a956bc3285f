use std::io;

use thiserror::Error;

/// A serialization error.
#[derive(Error, Debug)]
pub enum SerializationError {
    /// An io error that prevented deserialization
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The data to be deserialized was malformed.
    #[error("parse error: {0}")]
    Parse(&'static str),
    /// A decoded length prefix exceeded the maximum allowed allocation.
    #[error("oversized payload: {0} bytes")]
    OversizedPayload(u64),
}
