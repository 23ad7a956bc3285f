//! Core chain data structures and consensus-critical serialization for the
//! Vireo proof-of-stake network.
//!
//! This crate defines the block, transaction and coin models shared by the
//! state and consensus crates, together with the primitive codecs they are
//! built on: double-SHA-256 hashing, the scrypt header hash, compact-size
//! and base-128 variable-length integers, the compact difficulty encoding,
//! and the script engine.

#![allow(clippy::unit_arg)]

#[macro_use]
extern crate serde;

pub mod amount;
pub mod block;
pub mod cached;
pub mod coins;
pub mod compactint;
pub mod fmt;
pub mod parameters;
pub mod script;
pub mod serialization;
pub mod transaction;
pub mod transparent;
pub mod work;

pub use cached::Cached;
pub use compactint::CompactInt;
pub use serialization::{
    ChainDeserialize, ChainDeserializeInto, ChainSerialize, SerializationError,
};
