//! # Plain Values
//!
//! The structured value model and its canonical binary encoding. Action
//! payloads, transaction bodies and shard contents all travel as [`Value`]
//! trees encoded by [`codec`].

pub mod codec;
pub mod types;

pub use codec::{decode, encode, encode_into, ensure_encodable, CodecError};
pub use types::{Value, ValueMap};
