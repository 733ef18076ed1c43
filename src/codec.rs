//! Leaf value codecs.
//!
//! Store values are opaque strings; a codec turns them into typed values and
//! back.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Encoding between typed values and store-compatible strings.
pub trait Codec: Send + Sync + 'static {
    /// Decode a raw store value.
    fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<T>;

    /// Encode a value for storage.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String>;
}

/// JSON leaf encoding (the default).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(Into::into)
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(Into::into)
    }
}
