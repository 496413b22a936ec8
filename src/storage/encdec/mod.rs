pub mod decode;
pub mod encode;

use std::ops::Range;

pub use decode::{DecodingError, DecodingResult};

/// Byte encoding used for every key and value in storage.
///
/// Integers are fixed-width big-endian so that byte-wise comparison of encoded keys matches the
/// numeric order of the fields they were built from.
pub trait Encode {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decode
where
    Self: Sized,
{
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self>;

    /// `decode` but ignoring, and not returning, any remaining bytes
    fn decode_all(bytes: &[u8]) -> Result<Self, DecodingError> {
        Self::decode(bytes).map(|x| x.0)
    }

    /// `decode` which fails if any bytes are left over
    fn decode_exact(bytes: &[u8]) -> Result<Self, DecodingError> {
        let (value, rest) = Self::decode(bytes)?;

        if !rest.is_empty() {
            return Err(decode::malformed_input("trailing bytes", rest));
        }

        Ok(value)
    }
}

#[derive(Default, Clone)]
pub struct EncodeBuilder {
    output: Vec<u8>,
}

impl EncodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<T: Encode + ?Sized>(mut self, data: &T) -> Self {
        self.output.extend(data.encode());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.output
    }
}

/// Range covering every key which starts with `prefix`
pub fn prefix_key_range(prefix: &[u8]) -> Range<Vec<u8>> {
    let start = prefix.to_vec();
    let mut end = prefix.to_vec();

    // Work backwards to handle the case where the last byte(s) are 255
    for i in (0..end.len()).rev() {
        if end[i] != 255 {
            end[i] += 1;
            end.truncate(i + 1);
            return start..end;
        }
    }

    // If all bytes are 255, the range is unbounded at the upper end
    start..vec![]
}
