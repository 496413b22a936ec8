use super::Decode;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodingError {
    #[error("Malformed input: {0} ({1:?})")]
    MalformedInput(String, Vec<u8>),
    #[error("Enum kind: {0:?}")]
    InvalidEnumKind(Vec<u8>),
    #[error("unknown address type tag: {0:#04x}")]
    UnknownAddressType(u8),
    #[error("key does not belong to table {expected:#04x}")]
    WrongTable { expected: u8 },
}

// Helper method to create MalformedInput error with just a message
pub fn malformed_input<S: Into<String>>(msg: S, bytes: &[u8]) -> DecodingError {
    DecodingError::MalformedInput(msg.into(), bytes.to_vec())
}

pub type DecodingResult<'a, T> = Result<(T, &'a [u8]), DecodingError>;

impl<const N: usize> Decode for [u8; N] {
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self> {
        let (head, rest) = bytes
            .split_first_chunk::<N>()
            .ok_or_else(|| malformed_input("array insufficient bytes", bytes))?;

        Ok((*head, rest))
    }
}

impl Decode for u8 {
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self> {
        bytes
            .split_first()
            .map(|(b, rest)| (*b, rest))
            .ok_or_else(|| malformed_input("u8 insufficient bytes", bytes))
    }
}

impl Decode for bool {
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self> {
        let (byte, rest) = u8::decode(bytes)?;

        match byte {
            0 => Ok((false, rest)),
            1 => Ok((true, rest)),
            _ => Err(malformed_input("bool out of range", bytes)),
        }
    }
}

macro_rules! impl_uint_decode {
    ($t:ty) => {
        impl Decode for $t {
            fn decode(bytes: &[u8]) -> DecodingResult<'_, $t> {
                let (raw, rest) = <[u8; std::mem::size_of::<$t>()]>::decode(bytes)?;

                Ok((<$t>::from_be_bytes(raw), rest))
            }
        }
    };
}

impl_uint_decode!(u16);
impl_uint_decode!(u32);
impl_uint_decode!(u64);

impl Decode for () {
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self> {
        Ok(((), bytes))
    }
}

impl<A: Decode> Decode for Vec<A> {
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self> {
        let (len, mut bytes) = u32::decode(bytes)?;

        // cap the preallocation, the length prefix is untrusted
        let mut vec = Vec::with_capacity((len as usize).min(bytes.len()));

        for _ in 0..len {
            let (item, rest) = A::decode(bytes)?;
            bytes = rest;

            vec.push(item);
        }

        Ok((vec, bytes))
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self> {
        let (a, bytes) = A::decode(bytes)?;
        let (b, bytes) = B::decode(bytes)?;

        Ok(((a, b), bytes))
    }
}
