use super::Encode;

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl Encode for u8 {
    fn encode(&self) -> Vec<u8> {
        vec![*self]
    }
}

impl Encode for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

macro_rules! impl_uint_encode {
    ($type:ty) => {
        impl Encode for $type {
            fn encode(&self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }
        }
    };
}

impl_uint_encode!(u16);
impl_uint_encode!(u32);
impl_uint_encode!(u64);

impl Encode for () {
    fn encode(&self) -> Vec<u8> {
        vec![]
    }
}

/// Length-prefixed (u32) sequence
impl<A: Encode> Encode for Vec<A> {
    fn encode(&self) -> Vec<u8> {
        [
            (self.len() as u32).encode(),
            self.iter().flat_map(|t| t.encode()).collect(),
        ]
        .concat()
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode(&self) -> Vec<u8> {
        [self.0.encode(), self.1.encode()].concat()
    }
}

impl<A: Encode, B: Encode, C: Encode> Encode for (A, B, C) {
    fn encode(&self) -> Vec<u8> {
        [self.0.encode(), self.1.encode(), self.2.encode()].concat()
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self) -> Vec<u8> {
        (*self).encode()
    }
}
