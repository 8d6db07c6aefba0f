//! Wrappers around `Box<[u8; LEN]>` and `Box<[u16; LEN]>` with `bincode::Decode`
//! implementations that deserialize directly into heap memory.
//!
//! The implementation that `#[derive(Decode)]` generates for boxed arrays builds the
//! array on the stack and then moves it to the heap, which overflows the stack when
//! restoring save states containing large buffers (VRAM, WORD-RAM, wave RAM).

use bincode::de::read::Reader;
use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::DecodeError;
use bincode::{BorrowDecode, Decode, Encode};
use std::ops::{Deref, DerefMut};

macro_rules! define_boxed_array {
    ($name:ident, $elem:ty, $decode_fn:ident) => {
        #[derive(Debug, Clone, Encode)]
        pub struct $name<const LEN: usize>(Box<[$elem; LEN]>);

        impl<const LEN: usize> $name<LEN> {
            #[must_use]
            #[allow(clippy::missing_panics_doc)]
            pub fn new() -> Self {
                Self(vec![0; LEN].into_boxed_slice().try_into().unwrap())
            }
        }

        impl<const LEN: usize> Default for $name<LEN> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<const LEN: usize> From<Box<[$elem; LEN]>> for $name<LEN> {
            fn from(value: Box<[$elem; LEN]>) -> Self {
                Self(value)
            }
        }

        impl<const LEN: usize> Deref for $name<LEN> {
            type Target = Box<[$elem; LEN]>;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<const LEN: usize> DerefMut for $name<LEN> {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }

        impl<const LEN: usize, Context> Decode<Context> for $name<LEN> {
            fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
                let mut array = Self::new();
                $decode_fn(decoder, array.0.as_mut())?;
                Ok(array)
            }
        }

        impl<'de, const LEN: usize, Context> BorrowDecode<'de, Context> for $name<LEN> {
            fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
                decoder: &mut D,
            ) -> Result<Self, DecodeError> {
                let mut array = Self::new();
                $decode_fn(decoder, array.0.as_mut())?;
                Ok(array)
            }
        }
    };
}

fn decode_bytes<Context, D: Decoder<Context = Context>>(
    decoder: &mut D,
    out: &mut [u8],
) -> Result<(), DecodeError> {
    decoder.reader().read(out)
}

fn decode_words<Context, D: Decoder<Context = Context>>(
    decoder: &mut D,
    out: &mut [u16],
) -> Result<(), DecodeError> {
    for value in out {
        *value = u16::decode(decoder)?;
    }

    Ok(())
}

define_boxed_array!(BoxedByteArray, u8, decode_bytes);
define_boxed_array!(BoxedWordArray, u16, decode_words);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut bytes: BoxedByteArray<1024> = BoxedByteArray::new();
        bytes[5] = 0xAB;
        bytes[1023] = 0xCD;

        let config = bincode::config::standard();
        let encoded = bincode::encode_to_vec(&bytes, config).unwrap();
        let (decoded, _): (BoxedByteArray<1024>, _) =
            bincode::decode_from_slice(&encoded, config).unwrap();
        assert_eq!(decoded[5], 0xAB);
        assert_eq!(decoded[1023], 0xCD);
        assert_eq!(decoded[0], 0);

        let mut words: BoxedWordArray<256> = BoxedWordArray::new();
        words[0] = 0x1234;
        words[255] = 0xFFFF;

        let encoded = bincode::encode_to_vec(&words, config).unwrap();
        let (decoded, _): (BoxedWordArray<256>, _) =
            bincode::decode_from_slice(&encoded, config).unwrap();
        assert_eq!(decoded[0], 0x1234);
        assert_eq!(decoded[255], 0xFFFF);
    }
}
