//! Variable-length integer coding as used throughout the binary format.
//!
//! Each byte carries seven payload bits, least significant group first, with
//! the high bit set on every byte except the last.

use super::reader::{Stream, StreamError};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("leb128 value does not fit in {bits} bits")]
    Overflow { bits: u32 },

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// An integer type with a LEB128 representation.
///
/// Values travel through a `u64` holding the two's complement bits; signed
/// types are sign-extended into it.
pub trait LebInteger: Copy {
    const BITS: u32;
    const SIGNED: bool;

    fn from_bits(bits: u64) -> Self;
    fn to_bits(self) -> u64;
}

macro_rules! leb_integer {
    ($t:ty, $signed:expr, $wide:ty) => {
        impl LebInteger for $t {
            const BITS: u32 = <$t>::BITS;
            const SIGNED: bool = $signed;

            fn from_bits(bits: u64) -> Self {
                bits as $t
            }

            fn to_bits(self) -> u64 {
                self as $wide as u64
            }
        }
    };
}

leb_integer!(u32, false, u64);
leb_integer!(u64, false, u64);
leb_integer!(i32, true, i64);
leb_integer!(i64, true, i64);

/// Decode one value of type `T`.
///
/// Fails with [`DecodeError::Overflow`] when the continuation bit is still
/// set once `T::BITS` bits have been read.
pub fn decode<T, S>(stream: &mut S) -> Result<T, DecodeError>
where
    T: LebInteger,
    S: Stream + ?Sized,
{
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let mut byte: u8;
    loop {
        byte = stream.read_byte()?;
        result |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 || shift >= T::BITS {
            break;
        }
    }
    if byte & 0x80 != 0 {
        return Err(DecodeError::Overflow { bits: T::BITS });
    }
    if T::SIGNED && shift < T::BITS && byte & 0x40 != 0 {
        result |= !0u64 << shift;
    }
    Ok(T::from_bits(result))
}

/// Encode `value` using the fewest bytes possible.
pub fn encode<T: LebInteger>(value: T) -> Vec<u8> {
    let mut result = Vec::with_capacity(((T::BITS + 6) / 7) as usize);
    if T::SIGNED {
        let mut value = value.to_bits() as i64;
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0) {
                result.push(byte);
                break;
            }
            result.push(byte | 0x80);
        }
    } else {
        let mut value = value.to_bits();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                result.push(byte);
                break;
            }
            result.push(byte | 0x80);
        }
    }
    result
}
