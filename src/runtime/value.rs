//! WebAssembly value representation

use crate::parser::module::ValType;
use fhex::ToHex;
use std::fmt;

/// A raw 64-bit slot able to hold the bit pattern of any scalar value.
///
/// The slot does not remember its type; callers pair it with a [`ValType`]
/// where that matters. Conversions reinterpret bits and never coerce
/// numerically. 32-bit values live in the low half, zero-extended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Value {
    bits: u64,
}

impl Value {
    pub fn i32(v: i32) -> Self {
        Self::u32(v as u32)
    }

    pub fn u32(v: u32) -> Self {
        Value { bits: u64::from(v) }
    }

    pub fn i64(v: i64) -> Self {
        Self::u64(v as u64)
    }

    pub fn u64(v: u64) -> Self {
        Value { bits: v }
    }

    pub fn f32(v: f32) -> Self {
        Self::u32(v.to_bits())
    }

    pub fn f64(v: f64) -> Self {
        Self::u64(v.to_bits())
    }

    pub fn as_i32(&self) -> i32 {
        self.as_u32() as i32
    }

    pub fn as_u32(&self) -> u32 {
        self.bits as u32
    }

    pub fn as_i64(&self) -> i64 {
        self.bits as i64
    }

    pub fn as_u64(&self) -> u64 {
        self.bits
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.as_u32())
    }

    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.bits)
    }

    /// Render the value as the given type would print it; floats use
    /// hexadecimal float notation so that every bit is visible.
    pub fn format_as(&self, ty: ValType) -> String {
        match ty {
            ValType::I32 => self.as_i32().to_string(),
            ValType::I64 => self.as_i64().to_string(),
            ValType::F32 => self.as_f32().to_hex(),
            ValType::F64 => self.as_f64().to_hex(),
            ValType::V128 | ValType::FuncRef | ValType::ExternRef => self.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#018x}", self.bits)
    }
}
