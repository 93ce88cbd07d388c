//! Mapping between native Rust function types and WASM signatures.

use crate::parser::module::{FunctionSignature, ValType};
use std::mem;

/// A Rust type that can cross into compiled code as a single WASM value.
pub trait NativeType: Copy + 'static {
    const VAL_TYPE: ValType;
}

macro_rules! native_type {
    ($($ty:ty => $val:ident),* $(,)?) => {
        $(impl NativeType for $ty {
            const VAL_TYPE: ValType = ValType::$val;
        })*
    };
}

native_type! {
    i32 => I32,
    u32 => I32,
    i64 => I64,
    u64 => I64,
    f32 => F32,
    f64 => F64,
}

/// The result of a native function: nothing, or one [`NativeType`].
pub trait NativeResult: Copy + 'static {
    fn val_types() -> Vec<ValType>;
}

impl NativeResult for () {
    fn val_types() -> Vec<ValType> {
        vec![]
    }
}

impl<T: NativeType> NativeResult for T {
    fn val_types() -> Vec<ValType> {
        vec![T::VAL_TYPE]
    }
}

/// A tuple of arguments, and how to call compiled code with them.
pub trait NativeParams: 'static {
    fn val_types() -> Vec<ValType>;

    /// Call the function at `entry` with these arguments.
    ///
    /// # Safety
    ///
    /// `entry` must be executable code following the host C calling
    /// convention with the signature `extern "C" fn(Self...) -> R`.
    unsafe fn call<R: NativeResult>(self, entry: *const u8) -> R;
}

macro_rules! native_params {
    ($($name:ident),*) => {
        impl<$($name: NativeType),*> NativeParams for ($($name,)*) {
            fn val_types() -> Vec<ValType> {
                vec![$($name::VAL_TYPE),*]
            }

            #[allow(non_snake_case)]
            unsafe fn call<R: NativeResult>(self, entry: *const u8) -> R {
                let f: extern "C" fn($($name),*) -> R = mem::transmute(entry);
                let ($($name,)*) = self;
                f($($name),*)
            }
        }
    };
}

native_params!();
native_params!(A);
native_params!(A, B);
native_params!(A, B, C);
native_params!(A, B, C, D);
native_params!(A, B, C, D, E);
native_params!(A, B, C, D, E, F);

/// The WASM signature a compiled function must have to be called as
/// `fn(P) -> R`.
pub fn signature_of<P: NativeParams, R: NativeResult>() -> FunctionSignature {
    FunctionSignature {
        params: P::val_types(),
        results: R::val_types(),
    }
}
