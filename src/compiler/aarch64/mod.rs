//! The AArch64 backend, targeting AAPCS64. Apple platforms follow the same
//! register roles.

mod assembler;

pub use assembler::Assembler;

use super::calling_convention::{CallingConvention, Register};

/// The 64-bit general purpose registers, by hardware number.
///
/// Number 31 encodes either the stack pointer or the zero register depending
/// on the instruction; only the stack pointer meaning is used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    X0 = 0,
    X1,
    X2,
    X3,
    X4,
    X5,
    X6,
    X7,
    X8,
    X9,
    X10,
    X11,
    X12,
    X13,
    X14,
    X15,
    X16,
    X17,
    X18,
    X19,
    X20,
    X21,
    X22,
    X23,
    X24,
    X25,
    X26,
    X27,
    X28,
    X29,
    X30,
    Sp,
}

impl Register for Reg {
    fn id(self) -> u8 {
        self as u8
    }
}

pub struct Aapcs64;

impl CallingConvention for Aapcs64 {
    type Reg = Reg;

    const SP: Reg = Reg::Sp;
    const GP_ARGS: &'static [Reg] = &[
        Reg::X0,
        Reg::X1,
        Reg::X2,
        Reg::X3,
        Reg::X4,
        Reg::X5,
        Reg::X6,
        Reg::X7,
    ];
    const GP_RETS: &'static [Reg] = &[Reg::X0, Reg::X1];
    // x8 is the indirect result register, x16-x18 belong to the linker and
    // the platform.
    const GP_CALLER_SAVED: &'static [Reg] = &[
        Reg::X0,
        Reg::X1,
        Reg::X2,
        Reg::X3,
        Reg::X4,
        Reg::X5,
        Reg::X6,
        Reg::X7,
        Reg::X9,
        Reg::X10,
        Reg::X11,
        Reg::X12,
        Reg::X13,
        Reg::X14,
        Reg::X15,
    ];
    const GP_CALLEE_SAVED: &'static [Reg] = &[
        Reg::X19,
        Reg::X20,
        Reg::X21,
        Reg::X22,
        Reg::X23,
        Reg::X24,
        Reg::X25,
        Reg::X26,
        Reg::X27,
        Reg::X28,
        Reg::X29,
    ];
}

#[test]
fn test_aapcs64() {
    super::calling_convention::check_convention::<Aapcs64>();
    assert_eq!(Reg::Sp.id(), 31);
    assert_eq!(Reg::X30.id(), 30);
}
