//! Registers and the calling conventions that assign them roles.

use std::fmt;
use std::marker::PhantomData;

/// A general purpose machine register.
///
/// `id` is the hardware encoding, which is what the assemblers emit and what
/// [`RegisterMask`] indexes by.
pub trait Register: Copy + Eq + fmt::Debug + 'static {
    fn id(self) -> u8;
}

/// A set of registers from one register file, as a bitmask over their ids.
///
/// A register file never has more than 32 members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMask<R> {
    bits: u32,
    _reg: PhantomData<R>,
}

impl<R: Register> RegisterMask<R> {
    pub const fn empty() -> Self {
        RegisterMask {
            bits: 0,
            _reg: PhantomData,
        }
    }

    pub fn from_registers(regs: &[R]) -> Self {
        let mut mask = Self::empty();
        for reg in regs {
            mask.set(*reg);
        }
        mask
    }

    pub fn set(&mut self, reg: R) {
        self.bits |= 1u32 << reg.id();
    }

    pub fn reset(&mut self, reg: R) {
        self.bits &= !(1u32 << reg.id());
    }

    pub fn test(&self, reg: R) -> bool {
        self.bits & (1u32 << reg.id()) != 0
    }

    #[cfg(test)]
    fn len(&self) -> u32 {
        self.bits.count_ones()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.bits == 0
    }

    #[cfg(test)]
    fn intersects(&self, other: &Self) -> bool {
        self.bits & other.bits != 0
    }
}

/// How a platform passes arguments and which registers survive a call.
///
/// The register lists are in ascending id order. Allocation walks
/// `GP_CALLER_SAVED` front to back, so generated code is free to clobber
/// everything it hands out.
pub trait CallingConvention: 'static {
    type Reg: Register;

    /// The stack pointer.
    const SP: Self::Reg;

    /// Registers carrying integer and reference arguments, in order.
    const GP_ARGS: &'static [Self::Reg];

    /// Registers carrying integer and reference results, in order.
    const GP_RETS: &'static [Self::Reg];

    const GP_CALLER_SAVED: &'static [Self::Reg];
    const GP_CALLEE_SAVED: &'static [Self::Reg];

    /// The stack pointer is a multiple of this at every call boundary.
    const STACK_ALIGNMENT: u32 = 16;
}

/// Checks every calling convention should pass.
#[cfg(test)]
pub(crate) fn check_convention<CC: CallingConvention>() {
    let caller = RegisterMask::from_registers(CC::GP_CALLER_SAVED);
    let callee = RegisterMask::from_registers(CC::GP_CALLEE_SAVED);
    assert!(!caller.intersects(&callee));
    assert_eq!(caller.len() as usize, CC::GP_CALLER_SAVED.len());
    assert!(!caller.test(CC::SP));
    assert!(!callee.test(CC::SP));
    for reg in CC::GP_ARGS.iter().chain(CC::GP_RETS) {
        assert!(caller.test(*reg), "{reg:?} must be caller saved");
    }
    for regs in [CC::GP_CALLER_SAVED, CC::GP_CALLEE_SAVED] {
        assert!(regs.windows(2).all(|w| w[0].id() < w[1].id()));
    }
    assert!(CC::STACK_ALIGNMENT.is_power_of_two());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct R(u8);

    impl Register for R {
        fn id(self) -> u8 {
            self.0
        }
    }

    #[test]
    fn test_mask() {
        let mut mask = RegisterMask::<R>::empty();
        assert!(mask.is_empty());

        mask.set(R(0));
        mask.set(R(31));
        assert!(mask.test(R(0)));
        assert!(mask.test(R(31)));
        assert!(!mask.test(R(1)));
        assert_eq!(mask.len(), 2);

        mask.reset(R(0));
        assert!(!mask.test(R(0)));
        assert_eq!(mask.len(), 1);

        let other = RegisterMask::from_registers(&[R(3), R(31)]);
        assert!(mask.intersects(&other));
        assert!(!RegisterMask::from_registers(&[R(4)]).intersects(&other));
    }
}
