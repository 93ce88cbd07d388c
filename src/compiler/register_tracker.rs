use super::calling_convention::{CallingConvention, RegisterMask};

/// Hands out scratch registers while a function is being compiled.
///
/// Only caller-saved registers are ever handed out, so compiled code never
/// has to preserve anything for its caller.
pub struct RegisterTracker<CC: CallingConvention> {
    used: RegisterMask<CC::Reg>,
}

impl<CC: CallingConvention> RegisterTracker<CC> {
    pub fn new() -> Self {
        RegisterTracker {
            used: RegisterMask::empty(),
        }
    }

    /// Claim the first free register in pool order.
    pub fn take_unused(&mut self) -> Option<CC::Reg> {
        let reg = CC::GP_CALLER_SAVED
            .iter()
            .copied()
            .find(|reg| !self.used.test(*reg))?;
        self.used.set(reg);
        Some(reg)
    }

    pub fn mark_unused(&mut self, reg: CC::Reg) {
        self.used.reset(reg);
    }

    #[cfg(test)]
    fn is_used(&self, reg: CC::Reg) -> bool {
        self.used.test(reg)
    }
}

impl<CC: CallingConvention> Default for RegisterTracker<CC> {
    fn default() -> Self {
        Self::new()
    }
}
