//! The instruction-level interface every backend implements.

use super::calling_convention::CallingConvention;
use super::CompilationError;
use crate::parser::module::ValType;

/// A position in the code that branches can target before it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Emits machine code for one function.
///
/// Memory operands are always relative to the stack pointer. Value widths
/// follow the [`ValType`]: 32-bit types use the 32-bit form of the register,
/// everything else the full 64-bit form.
pub trait MacroAssembler: Default {
    type CC: CallingConvention;

    fn new_label(&mut self) -> Label;

    /// Make `label` refer to the current position.
    fn bind(&mut self, label: Label) -> Result<(), CompilationError>;

    /// `sp -= bytes`
    fn reserve_stack(&mut self, bytes: u32) -> Result<(), CompilationError>;

    /// `sp += bytes`
    fn release_stack(&mut self, bytes: u32) -> Result<(), CompilationError>;

    /// `[sp + offset] = src`
    fn store(&mut self, src: Reg<Self>, ty: ValType, offset: i32) -> Result<(), CompilationError>;

    /// `dst = [sp + offset]`
    fn load(&mut self, dst: Reg<Self>, ty: ValType, offset: i32) -> Result<(), CompilationError>;

    /// `dst.32 = imm`
    fn mov_imm32(&mut self, dst: Reg<Self>, imm: i32) -> Result<(), CompilationError>;

    /// `dst = src`
    fn mov(&mut self, dst: Reg<Self>, src: Reg<Self>, ty: ValType) -> Result<(), CompilationError>;

    /// `dst.32 = dst.32 + src.32`, wrapping.
    fn add_i32(&mut self, dst: Reg<Self>, src: Reg<Self>) -> Result<(), CompilationError>;

    /// Unconditional jump to `label`.
    fn jmp(&mut self, label: Label) -> Result<(), CompilationError>;

    fn ret(&mut self) -> Result<(), CompilationError>;

    /// Resolve every branch and return the finished code.
    fn finish(self) -> Result<Vec<u8>, CompilationError>;
}

pub type Reg<A> = <<A as MacroAssembler>::CC as CallingConvention>::Reg;

/// Label bookkeeping shared by the backends.
///
/// Branches to a label that is not bound yet are recorded as fixups and
/// patched once the whole function has been emitted.
#[derive(Debug, Default)]
pub struct Labels {
    bound: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl Labels {
    pub fn create(&mut self) -> Label {
        self.bound.push(None);
        Label(self.bound.len() - 1)
    }

    pub fn bind(&mut self, label: Label, position: usize) -> Result<(), CompilationError> {
        let slot = self
            .bound
            .get_mut(label.0)
            .ok_or_else(|| CompilationError::Encoding(format!("unknown label {}", label.0)))?;
        if slot.is_some() {
            return Err(CompilationError::Encoding(format!(
                "label {} bound twice",
                label.0
            )));
        }
        *slot = Some(position);
        Ok(())
    }

    /// Record that the branch emitted at `at` targets `label`.
    pub fn add_fixup(&mut self, at: usize, label: Label) {
        self.fixups.push((at, label));
    }

    /// Every fixup with its resolved target, as `(at, target)`.
    pub fn resolve(&self) -> Result<Vec<(usize, usize)>, CompilationError> {
        self.fixups
            .iter()
            .map(|(at, label)| {
                self.bound
                    .get(label.0)
                    .copied()
                    .flatten()
                    .map(|target| (*at, target))
                    .ok_or_else(|| CompilationError::Encoding(format!("unbound label {}", label.0)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let mut labels = Labels::default();
        let a = labels.create();
        let b = labels.create();
        assert_ne!(a, b);

        labels.add_fixup(0, a);
        labels.add_fixup(5, b);
        labels.add_fixup(9, a);
        labels.bind(a, 20).expect("Failed to bind");
        assert!(labels.resolve().is_err());

        labels.bind(b, 30).expect("Failed to bind");
        assert_eq!(
            labels.resolve().expect("Failed to resolve"),
            vec![(0, 20), (5, 30), (9, 20)]
        );
        assert!(labels.bind(a, 40).is_err());
    }
}
