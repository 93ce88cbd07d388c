use super::calling_convention::CallingConvention;
use crate::parser::module::{FunctionMetadata, ValType};
use std::marker::PhantomData;

pub(crate) fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// The native stack frame of one compiled function.
///
/// Everything is known ahead of time: the validator bounds the operand
/// stack and the locals are declared up front. The frame is reserved in one
/// step by the prologue and addressed relative to the stack pointer.
///
/// Locals (parameters first) sit at the top of the frame, nearest the return
/// address. Operand stack slots start at the bottom and grow upward toward
/// them.
///
/// ```text
///  sp + frame ┌──────────────┐
///             │    LOCALS    │
///             ├──────────────┤ sp + locals_base
///             │   (unused)   │
///             │      ▲       │
///             │  OPERANDS    │
///  sp + 0     └──────────────┘
/// ```
pub struct FunctionFrame<CC> {
    local_offsets: Vec<i32>,
    stack_size_bytes: u32,
    _cc: PhantomData<CC>,
}

impl<CC: CallingConvention> FunctionFrame<CC> {
    pub fn new(meta: &FunctionMetadata) -> Self {
        let local_types: Vec<ValType> = meta
            .signature
            .params
            .iter()
            .chain(meta.locals.iter())
            .copied()
            .collect();

        let mut offsets = Vec::with_capacity(local_types.len());
        let mut size = 0;
        let mut max_align = 1;
        for ty in &local_types {
            let align = ty.size_bytes() as u32;
            size = align_up(size, align);
            offsets.push(size);
            size += align;
            max_align = max_align.max(align);
        }
        let locals_size_bytes = align_up(size, max_align);
        let stack_size_bytes = align_up(
            locals_size_bytes + meta.max_stack_size_bytes,
            CC::STACK_ALIGNMENT,
        );
        let base = stack_size_bytes - locals_size_bytes;

        FunctionFrame {
            local_offsets: offsets.into_iter().map(|o| (base + o) as i32).collect(),
            stack_size_bytes,
            _cc: PhantomData,
        }
    }

    /// Bytes the prologue subtracts from the stack pointer.
    pub fn stack_size_bytes(&self) -> u32 {
        self.stack_size_bytes
    }

    /// Offset of a local from the stack pointer, or `None` if out of range.
    pub fn local_offset(&self, idx: u32) -> Option<i32> {
        self.local_offsets.get(idx as usize).copied()
    }
}
