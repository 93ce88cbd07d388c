use crate::parser::module::ValType;

/// A WASM operand as the compiler sees it: a value in a register, in its
/// stack slot, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeValue<R> {
    /// Byte offset from the bottom of the operand area to just past this
    /// value's slot. Assigned by [`RuntimeStack::push`].
    pub stack_pointer: i32,
    pub reg: Option<R>,
    pub ty: ValType,
}

impl<R> RuntimeValue<R> {
    pub fn new(ty: ValType) -> Self {
        RuntimeValue {
            stack_pointer: 0,
            reg: None,
            ty,
        }
    }

    pub fn size_bytes(&self) -> i32 {
        self.ty.size_bytes() as i32
    }

    /// Offset from the stack pointer of the slot this value spills to.
    pub fn slot_offset(&self) -> i32 {
        self.stack_pointer - self.size_bytes()
    }
}

/// The operand stack at the current point of compilation.
///
/// Tracks where each operand lives and the byte layout of the spill slots.
/// Depth is bounded by the validator, so pushes never run past the frame.
pub struct RuntimeStack<R> {
    values: Vec<RuntimeValue<R>>,
    offset: i32,
}

impl<R: Copy> RuntimeStack<R> {
    pub fn with_capacity(max_elements: usize) -> Self {
        RuntimeStack {
            values: Vec::with_capacity(max_elements),
            offset: 0,
        }
    }

    pub fn push(&mut self, mut value: RuntimeValue<R>) -> &mut RuntimeValue<R> {
        self.offset += value.size_bytes();
        value.stack_pointer = self.offset;
        self.values.push(value);
        let last = self.values.len() - 1;
        &mut self.values[last]
    }

    pub fn pop(&mut self) -> Option<RuntimeValue<R>> {
        let value = self.values.pop()?;
        self.offset -= value.size_bytes();
        Some(value)
    }

    pub fn peek(&self) -> Option<&RuntimeValue<R>> {
        self.values.last()
    }

    pub fn peek_mut(&mut self) -> Option<&mut RuntimeValue<R>> {
        self.values.last_mut()
    }

    /// Iterate from the bottom of the stack to the top.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RuntimeValue<R>> {
        self.values.iter_mut()
    }

    /// The current offset in bytes from the bottom of the operand area.
    #[cfg(test)]
    fn pointer(&self) -> i32 {
        self.offset
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.values.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = RuntimeStack::<u8>::with_capacity(3);
        assert!(stack.is_empty());

        let top = stack.push(RuntimeValue::new(ValType::I32));
        assert_eq!(top.stack_pointer, 4);
        assert_eq!(top.slot_offset(), 0);
        top.reg = Some(2);

        let top = stack.push(RuntimeValue::new(ValType::I64));
        assert_eq!(top.stack_pointer, 12);
        assert_eq!(top.slot_offset(), 4);

        stack.push(RuntimeValue::new(ValType::I32));
        assert_eq!(stack.pointer(), 16);
        assert_eq!(stack.len(), 3);

        let v = stack.pop().expect("empty stack");
        assert_eq!(v.ty, ValType::I32);
        assert_eq!(stack.pointer(), 12);
        assert_eq!(stack.peek().map(|v| v.ty), Some(ValType::I64));

        stack.pop();
        let bottom = stack.pop().expect("empty stack");
        assert_eq!(bottom.reg, Some(2));
        assert_eq!(stack.pointer(), 0);
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_slots_are_reused() {
        let mut stack = RuntimeStack::<u8>::with_capacity(2);
        stack.push(RuntimeValue::new(ValType::I32));
        let first = stack.push(RuntimeValue::new(ValType::I32)).stack_pointer;
        stack.pop();
        let second = stack.push(RuntimeValue::new(ValType::I32)).stack_pointer;
        assert_eq!(first, second);
    }

    #[test]
    fn test_iterates_bottom_to_top() {
        let mut stack = RuntimeStack::<u8>::with_capacity(3);
        for ty in [ValType::I32, ValType::I64, ValType::F32] {
            stack.push(RuntimeValue::new(ty));
        }
        if let Some(top) = stack.peek_mut() {
            top.reg = Some(9);
        }
        let types: Vec<_> = stack.iter_mut().map(|v| v.ty).collect();
        assert_eq!(types, vec![ValType::I32, ValType::I64, ValType::F32]);
        let pointers: Vec<_> = stack.iter_mut().map(|v| v.stack_pointer).collect();
        assert_eq!(pointers, vec![4, 12, 16]);
        assert_eq!(stack.peek().and_then(|v| v.reg), Some(9));
    }
}
