use super::instruction::Instruction;
use super::module::{FunctionSignature, ValType};
use std::fmt;
use std::mem;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: ValidationType,
        actual: ValidationType,
    },

    #[error("pop from an empty stack")]
    StackUnderflow,

    #[error("unknown local: {0}")]
    UnknownLocal(u32),

    #[error("local {idx} has type {actual}, expected {expected}")]
    LocalTypeMismatch {
        idx: u32,
        expected: ValType,
        actual: ValType,
    },

    #[error("{0} value(s) left on the stack at return")]
    ExtraValuesOnStack(usize),

    #[error("unimplemented instruction: {0}")]
    Unimplemented(&'static str),
}

/// The types an instruction can consume or produce.
///
/// Some instructions are polymorphic, so on top of every [`ValType`] there
/// are two wildcards: `Any` (what unreachable code pops) and `AnyRef` (either
/// reference type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationType {
    Val(ValType),
    Any,
    AnyRef,
}

impl ValidationType {
    pub fn is_any(self) -> bool {
        self == ValidationType::Any
    }

    pub fn is_ref(self) -> bool {
        match self {
            ValidationType::Val(vt) => vt.is_ref(),
            ValidationType::AnyRef => true,
            ValidationType::Any => false,
        }
    }

    pub fn size_bytes(self) -> usize {
        match self {
            // assume the worst case for the wildcard
            ValidationType::Any => mem::size_of::<u64>() * 2,
            ValidationType::AnyRef => mem::size_of::<usize>(),
            ValidationType::Val(vt) => vt.size_bytes(),
        }
    }

    /// Whether a value of type `actual` satisfies an expectation of `self`.
    fn accepts(self, actual: ValidationType) -> bool {
        if self.is_any() || actual.is_any() {
            return true;
        }
        if self == ValidationType::AnyRef {
            return actual.is_ref();
        }
        self == actual
    }
}

impl From<ValType> for ValidationType {
    fn from(vt: ValType) -> Self {
        ValidationType::Val(vt)
    }
}

impl fmt::Display for ValidationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValidationType::Val(vt) => write!(f, "{vt}"),
            ValidationType::Any => write!(f, "{{any}}"),
            ValidationType::AnyRef => write!(f, "{{anyref}}"),
        }
    }
}

/// Checks that the operand stack of one function is used soundly.
///
/// Instructions are fed in one at a time as they are decoded. Along the way
/// the validator records the deepest the stack ever gets, both in elements
/// and in bytes, which is what the compiler reserves in the native frame.
pub struct FunctionValidator {
    /// Parameters followed by declared locals.
    locals: Vec<ValType>,
    returns: Vec<ValType>,
    unreachable: bool,

    stack: Vec<ValidationType>,
    current_stack_bytes: usize,
    max_stack_elements: usize,
    max_stack_bytes: usize,
}

impl FunctionValidator {
    pub fn new(signature: &FunctionSignature, locals: &[ValType]) -> Self {
        let mut all_locals = signature.params.clone();
        all_locals.extend_from_slice(locals);
        FunctionValidator {
            locals: all_locals,
            returns: signature.results.clone(),
            unreachable: false,
            stack: vec![],
            current_stack_bytes: 0,
            max_stack_elements: 0,
            max_stack_bytes: 0,
        }
    }

    /// The maximum number of elements that are ever on the stack at once.
    pub fn maximum_stack_elements(&self) -> usize {
        self.max_stack_elements
    }

    /// The maximum number of bytes the stack occupies at runtime.
    pub fn maximum_stack_size_bytes(&self) -> usize {
        self.max_stack_bytes
    }

    pub fn validate(&mut self, inst: &Instruction) -> Result<(), ValidationError> {
        match inst {
            Instruction::ConstI32(_) => self.push(ValType::I32.into()),
            Instruction::AddI32 => {
                self.pop(ValType::I32.into())?;
                self.pop(ValType::I32.into())?;
                self.push(ValType::I32.into());
            }
            Instruction::GetLocalI32(idx) => {
                self.assert_local(*idx, ValType::I32)?;
                self.push(ValType::I32.into());
            }
            Instruction::SetLocalI32(idx) => {
                self.pop(ValType::I32.into())?;
                self.assert_local(*idx, ValType::I32)?;
            }
            Instruction::Return => {
                self.pop_returns()?;
                self.assert_empty()?;
                self.unreachable = true;
            }
            Instruction::Label(_) | Instruction::Br(_) | Instruction::BrIf { .. } => {
                return Err(ValidationError::Unimplemented(inst.mnemonic()));
            }
        }
        Ok(())
    }

    /// Check the implicit return at the end of the body.
    pub fn finalize(&mut self) -> Result<(), ValidationError> {
        self.pop_returns()?;
        self.assert_empty()
    }

    fn pop_returns(&mut self) -> Result<(), ValidationError> {
        // results are on the stack in declaration order, so pop in reverse
        for i in (0..self.returns.len()).rev() {
            let vt = self.returns[i];
            self.pop(vt.into())?;
        }
        Ok(())
    }

    fn push(&mut self, vt: ValidationType) {
        self.stack.push(vt);
        self.current_stack_bytes += vt.size_bytes();
        self.max_stack_elements = self.max_stack_elements.max(self.stack.len());
        self.max_stack_bytes = self.max_stack_bytes.max(self.current_stack_bytes);
    }

    fn pop(&mut self, expected: ValidationType) -> Result<ValidationType, ValidationError> {
        let actual = match self.stack.pop() {
            Some(actual) => {
                self.current_stack_bytes -= actual.size_bytes();
                actual
            }
            None if self.unreachable => ValidationType::Any,
            None => return Err(ValidationError::StackUnderflow),
        };
        if !expected.accepts(actual) {
            return Err(ValidationError::TypeMismatch { expected, actual });
        }
        Ok(actual)
    }

    fn assert_local(&self, idx: u32, expected: ValType) -> Result<(), ValidationError> {
        match self.locals.get(idx as usize) {
            None => Err(ValidationError::UnknownLocal(idx)),
            Some(actual) if *actual != expected => Err(ValidationError::LocalTypeMismatch {
                idx,
                expected,
                actual: *actual,
            }),
            Some(_) => Ok(()),
        }
    }

    fn assert_empty(&self) -> Result<(), ValidationError> {
        if self.stack.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ExtraValuesOnStack(self.stack.len()))
        }
    }
}
