//! The instruction set understood by the validator and the compilers.
//!
//! The set is closed: every consumer matches on [`Instruction`]
//! exhaustively, so adding an opcode is a compile error everywhere it has to
//! be handled.

pub mod decode;

use crate::runtime::value::Value;
use std::fmt;

/// The name of a structured-control-flow label, in the form `<class>_<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelId(String);

impl LabelId {
    pub fn new(class: &str, id: i32) -> Self {
        LabelId(format!("{class}_{id}"))
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Push the constant onto the top of the stack.
    ConstI32(Value),
    AddI32,
    /// Push the local at the index onto the top of the stack.
    GetLocalI32(u32),
    /// Pop the top of the stack into the local at the index.
    SetLocalI32(u32),
    /// Return the rest of the stack to the caller.
    Return,

    // Structured control flow. The binary decoder does not produce these
    // yet, and both the validator and the compilers reject them.
    Label(LabelId),
    Br(LabelId),
    /// Branch to `then_label` if the top of the stack is non zero, otherwise
    /// to `else_label`.
    BrIf {
        then_label: LabelId,
        else_label: LabelId,
    },
}

impl Instruction {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::ConstI32(_) => "i32.const",
            Instruction::AddI32 => "i32.add",
            Instruction::GetLocalI32(_) => "local.get",
            Instruction::SetLocalI32(_) => "local.set",
            Instruction::Return => "return",
            Instruction::Label(_) => "label",
            Instruction::Br(_) => "br",
            Instruction::BrIf { .. } => "br_if",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match self {
            Instruction::ConstI32(value) => write!(f, " {}", value.as_i32()),
            Instruction::GetLocalI32(idx) | Instruction::SetLocalI32(idx) => write!(f, " {idx}"),
            Instruction::Label(id) | Instruction::Br(id) => write!(f, " {id}"),
            Instruction::BrIf {
                then_label,
                else_label,
            } => write!(f, " {then_label} {else_label}"),
            Instruction::AddI32 | Instruction::Return => Ok(()),
        }
    }
}
