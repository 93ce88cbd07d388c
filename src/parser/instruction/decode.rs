//! Instruction decoding from binary format

use super::Instruction;
use crate::parser::encoding::*;
use crate::parser::leb128;
use crate::parser::reader::Stream;
use crate::parser::ParseError;
use crate::runtime::value::Value;

impl Instruction {
    /// Decode the next instruction of a function body.
    ///
    /// Returns `None` once the terminating `end` opcode has been consumed.
    pub fn decode<S: Stream + ?Sized>(stream: &mut S) -> Result<Option<Instruction>, ParseError> {
        let opcode = stream.read_byte()?;
        let instruction = match opcode {
            OP_END => return Ok(None),
            OP_RETURN => Instruction::Return,
            OP_LOCAL_GET => Instruction::GetLocalI32(leb128::decode(stream)?),
            OP_LOCAL_SET => Instruction::SetLocalI32(leb128::decode(stream)?),
            OP_I32_CONST => Instruction::ConstI32(Value::i32(leb128::decode(stream)?)),
            OP_I32_ADD => Instruction::AddI32,
            _ => return Err(ParseError::UnsupportedOpcode(opcode)),
        };
        Ok(Some(instruction))
    }
}
