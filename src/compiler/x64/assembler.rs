use super::{Reg, SystemV};
use crate::compiler::calling_convention::Register;
use crate::compiler::masm::{Label, Labels, MacroAssembler};
use crate::compiler::CompilationError;
use crate::parser::module::ValType;
use byteorder::{ByteOrder, LittleEndian};

const REX: u8 = 0x40;
const REX_W: u8 = 0x08;
const REX_R: u8 = 0x04;
const REX_B: u8 = 0x01;

// ModRM with mod=10 (disp32) and rm=100 (SIB follows), then a SIB byte with
// base=rsp and no index.
const MODRM_RSP_DISP32: u8 = 0b10_000_100;
const SIB_RSP: u8 = 0x24;
const MODRM_DIRECT: u8 = 0b11_000_000;

/// Encodes the handful of x86-64 instructions the compiler needs.
#[derive(Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Labels,
}

impl Assembler {
    fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    fn emit_i32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    /// Emit a REX prefix if any of its bits are needed.
    fn emit_rex(&mut self, w: bool, reg: Reg, rm: Reg) {
        let mut rex = REX;
        if w {
            rex |= REX_W;
        }
        if reg.id() >= 8 {
            rex |= REX_R;
        }
        if rm.id() >= 8 {
            rex |= REX_B;
        }
        if rex != REX {
            self.emit(&[rex]);
        }
    }

    /// `opcode reg, [rsp + offset]`
    fn emit_rsp_relative(&mut self, opcode: u8, reg: Reg, ty: ValType, offset: i32) -> Result<(), CompilationError> {
        let wide = is_wide(ty)?;
        // rsp never needs REX.B, so pass something below r8 for rm
        self.emit_rex(wide, reg, Reg::Rsp);
        self.emit(&[opcode, MODRM_RSP_DISP32 | low_bits(reg) << 3, SIB_RSP]);
        self.emit_i32(offset);
        Ok(())
    }

    /// `48 81 /ext imm32`, the rsp arithmetic forms.
    fn emit_rsp_imm(&mut self, ext: u8, bytes: u32) -> Result<(), CompilationError> {
        let imm = i32::try_from(bytes)
            .map_err(|_| CompilationError::Encoding(format!("frame of {bytes} bytes is too large")))?;
        self.emit(&[REX | REX_W, 0x81, MODRM_DIRECT | ext << 3 | Reg::Rsp.id()]);
        self.emit_i32(imm);
        Ok(())
    }
}

fn low_bits(reg: Reg) -> u8 {
    reg.id() & 0b111
}

fn is_wide(ty: ValType) -> Result<bool, CompilationError> {
    match ty.size_bytes() {
        4 => Ok(false),
        8 => Ok(true),
        _ => Err(CompilationError::Encoding(format!(
            "{ty} does not fit a general purpose register"
        ))),
    }
}

impl MacroAssembler for Assembler {
    type CC = SystemV;

    fn new_label(&mut self) -> Label {
        self.labels.create()
    }

    fn bind(&mut self, label: Label) -> Result<(), CompilationError> {
        self.labels.bind(label, self.code.len())
    }

    fn reserve_stack(&mut self, bytes: u32) -> Result<(), CompilationError> {
        // sub rsp, imm32
        self.emit_rsp_imm(5, bytes)
    }

    fn release_stack(&mut self, bytes: u32) -> Result<(), CompilationError> {
        // add rsp, imm32
        self.emit_rsp_imm(0, bytes)
    }

    fn store(&mut self, src: Reg, ty: ValType, offset: i32) -> Result<(), CompilationError> {
        self.emit_rsp_relative(0x89, src, ty, offset)
    }

    fn load(&mut self, dst: Reg, ty: ValType, offset: i32) -> Result<(), CompilationError> {
        self.emit_rsp_relative(0x8b, dst, ty, offset)
    }

    fn mov_imm32(&mut self, dst: Reg, imm: i32) -> Result<(), CompilationError> {
        if dst.id() >= 8 {
            self.emit(&[REX | REX_B]);
        }
        self.emit(&[0xb8 + low_bits(dst)]);
        self.emit_i32(imm);
        Ok(())
    }

    fn mov(&mut self, dst: Reg, src: Reg, ty: ValType) -> Result<(), CompilationError> {
        self.emit_rex(is_wide(ty)?, src, dst);
        self.emit(&[0x89, MODRM_DIRECT | low_bits(src) << 3 | low_bits(dst)]);
        Ok(())
    }

    fn add_i32(&mut self, dst: Reg, src: Reg) -> Result<(), CompilationError> {
        self.emit_rex(false, src, dst);
        self.emit(&[0x01, MODRM_DIRECT | low_bits(src) << 3 | low_bits(dst)]);
        Ok(())
    }

    fn jmp(&mut self, label: Label) -> Result<(), CompilationError> {
        self.emit(&[0xe9]);
        self.labels.add_fixup(self.code.len(), label);
        self.emit_i32(0);
        Ok(())
    }

    fn ret(&mut self) -> Result<(), CompilationError> {
        self.emit(&[0xc3]);
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, CompilationError> {
        for (at, target) in self.labels.resolve()? {
            // rel32 is relative to the end of the instruction
            let rel = target as i64 - (at as i64 + 4);
            let rel = i32::try_from(rel)
                .map_err(|_| CompilationError::Encoding(format!("jump of {rel} bytes is out of range")))?;
            LittleEndian::write_i32(&mut self.code[at..at + 4], rel);
        }
        Ok(self.code)
    }
}
