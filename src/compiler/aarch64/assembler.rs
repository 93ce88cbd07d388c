use super::{Aapcs64, Reg};
use crate::compiler::calling_convention::Register;
use crate::compiler::masm::{Label, Labels, MacroAssembler};
use crate::compiler::CompilationError;
use crate::parser::module::ValType;
use byteorder::{ByteOrder, LittleEndian};

const SP: u32 = 31;
// intra-procedure-call scratch, never handed out by the register tracker
const SCRATCH: u32 = 16;

// add/sub (immediate), 64-bit, with sp as both operands
const SUB_SP_IMM: u32 = 0xd100_0000;
const ADD_SP_IMM: u32 = 0x9100_0000;
const SHIFT_12: u32 = 1 << 22;

// load/store with unsigned scaled 12-bit offset
const STR_W: u32 = 0xb900_0000;
const STR_X: u32 = 0xf900_0000;
const LDR_W: u32 = 0xb940_0000;
const LDR_X: u32 = 0xf940_0000;

// load/store with signed unscaled 9-bit offset
const STUR_W: u32 = 0xb800_0000;
const STUR_X: u32 = 0xf800_0000;
const LDUR_W: u32 = 0xb840_0000;
const LDUR_X: u32 = 0xf840_0000;

const MOVZ_W: u32 = 0x5280_0000;
const MOVK_W: u32 = 0x7280_0000;
// orr with the zero register
const MOV_W: u32 = 0x2a00_03e0;
const MOV_X: u32 = 0xaa00_03e0;
const ADD_W: u32 = 0x0b00_0000;
const B: u32 = 0x1400_0000;
const RET: u32 = 0xd65f_03c0;

/// Encodes the handful of AArch64 instructions the compiler needs.
#[derive(Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Labels,
}

struct MemOp {
    scaled: u32,
    unscaled: u32,
}

impl Assembler {
    fn emit(&mut self, insn: u32) {
        self.code.extend_from_slice(&insn.to_le_bytes());
    }

    fn emit_sp_adjust(&mut self, opcode: u32, bytes: u32) -> Result<(), CompilationError> {
        if bytes > 0xff_ffff {
            return Err(CompilationError::Encoding(format!(
                "frame of {bytes} bytes is too large"
            )));
        }
        let (hi, lo) = (bytes >> 12, bytes & 0xfff);
        if hi != 0 {
            self.emit(opcode | SHIFT_12 | hi << 10 | SP << 5 | SP);
        }
        if lo != 0 || hi == 0 {
            self.emit(opcode | lo << 10 | SP << 5 | SP);
        }
        Ok(())
    }

    /// Prefer the scaled form and fall back to the unscaled one for small or
    /// misaligned offsets. Offsets beyond both are reached through x16.
    fn emit_sp_relative(
        &mut self,
        op: MemOp,
        reg: Reg,
        size: i32,
        offset: i32,
    ) -> Result<(), CompilationError> {
        let rt = u32::from(reg.id());
        if self.emit_relative(&op, SP, rt, size, offset) {
            return Ok(());
        }
        if (0x1000..=0xff_ffff).contains(&offset) {
            let (hi, lo) = ((offset >> 12) as u32, offset & 0xfff);
            self.emit(ADD_SP_IMM | SHIFT_12 | hi << 10 | SP << 5 | SCRATCH);
            if self.emit_relative(&op, SCRATCH, rt, size, lo) {
                return Ok(());
            }
        }
        Err(CompilationError::Encoding(format!(
            "stack offset {offset} out of range for a {size} byte access"
        )))
    }

    fn emit_relative(&mut self, op: &MemOp, base: u32, rt: u32, size: i32, offset: i32) -> bool {
        if offset >= 0 && offset % size == 0 && offset / size <= 0xfff {
            self.emit(op.scaled | ((offset / size) as u32) << 10 | base << 5 | rt);
        } else if (-256..=255).contains(&offset) {
            self.emit(op.unscaled | ((offset as u32) & 0x1ff) << 12 | base << 5 | rt);
        } else {
            return false;
        }
        true
    }
}

fn access_size(ty: ValType) -> Result<i32, CompilationError> {
    match ty.size_bytes() {
        4 => Ok(4),
        8 => Ok(8),
        _ => Err(CompilationError::Encoding(format!(
            "{ty} does not fit a general purpose register"
        ))),
    }
}

fn rd(reg: Reg) -> u32 {
    u32::from(reg.id())
}

impl MacroAssembler for Assembler {
    type CC = Aapcs64;

    fn new_label(&mut self) -> Label {
        self.labels.create()
    }

    fn bind(&mut self, label: Label) -> Result<(), CompilationError> {
        self.labels.bind(label, self.code.len())
    }

    fn reserve_stack(&mut self, bytes: u32) -> Result<(), CompilationError> {
        self.emit_sp_adjust(SUB_SP_IMM, bytes)
    }

    fn release_stack(&mut self, bytes: u32) -> Result<(), CompilationError> {
        self.emit_sp_adjust(ADD_SP_IMM, bytes)
    }

    fn store(&mut self, src: Reg, ty: ValType, offset: i32) -> Result<(), CompilationError> {
        let size = access_size(ty)?;
        let op = if size == 4 {
            MemOp {
                scaled: STR_W,
                unscaled: STUR_W,
            }
        } else {
            MemOp {
                scaled: STR_X,
                unscaled: STUR_X,
            }
        };
        self.emit_sp_relative(op, src, size, offset)
    }

    fn load(&mut self, dst: Reg, ty: ValType, offset: i32) -> Result<(), CompilationError> {
        let size = access_size(ty)?;
        let op = if size == 4 {
            MemOp {
                scaled: LDR_W,
                unscaled: LDUR_W,
            }
        } else {
            MemOp {
                scaled: LDR_X,
                unscaled: LDUR_X,
            }
        };
        self.emit_sp_relative(op, dst, size, offset)
    }

    fn mov_imm32(&mut self, dst: Reg, imm: i32) -> Result<(), CompilationError> {
        let imm = imm as u32;
        let (hi, lo) = (imm >> 16, imm & 0xffff);
        self.emit(MOVZ_W | lo << 5 | rd(dst));
        if hi != 0 {
            self.emit(MOVK_W | 1 << 21 | hi << 5 | rd(dst));
        }
        Ok(())
    }

    fn mov(&mut self, dst: Reg, src: Reg, ty: ValType) -> Result<(), CompilationError> {
        let opcode = if access_size(ty)? == 4 { MOV_W } else { MOV_X };
        self.emit(opcode | rd(src) << 16 | rd(dst));
        Ok(())
    }

    fn add_i32(&mut self, dst: Reg, src: Reg) -> Result<(), CompilationError> {
        self.emit(ADD_W | rd(src) << 16 | rd(dst) << 5 | rd(dst));
        Ok(())
    }

    fn jmp(&mut self, label: Label) -> Result<(), CompilationError> {
        self.labels.add_fixup(self.code.len(), label);
        self.emit(B);
        Ok(())
    }

    fn ret(&mut self) -> Result<(), CompilationError> {
        self.emit(RET);
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, CompilationError> {
        for (at, target) in self.labels.resolve()? {
            let words = (target as i64 - at as i64) / 4;
            if !(-(1 << 25)..(1 << 25)).contains(&words) {
                return Err(CompilationError::Encoding(format!(
                    "branch of {words} instructions is out of range"
                )));
            }
            let insn = B | (words as u32 & 0x03ff_ffff);
            LittleEndian::write_u32(&mut self.code[at..at + 4], insn);
        }
        Ok(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn assemble(f: impl FnOnce(&mut Assembler) -> Result<(), CompilationError>) -> Vec<u32> {
        let mut asm = Assembler::default();
        f(&mut asm).expect("Failed to emit");
        let code = asm.finish().expect("Failed to finish");
        code.chunks(4).map(LittleEndian::read_u32).collect()
    }

    #[rstest]
    #[case(16, vec![0xd10043ff])]
    #[case(0x1000, vec![0xd14007ff])]
    #[case(0x12345, vec![0xd1404bff, 0xd10d17ff])]
    fn test_reserve_stack(#[case] bytes: u32, #[case] expected: Vec<u32>) {
        assert_eq!(assemble(|a| a.reserve_stack(bytes)), expected);
    }

    #[test]
    fn test_release_stack() {
        assert_eq!(assemble(|a| a.release_stack(16)), vec![0x910043ff]);
        let mut asm = Assembler::default();
        assert!(asm.release_stack(0x100_0000).is_err());
    }

    #[rstest]
    #[case::str_w(Reg::X0, ValType::I32, 8, 0xb9000be0)]
    #[case::str_x(Reg::X1, ValType::I64, 16, 0xf9000be1)]
    #[case::stur_w_negative(Reg::X0, ValType::I32, -4, 0xb81fc3e0)]
    #[case::stur_x_misaligned(Reg::X0, ValType::I64, 12, 0xf800c3e0)]
    fn test_store(#[case] src: Reg, #[case] ty: ValType, #[case] offset: i32, #[case] expected: u32) {
        assert_eq!(assemble(|a| a.store(src, ty, offset)), vec![expected]);
    }

    #[rstest]
    #[case::ldr_w(Reg::X9, ValType::I32, 12, 0xb9400fe9)]
    #[case::ldr_x(Reg::X2, ValType::I64, 0, 0xf94003e2)]
    #[case::ldur_w(Reg::X3, ValType::I32, 5, 0xb84053e3)]
    fn test_load(#[case] dst: Reg, #[case] ty: ValType, #[case] offset: i32, #[case] expected: u32) {
        assert_eq!(assemble(|a| a.load(dst, ty, offset)), vec![expected]);
    }

    #[rstest]
    // add x16, sp, #4, lsl #12; str w0, [x16, #28]
    #[case::str_w(Reg::X0, ValType::I32, 16412, vec![0x914013f0, 0xb9001e00])]
    // add x16, sp, #8, lsl #12; str x2, [x16]
    #[case::str_x(Reg::X2, ValType::I64, 0x8000, vec![0x914023f0, 0xf9000202])]
    fn test_store_far(#[case] src: Reg, #[case] ty: ValType, #[case] offset: i32, #[case] expected: Vec<u32>) {
        assert_eq!(assemble(|a| a.store(src, ty, offset)), expected);
    }

    #[test]
    fn test_load_far() {
        // add x16, sp, #4, lsl #12; ldr w1, [x16, #28]
        assert_eq!(
            assemble(|a| a.load(Reg::X1, ValType::I32, 16412)),
            vec![0x914013f0, 0xb9401e01]
        );
        // still within the scaled range of a 64-bit access
        assert_eq!(
            assemble(|a| a.load(Reg::X1, ValType::I64, 16416)),
            vec![0xf96013e1]
        );
    }

    #[test]
    fn test_offset_out_of_range() {
        let mut asm = Assembler::default();
        assert!(matches!(
            asm.store(Reg::X0, ValType::I32, 0x100_0000),
            Err(CompilationError::Encoding(_))
        ));
        assert!(asm.load(Reg::X0, ValType::I64, -257).is_err());
    }

    #[test]
    fn test_mov() {
        assert_eq!(assemble(|a| a.mov_imm32(Reg::X0, 42)), vec![0x52800540]);
        assert_eq!(
            assemble(|a| a.mov_imm32(Reg::X3, -1)),
            vec![0x529fffe3, 0x72bfffe3]
        );
        assert_eq!(assemble(|a| a.mov(Reg::X0, Reg::X9, ValType::I32)), vec![0x2a0903e0]);
        assert_eq!(assemble(|a| a.mov(Reg::X0, Reg::X9, ValType::I64)), vec![0xaa0903e0]);
    }

    #[test]
    fn test_add() {
        assert_eq!(assemble(|a| a.add_i32(Reg::X0, Reg::X1)), vec![0x0b010000]);
        assert_eq!(assemble(|a| a.add_i32(Reg::X9, Reg::X10)), vec![0x0b0a0129]);
    }

    #[test]
    fn test_branches() {
        let code = assemble(|a| {
            let exit = a.new_label();
            a.jmp(exit)?;
            a.ret()?;
            a.bind(exit)?;
            a.ret()
        });
        assert_eq!(code, vec![0x14000002, 0xd65f03c0, 0xd65f03c0]);

        let code = assemble(|a| {
            let top = a.new_label();
            a.bind(top)?;
            a.ret()?;
            a.jmp(top)
        });
        assert_eq!(code, vec![0xd65f03c0, 0x17ffffff]);
    }
}
