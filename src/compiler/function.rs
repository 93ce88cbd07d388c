use super::calling_convention::CallingConvention;
use super::frame::FunctionFrame;
use super::masm::{Label, MacroAssembler, Reg};
use super::register_tracker::RegisterTracker;
use super::runtime_stack::{RuntimeStack, RuntimeValue};
use super::CompilationError;
use crate::parser::instruction::Instruction;
use crate::parser::module::{FunctionMetadata, ValType};
use log::trace;

/// Translates one validated function body into machine code.
///
/// Operands live in caller-saved registers for as long as the pool lasts.
/// When it runs dry the oldest register-resident operand is spilled to its
/// slot in the frame and its register reused.
pub struct FunctionCompiler<'a, A: MacroAssembler> {
    meta: &'a FunctionMetadata,
    frame: FunctionFrame<A::CC>,
    registers: RegisterTracker<A::CC>,
    stack: RuntimeStack<Reg<A>>,
    asm: A,
    exit: Label,
    // set after an unconditional return; nothing after it can execute
    unreachable: bool,
}

impl<'a, A: MacroAssembler> FunctionCompiler<'a, A> {
    pub fn new(meta: &'a FunctionMetadata) -> Result<Self, CompilationError> {
        check_signature::<A::CC>(meta)?;
        let mut asm = A::default();
        let exit = asm.new_label();
        Ok(FunctionCompiler {
            meta,
            frame: FunctionFrame::new(meta),
            registers: RegisterTracker::new(),
            stack: RuntimeStack::with_capacity(meta.max_stack_elements as usize),
            asm,
            exit,
            unreachable: false,
        })
    }

    /// Reserve the frame and spill the parameters into their local slots.
    pub fn prologue(&mut self) -> Result<(), CompilationError> {
        let frame_size = self.frame.stack_size_bytes();
        if frame_size > 0 {
            self.asm.reserve_stack(frame_size)?;
        }
        for (i, ty) in self.meta.signature.params.iter().enumerate() {
            let offset = self.local_offset(i as u32)?;
            self.asm.store(A::CC::GP_ARGS[i], *ty, offset)?;
        }
        Ok(())
    }

    pub fn compile(&mut self, inst: &Instruction) -> Result<(), CompilationError> {
        if self.unreachable {
            trace!("skipping unreachable {inst}");
            return Ok(());
        }
        match inst {
            Instruction::ConstI32(value) => {
                self.stack.push(RuntimeValue::new(ValType::I32));
                let reg = self.allocate_register()?;
                self.set_top_register(reg)?;
                self.asm.mov_imm32(reg, value.as_i32())?;
            }
            Instruction::AddI32 => {
                let mut x2 = self.pop()?;
                let x2_reg = self.ensure_in_register(&mut x2)?;
                let x1_reg = self.ensure_top_in_register()?;
                self.asm.add_i32(x1_reg, x2_reg)?;
                self.registers.mark_unused(x2_reg);
            }
            Instruction::GetLocalI32(idx) => {
                let offset = self.local_offset(*idx)?;
                self.stack.push(RuntimeValue::new(ValType::I32));
                let reg = self.allocate_register()?;
                self.set_top_register(reg)?;
                self.asm.load(reg, ValType::I32, offset)?;
            }
            Instruction::SetLocalI32(idx) => {
                let offset = self.local_offset(*idx)?;
                let mut v = self.pop()?;
                let reg = self.ensure_in_register(&mut v)?;
                self.asm.store(reg, ValType::I32, offset)?;
                self.registers.mark_unused(reg);
            }
            Instruction::Return => {
                self.move_result_into_place()?;
                self.asm.jmp(self.exit)?;
                self.unreachable = true;
            }
            Instruction::Label(_) | Instruction::Br(_) | Instruction::BrIf { .. } => {
                return Err(CompilationError::Unimplemented(inst.mnemonic()));
            }
        }
        Ok(())
    }

    /// Return the fall-through result, tear down the frame and return.
    pub fn epilogue(&mut self) -> Result<(), CompilationError> {
        if !self.unreachable {
            self.move_result_into_place()?;
        }
        self.asm.bind(self.exit)?;
        let frame_size = self.frame.stack_size_bytes();
        if frame_size > 0 {
            self.asm.release_stack(frame_size)?;
        }
        self.asm.ret()
    }

    pub fn finish(self) -> Result<Vec<u8>, CompilationError> {
        self.asm.finish()
    }

    fn move_result_into_place(&mut self) -> Result<(), CompilationError> {
        let Some(ty) = self.meta.signature.results.first().copied() else {
            return Ok(());
        };
        let mut v = self.pop()?;
        let reg = self.ensure_in_register(&mut v)?;
        let ret = A::CC::GP_RETS[0];
        if reg != ret {
            self.asm.mov(ret, reg, ty)?;
        }
        self.registers.mark_unused(reg);
        Ok(())
    }

    fn local_offset(&self, idx: u32) -> Result<i32, CompilationError> {
        self.frame
            .local_offset(idx)
            .ok_or(CompilationError::UnknownLocal(idx))
    }

    fn pop(&mut self) -> Result<RuntimeValue<Reg<A>>, CompilationError> {
        self.stack.pop().ok_or(CompilationError::StackUnderflow)
    }

    fn set_top_register(&mut self, reg: Reg<A>) -> Result<(), CompilationError> {
        let top = self.stack.peek_mut().ok_or(CompilationError::StackUnderflow)?;
        top.reg = Some(reg);
        Ok(())
    }

    fn allocate_register(&mut self) -> Result<Reg<A>, CompilationError> {
        if let Some(reg) = self.registers.take_unused() {
            return Ok(reg);
        }
        for v in self.stack.iter_mut() {
            if let Some(reg) = v.reg.take() {
                trace!("spilling {reg:?} to sp+{}", v.slot_offset());
                self.asm.store(reg, v.ty, v.slot_offset())?;
                return Ok(reg);
            }
        }
        Err(CompilationError::RegistersExhausted)
    }

    /// Make sure a value taken off the stack is in a register, loading it from
    /// its slot if it was spilled.
    fn ensure_in_register(&mut self, v: &mut RuntimeValue<Reg<A>>) -> Result<Reg<A>, CompilationError> {
        if let Some(reg) = v.reg {
            return Ok(reg);
        }
        let reg = self.allocate_register()?;
        self.asm.load(reg, v.ty, v.slot_offset())?;
        v.reg = Some(reg);
        Ok(reg)
    }

    fn ensure_top_in_register(&mut self) -> Result<Reg<A>, CompilationError> {
        let top = *self.stack.peek().ok_or(CompilationError::StackUnderflow)?;
        if let Some(reg) = top.reg {
            return Ok(reg);
        }
        // the top has no register, so allocating cannot spill it
        let reg = self.allocate_register()?;
        self.asm.load(reg, top.ty, top.slot_offset())?;
        self.set_top_register(reg)?;
        Ok(reg)
    }
}

/// Only signatures that travel entirely in general purpose registers are
/// supported.
fn check_signature<CC: CallingConvention>(meta: &FunctionMetadata) -> Result<(), CompilationError> {
    let sig = &meta.signature;
    let unsupported = || CompilationError::Unsupported(sig.to_string());
    if sig.params.len() > CC::GP_ARGS.len() || sig.results.len() > 1 {
        return Err(unsupported());
    }
    let in_gp = |ty: &ValType| !matches!(ty, ValType::F32 | ValType::F64 | ValType::V128);
    if !sig.params.iter().all(in_gp) || !sig.results.iter().all(in_gp) {
        return Err(unsupported());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{aarch64, x64};
    use crate::parser::instruction::LabelId;
    use crate::parser::module::FunctionSignature;
    use crate::runtime::value::Value;
    use byteorder::{ByteOrder, LittleEndian};
    use crate::parser::instruction::Instruction::*;

    fn meta(params: &[ValType], results: &[ValType], locals: &[ValType], max_stack: (u32, u32)) -> FunctionMetadata {
        FunctionMetadata {
            signature: FunctionSignature {
                params: params.to_vec(),
                results: results.to_vec(),
            },
            locals: locals.to_vec(),
            max_stack_size_bytes: max_stack.0,
            max_stack_elements: max_stack.1,
        }
    }

    fn compile<A: MacroAssembler>(meta: &FunctionMetadata, body: &[Instruction]) -> Result<Vec<u8>, CompilationError> {
        let mut compiler = FunctionCompiler::<A>::new(meta)?;
        compiler.prologue()?;
        for inst in body {
            compiler.compile(inst)?;
        }
        compiler.epilogue()?;
        compiler.finish()
    }

    fn words(code: &[u8]) -> Vec<u32> {
        code.chunks(4).map(LittleEndian::read_u32).collect()
    }

    fn add_meta() -> FunctionMetadata {
        meta(&[ValType::I32, ValType::I32], &[ValType::I32], &[], (8, 2))
    }

    const ADD_BODY: [Instruction; 3] = [GetLocalI32(0), GetLocalI32(1), AddI32];

    #[test]
    fn test_add_x64() {
        let code = compile::<x64::Assembler>(&add_meta(), &ADD_BODY).expect("Failed to compile");
        #[rustfmt::skip]
        let expected = vec![
            0x48, 0x81, 0xec, 0x10, 0x00, 0x00, 0x00, // sub rsp, 16
            0x89, 0xbc, 0x24, 0x08, 0x00, 0x00, 0x00, // mov [rsp+8], edi
            0x89, 0xb4, 0x24, 0x0c, 0x00, 0x00, 0x00, // mov [rsp+12], esi
            0x8b, 0x84, 0x24, 0x08, 0x00, 0x00, 0x00, // mov eax, [rsp+8]
            0x8b, 0x8c, 0x24, 0x0c, 0x00, 0x00, 0x00, // mov ecx, [rsp+12]
            0x01, 0xc8,                               // add eax, ecx
            0x48, 0x81, 0xc4, 0x10, 0x00, 0x00, 0x00, // add rsp, 16
            0xc3,                                     // ret
        ];
        assert_eq!(code, expected);
    }

    #[test]
    fn test_add_aarch64() {
        let code = compile::<aarch64::Assembler>(&add_meta(), &ADD_BODY).expect("Failed to compile");
        assert_eq!(
            words(&code),
            vec![
                0xd10043ff, // sub sp, sp, #16
                0xb9000be0, // str w0, [sp, #8]
                0xb9000fe1, // str w1, [sp, #12]
                0xb9400be0, // ldr w0, [sp, #8]
                0xb9400fe1, // ldr w1, [sp, #12]
                0x0b010000, // add w0, w0, w1
                0x910043ff, // add sp, sp, #16
                0xd65f03c0, // ret
            ]
        );
    }

    #[test]
    fn test_noop() {
        let m = meta(&[], &[], &[], (0, 0));
        assert_eq!(compile::<x64::Assembler>(&m, &[]).expect("Failed to compile"), vec![0xc3]);
        assert_eq!(
            words(&compile::<aarch64::Assembler>(&m, &[]).expect("Failed to compile")),
            vec![0xd65f03c0]
        );
    }

    #[test]
    fn test_return_skips_rest_of_body() {
        let m = meta(&[], &[ValType::I32], &[], (4, 1));
        let body = [ConstI32(Value::i32(7)), Return, ConstI32(Value::i32(8)), AddI32];
        let code = compile::<x64::Assembler>(&m, &body).expect("Failed to compile");
        #[rustfmt::skip]
        let expected = vec![
            0x48, 0x81, 0xec, 0x10, 0x00, 0x00, 0x00, // sub rsp, 16
            0xb8, 0x07, 0x00, 0x00, 0x00,             // mov eax, 7
            0xe9, 0x00, 0x00, 0x00, 0x00,             // jmp exit
            0x48, 0x81, 0xc4, 0x10, 0x00, 0x00, 0x00, // exit: add rsp, 16
            0xc3,                                     // ret
        ];
        assert_eq!(code, expected);
    }

    #[test]
    fn test_result_is_moved_to_return_register() {
        // fill the pool, then drop the newest value so the result sits in r11
        let depth = x64::SystemV::GP_CALLER_SAVED.len() + 1;
        let m = meta(&[], &[ValType::I32], &[ValType::I32], (4 * depth as u32, depth as u32));
        let mut body: Vec<Instruction> = (0..depth as i32).map(|i| ConstI32(Value::i32(i))).collect();
        body.extend([SetLocalI32(0), Return]);
        let code = compile::<x64::Assembler>(&m, &body).expect("Failed to compile");
        // mov eax, r11d
        let mov = [0x44, 0x89, 0xd8];
        assert!(code.windows(mov.len()).any(|w| w == mov));
    }

    #[test]
    fn test_set_local_stores() {
        let m = meta(&[], &[], &[ValType::I32], (4, 1));
        let body = [ConstI32(Value::i32(3)), SetLocalI32(0)];
        let code = compile::<aarch64::Assembler>(&m, &body).expect("Failed to compile");
        assert_eq!(
            words(&code),
            vec![
                0xd10043ff, // sub sp, sp, #16
                0x52800060, // mov w0, #3
                0xb9000fe0, // str w0, [sp, #12]
                0x910043ff, // add sp, sp, #16
                0xd65f03c0, // ret
            ]
        );
    }

    #[test]
    fn test_spills_oldest_when_exhausted() {
        // one more constant than there are caller saved registers
        let depth = x64::SystemV::GP_CALLER_SAVED.len() + 1;
        let m = meta(&[], &[ValType::I32], &[], (4 * depth as u32, depth as u32));
        let mut body: Vec<Instruction> = (0..depth as i32).map(|i| ConstI32(Value::i32(i))).collect();
        body.extend(std::iter::repeat(AddI32).take(depth - 1));

        let mut compiler = FunctionCompiler::<x64::Assembler>::new(&m).expect("Failed to create");
        compiler.prologue().expect("Failed to emit prologue");
        for inst in &body[..depth] {
            compiler.compile(inst).expect("Failed to compile");
        }
        // the bottom value gave up rax to the newest one
        let values: Vec<_> = compiler.stack.iter_mut().map(|v| v.reg).collect();
        assert_eq!(values[0], None);
        assert_eq!(values[depth - 1], Some(x64::Reg::Rax));
        assert!(values[1..].iter().all(Option::is_some));

        for inst in &body[depth..] {
            compiler.compile(inst).expect("Failed to compile");
        }
        compiler.epilogue().expect("Failed to emit epilogue");
        let code = compiler.finish().expect("Failed to finish");
        // mov [rsp+0], eax spills the first constant to its slot
        let spill = [0x89, 0x84, 0x24, 0x00, 0x00, 0x00, 0x00];
        assert!(code.windows(spill.len()).any(|w| w == spill));
    }

    #[test]
    fn test_unsupported_signatures() {
        for m in [
            meta(&[ValType::F32], &[], &[], (0, 0)),
            meta(&[], &[ValType::F64], &[], (0, 0)),
            meta(&[ValType::V128], &[], &[], (0, 0)),
        ] {
            assert!(matches!(
                compile::<x64::Assembler>(&m, &[]),
                Err(CompilationError::Unsupported(_))
            ));
        }
        let m = meta(&[ValType::I64; 7], &[], &[], (0, 0));
        assert!(compile::<x64::Assembler>(&m, &[]).is_err());
        // aarch64 has eight argument registers
        assert!(compile::<aarch64::Assembler>(&m, &[]).is_ok());
        // references travel in general purpose registers
        let m = meta(&[ValType::FuncRef, ValType::ExternRef], &[], &[], (0, 0));
        assert!(compile::<x64::Assembler>(&m, &[]).is_ok());
    }

    #[test]
    fn test_labels_are_unimplemented() {
        let m = meta(&[], &[], &[], (0, 0));
        let body = [Instruction::Label(LabelId::new("block", 1))];
        assert!(matches!(
            compile::<x64::Assembler>(&m, &body),
            Err(CompilationError::Unimplemented("label"))
        ));
    }
}
