//! Single-pass compilation of parsed modules to native code.
//!
//! Each function body is walked once, front to back. Operands are kept in
//! caller-saved registers and spilled to fixed frame slots when the pool runs
//! out. The backends differ only in their [`masm::MacroAssembler`] and
//! [`calling_convention::CallingConvention`]; the translation itself lives in
//! [`function::FunctionCompiler`].

pub mod aarch64;
pub mod calling_convention;
pub mod executable;
pub mod frame;
pub mod function;
pub mod masm;
pub mod module;
pub mod register_tracker;
pub mod runtime_stack;
pub mod x64;

use crate::coro::maybe_yield;
use crate::parser::module::{Function, ParsedModule};
use executable::ExecutableMemory;
use function::FunctionCompiler;
use log::{debug, trace};
use masm::MacroAssembler;
use module::{Code, CompiledFunction, CompiledModule};
use std::fmt;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum CompilationError {
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Unsupported signature: {0}")]
    Unsupported(String),
    #[error("No backend for host architecture {0}")]
    UnsupportedArchitecture(&'static str),
    #[error("Unimplemented instruction: {0}")]
    Unimplemented(&'static str),
    #[error("Unknown local: {0}")]
    UnknownLocal(u32),
    #[error("Operand stack underflow")]
    StackUnderflow,
    #[error("No register available")]
    RegistersExhausted,
    #[error("Failed to map executable memory")]
    ExecutableMemory(#[source] io::Error),
}

/// An instruction set the compiler can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86_64,
    Aarch64,
}

impl Architecture {
    /// The architecture of the running process, if there is a backend for it.
    pub fn host() -> Option<Self> {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                Some(Architecture::X86_64)
            } else if #[cfg(target_arch = "aarch64")] {
                Some(Architecture::Aarch64)
            } else {
                None
            }
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Aarch64 => write!(f, "aarch64"),
        }
    }
}

pub struct Compiler {
    architecture: Architecture,
}

impl Compiler {
    /// A compiler for the host, whose output can be run in-process.
    pub fn native() -> Result<Self, CompilationError> {
        Architecture::host()
            .map(Compiler::new)
            .ok_or(CompilationError::UnsupportedArchitecture(std::env::consts::ARCH))
    }

    /// A compiler for any supported architecture. Code for a foreign
    /// architecture is kept as plain bytes and cannot be run.
    pub fn new(architecture: Architecture) -> Self {
        Compiler { architecture }
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub async fn compile(&self, module: ParsedModule) -> Result<CompiledModule, CompilationError> {
        let executable = Architecture::host() == Some(self.architecture);
        let mut functions = Vec::with_capacity(module.functions.len());
        for (idx, func) in module.functions.into_iter().enumerate() {
            let bytes = match self.architecture {
                Architecture::X86_64 => compile_function::<x64::Assembler>(idx, &func).await?,
                Architecture::Aarch64 => compile_function::<aarch64::Assembler>(idx, &func).await?,
            };
            debug!(
                "func[{}] {} compiled to {} bytes for {}",
                idx,
                func.meta.signature,
                bytes.len(),
                self.architecture
            );
            let code = if executable {
                Code::Executable(ExecutableMemory::new(&bytes).map_err(CompilationError::ExecutableMemory)?)
            } else {
                Code::Foreign(bytes)
            };
            functions.push(CompiledFunction::new(code, func.meta));
        }
        Ok(CompiledModule {
            functions,
            exported_functions: module.exported_functions,
            architecture: self.architecture,
        })
    }

    /// Blocking form of [`Compiler::compile`].
    pub fn compile_module(&self, module: ParsedModule) -> Result<CompiledModule, CompilationError> {
        futures::executor::block_on(self.compile(module))
    }

    /// Unmap the module's code. Dropping the module does the same.
    pub fn release(&self, module: CompiledModule) {
        debug!("releasing {} functions", module.functions.len());
        drop(module);
    }
}

async fn compile_function<A: MacroAssembler>(idx: usize, func: &Function) -> Result<Vec<u8>, CompilationError> {
    let mut compiler = FunctionCompiler::<A>::new(&func.meta)?;
    compiler.prologue()?;
    for inst in &func.body {
        trace!("func[{idx}] {inst}");
        compiler.compile(inst)?;
        maybe_yield().await;
    }
    compiler.epilogue()?;
    compiler.finish()
}
