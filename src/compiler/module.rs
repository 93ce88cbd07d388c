use super::executable::ExecutableMemory;
use super::Architecture;
use crate::parser::module::FunctionMetadata;
use std::collections::HashMap;
use std::fmt;

/// Where a function's machine code lives.
#[derive(Debug)]
pub enum Code {
    /// Mapped and ready to run on this host.
    Executable(ExecutableMemory),
    /// Emitted for another architecture; kept only as bytes.
    Foreign(Vec<u8>),
}

#[derive(Debug)]
pub struct CompiledFunction {
    code: Code,
    meta: FunctionMetadata,
}

impl CompiledFunction {
    pub fn new(code: Code, meta: FunctionMetadata) -> Self {
        CompiledFunction { code, meta }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.code {
            Code::Executable(mem) => mem.as_slice(),
            Code::Foreign(bytes) => bytes,
        }
    }

    /// The first instruction, if the code can run on this host.
    pub fn entry_point(&self) -> Option<*const u8> {
        match &self.code {
            Code::Executable(mem) => Some(mem.as_ptr()),
            Code::Foreign(_) => None,
        }
    }

    pub fn metadata(&self) -> &FunctionMetadata {
        &self.meta
    }
}

/// The compiled functions of a module, in the same order as they were parsed.
#[derive(Debug)]
pub struct CompiledModule {
    pub functions: Vec<CompiledFunction>,
    pub exported_functions: HashMap<String, u32>,
    pub architecture: Architecture,
}

impl CompiledModule {
    pub fn exported_function(&self, name: &str) -> Option<&CompiledFunction> {
        self.exported_functions
            .get(name)
            .and_then(|idx| self.functions.get(*idx as usize))
    }

    pub fn is_executable(&self) -> bool {
        Architecture::host() == Some(self.architecture)
    }
}

impl fmt::Display for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (idx, func) in self.functions.iter().enumerate() {
            writeln!(
                f,
                "func[{}] {} {} bytes: {}",
                idx,
                func.meta.signature,
                func.bytes().len(),
                hex::encode(func.bytes())
            )?;
        }
        Ok(())
    }
}
