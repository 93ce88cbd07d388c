use super::instruction::Instruction;
use crate::runtime::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValType {
    // Number types
    I32 = 0x7f,
    I64 = 0x7e,
    F32 = 0x7d,
    F64 = 0x7c,
    // Vector types
    V128 = 0x7b,
    // Reference types
    FuncRef = 0x70,
    ExternRef = 0x6f,
}

impl ValType {
    pub fn decode(byte: u8) -> Option<Self> {
        match byte {
            0x7f => Some(ValType::I32),
            0x7e => Some(ValType::I64),
            0x7d => Some(ValType::F32),
            0x7c => Some(ValType::F64),
            0x7b => Some(ValType::V128),
            0x70 => Some(ValType::FuncRef),
            0x6f => Some(ValType::ExternRef),
            _ => None,
        }
    }

    /// The number of bytes a value of this type occupies in memory.
    pub fn size_bytes(self) -> usize {
        match self {
            ValType::I32 | ValType::F32 => 4,
            ValType::I64 | ValType::F64 => 8,
            ValType::V128 => 16,
            ValType::FuncRef | ValType::ExternRef => mem::size_of::<usize>(),
        }
    }

    pub fn is_ref(self) -> bool {
        matches!(self, ValType::FuncRef | ValType::ExternRef)
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ValType::I32 => "i32",
                ValType::I64 => "i64",
                ValType::F32 => "f32",
                ValType::F64 => "f64",
                ValType::V128 => "v128",
                ValType::FuncRef => "funcref",
                ValType::ExternRef => "externref",
            }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSignature {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let join = |types: &[ValType]| {
            types
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

/// Size bounds of a table or memory. An absent maximum is `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub limits: Limits,
    /// Either `funcref` or `externref`.
    pub reftype: ValType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub valtype: ValType,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDescription {
    Func(u32),
    Table(TableType),
    Mem(MemType),
    Global(GlobalType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub description: ImportDescription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportDescription {
    Func(u32),
    Table(u32),
    Mem(u32),
    Global(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub description: ExportDescription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub table_type: TableType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    pub mem_type: MemType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub global_type: GlobalType,
    pub value: Value,
}

/// Everything the compiler needs to know about a function besides its body.
///
/// The stack maximums are recorded by the validator once the body has been
/// fully checked and are not changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionMetadata {
    pub signature: FunctionSignature,
    /// Declared locals, not including parameters.
    pub locals: Vec<ValType>,
    pub max_stack_size_bytes: u32,
    pub max_stack_elements: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Function {
    pub meta: FunctionMetadata,
    pub body: Vec<Instruction>,
}

/// The output of parsing: every function plus the exported-function map.
///
/// Imports, tables, memories and globals are decoded and checked but nothing
/// downstream consumes them yet.
#[derive(Debug, Clone, Default)]
pub struct ParsedModule {
    pub functions: Vec<Function>,
    pub exported_functions: HashMap<String, u32>,
    pub start: Option<u32>,
    pub imports: Vec<Import>,
    pub tables: Vec<Table>,
    pub memories: Vec<Memory>,
    pub globals: Vec<Global>,
}

impl ParsedModule {
    pub fn exported_function(&self, name: &str) -> Option<&Function> {
        self.exported_functions
            .get(name)
            .and_then(|idx| self.functions.get(*idx as usize))
    }
}

impl fmt::Display for ParsedModule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut exports: Vec<_> = self.exported_functions.iter().collect();
        exports.sort_by_key(|(_, idx)| **idx);
        for (idx, func) in self.functions.iter().enumerate() {
            let names: Vec<&str> = exports
                .iter()
                .filter(|(_, i)| **i as usize == idx)
                .map(|(name, _)| name.as_str())
                .collect();
            writeln!(
                f,
                "func[{}] {} locals={} max_stack={}B/{} exports={:?}",
                idx,
                func.meta.signature,
                func.meta.locals.len(),
                func.meta.max_stack_size_bytes,
                func.meta.max_stack_elements,
                names
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valtype_decode() {
        for byte in 0u8..=0xff {
            match ValType::decode(byte) {
                Some(vt) => assert_eq!(vt as u8, byte),
                None => assert!(![0x7f, 0x7e, 0x7d, 0x7c, 0x7b, 0x70, 0x6f].contains(&byte)),
            }
        }
    }

    #[test]
    fn test_valtype_sizes() {
        assert_eq!(ValType::I32.size_bytes(), 4);
        assert_eq!(ValType::I64.size_bytes(), 8);
        assert_eq!(ValType::F32.size_bytes(), 4);
        assert_eq!(ValType::F64.size_bytes(), 8);
        assert_eq!(ValType::V128.size_bytes(), 16);
        assert_eq!(ValType::FuncRef.size_bytes(), mem::size_of::<usize>());
        assert!(ValType::ExternRef.is_ref());
        assert!(!ValType::V128.is_ref());
    }

    #[test]
    fn test_signature_display() {
        let sig = FunctionSignature {
            params: vec![ValType::I32, ValType::I64],
            results: vec![ValType::I32],
        };
        assert_eq!(sig.to_string(), "(i32, i64) -> (i32)");
        assert_eq!(FunctionSignature::default().to_string(), "() -> ()");
    }
}
