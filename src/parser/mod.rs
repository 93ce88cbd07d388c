//! Binary module parsing.
//!
//! [`parse_module`] reads a module from any [`Stream`](reader::Stream),
//! enforcing the caps in [`limits`] and validating every function body as it
//! is decoded. The result is a [`ParsedModule`](module::ParsedModule) ready
//! for the compiler.
//!
//! Sections must appear in increasing id order; custom sections may appear
//! anywhere and are skipped.

pub mod encoding;
pub mod instruction;
pub mod leb128;
pub mod limits;
pub mod module;
pub mod reader;
pub mod validate;

use crate::coro::maybe_yield;
use crate::runtime::value::Value;
use encoding::*;
use instruction::Instruction;
use leb128::DecodeError;
use log::{debug, trace};
use module::*;
use reader::{ByteStream, Stream, StreamError};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use validate::{FunctionValidator, ValidationError};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unexpected end of stream")]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid function body: {0}")]
    Validation(#[from] ValidationError),

    /// An implementation limit was exceeded; the module itself may be valid.
    #[error("module too large: {0}")]
    ModuleTooLarge(String),

    #[error("magic bytes mismatch: {0}")]
    BadMagic(String),

    #[error("unsupported wasm version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid section order, section id {id} is after id {previous}")]
    SectionOrder { id: u8, previous: u8 },

    #[error("unknown section id: {0}")]
    UnknownSection(u8),

    #[error("section {id} declared {expected} bytes but {actual} were read")]
    SectionSizeMismatch { id: u8, expected: u32, actual: usize },

    #[error("{0} unimplemented")]
    Unimplemented(&'static str),

    #[error("unsupported opcode: {0:#04x}")]
    UnsupportedOpcode(u8),

    #[error("unknown valtype: {0:#04x}")]
    UnknownValType(u8),

    #[error("function type magic mismatch: {0:#04x}")]
    TypeMagicMismatch(u8),

    #[error("invalid tabletype type: {0}")]
    InvalidTableType(ValType),

    #[error("unknown import type: {0:#04x}")]
    UnknownImportKind(u8),

    #[error("unknown export type: {0:#04x}")]
    UnknownExportKind(u8),

    #[error("{what} out of range - {idx} not in [0, {len})")]
    OutOfRange {
        what: &'static str,
        idx: u32,
        len: usize,
    },

    #[error("duplicate exported name: {0}")]
    DuplicateExport(String),

    #[error("name too long: {0}")]
    NameTooLong(u32),

    #[error("name is not valid UTF-8: {0}")]
    InvalidName(#[source] std::string::FromUtf8Error),

    #[error("unimplemented global value: {0:#04x}")]
    UnimplementedConstExpr(u8),

    #[error("global declared as {expected} but initialised with {actual}")]
    GlobalTypeMismatch { expected: ValType, actual: ValType },

    #[error("constant expression not terminated by end, found {0:#04x}")]
    UnterminatedConstExpr(u8),

    #[error("unexpected number of code, actual: {actual} expected: {expected}")]
    CodeCountMismatch { actual: u32, expected: usize },

    #[error("unexpected size of function, actual: {actual} expected: {expected}")]
    FunctionSizeMismatch { actual: usize, expected: u32 },
}

impl ParseError {
    pub fn is_module_too_large(&self) -> bool {
        matches!(self, ParseError::ModuleTooLarge(_))
    }
}

/// Parse a complete module from `stream`.
///
/// Yields to the executor between sections and between the items of each
/// section, so a large module does not monopolise the thread.
pub async fn parse_module<S: Stream + ?Sized>(stream: &mut S) -> Result<ParsedModule, ParseError> {
    let mut builder = ModuleBuilder::new();
    builder.parse(stream).await?;
    Ok(builder.build())
}

/// Parse a module held in memory, blocking until done.
pub fn parse(bytes: &[u8]) -> Result<ParsedModule, ParseError> {
    let mut stream = ByteStream::new(bytes.to_vec());
    futures::executor::block_on(parse_module(&mut stream))
}

/// Accumulates the sections of one module in order.
///
/// A builder is single use: feed it one stream with [`parse`](Self::parse),
/// then consume it with [`build`](Self::build).
#[derive(Default)]
pub struct ModuleBuilder {
    // Sections must be read in order so that every cross-reference points
    // at something already seen. Custom sections are exempt.
    latest_section_read: u8,

    signatures: Vec<FunctionSignature>,
    imports: Vec<Import>,
    functions: Vec<Function>,
    tables: Vec<Table>,
    memories: Vec<Memory>,
    globals: Vec<Global>,
    exports: Vec<Export>,
    start: Option<u32>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn parse<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<(), ParseError> {
        let magic = stream.read_bytes(MAGIC.len())?;
        if magic != MAGIC {
            return Err(ParseError::BadMagic(hex::encode(&magic)));
        }
        let version = stream.read_bytes(VERSION.len())?;
        if version != VERSION {
            return Err(ParseError::UnsupportedVersion(hex::encode(&version)));
        }

        while stream.has_remaining() {
            self.parse_section(stream).await?;
            maybe_yield().await;
        }
        Ok(())
    }

    /// Consume the builder. Only function exports are kept in the name map.
    pub fn build(self) -> ParsedModule {
        let exported_functions: HashMap<String, u32> = self
            .exports
            .into_iter()
            .filter_map(|export| match export.description {
                ExportDescription::Func(idx) => Some((export.name, idx)),
                _ => None,
            })
            .collect();
        debug!(
            "built module: {} functions, {} exported",
            self.functions.len(),
            exported_functions.len()
        );
        ParsedModule {
            functions: self.functions,
            exported_functions,
            start: self.start,
            imports: self.imports,
            tables: self.tables,
            memories: self.memories,
            globals: self.globals,
        }
    }

    async fn parse_section<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<(), ParseError> {
        let id = stream.read_byte()?;
        if id != SECTION_CUSTOM {
            if id <= self.latest_section_read {
                return Err(ParseError::SectionOrder {
                    id,
                    previous: self.latest_section_read,
                });
            }
            self.latest_section_read = id;
        }
        let size: u32 = leb128::decode(stream)?;
        let start = stream.bytes_consumed();

        match id {
            SECTION_CUSTOM => {
                trace!("skipping custom section, {size} bytes");
                stream.skip(size as usize)?;
                return Ok(());
            }
            SECTION_TYPE => self.parse_signature_section(stream).await?,
            SECTION_IMPORT => self.parse_import_section(stream).await?,
            SECTION_FUNCTION => self.parse_function_declaration_section(stream).await?,
            SECTION_TABLE => self.parse_table_section(stream).await?,
            SECTION_MEMORY => self.parse_memory_section(stream).await?,
            SECTION_GLOBAL => self.parse_global_section(stream).await?,
            SECTION_EXPORT => self.parse_export_section(stream).await?,
            SECTION_START => {
                let idx: u32 = leb128::decode(stream)?;
                check_in_range("start function", idx, self.functions.len())?;
                self.start = Some(idx);
            }
            SECTION_ELEMENT => return Err(ParseError::Unimplemented("tables")),
            SECTION_CODE => self.parse_code_section(stream).await?,
            SECTION_DATA | SECTION_DATA_COUNT => return Err(ParseError::Unimplemented("memories")),
            _ => return Err(ParseError::UnknownSection(id)),
        }

        let actual = stream.bytes_consumed() - start;
        if actual != size as usize {
            return Err(ParseError::SectionSizeMismatch {
                id,
                expected: size,
                actual,
            });
        }
        debug!("section {id}: {size} bytes");
        Ok(())
    }

    async fn parse_signature_section<S: Stream + ?Sized>(
        &mut self,
        stream: &mut S,
    ) -> Result<(), ParseError> {
        let count = read_vector_len(stream, limits::MAX_FUNCTION_SIGNATURES, "type section")?;
        for _ in 0..count {
            self.signatures.push(read_signature(stream)?);
            maybe_yield().await;
        }
        Ok(())
    }

    async fn parse_import_section<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<(), ParseError> {
        let count = read_vector_len(stream, limits::MAX_IMPORTS, "imports")?;
        for _ in 0..count {
            let module = read_name(stream)?;
            let name = read_name(stream)?;
            let kind = stream.read_byte()?;
            let description = match kind {
                DESC_FUNC => {
                    let idx: u32 = leb128::decode(stream)?;
                    check_in_range("unknown import function signature", idx, self.signatures.len())?;
                    ImportDescription::Func(idx)
                }
                DESC_TABLE => ImportDescription::Table(read_table_type(stream)?),
                DESC_MEMORY => ImportDescription::Mem(MemType {
                    limits: read_limits(stream)?,
                }),
                DESC_GLOBAL => ImportDescription::Global(read_global_type(stream)?),
                _ => return Err(ParseError::UnknownImportKind(kind)),
            };
            trace!("import {module}.{name}: {description:?}");
            self.imports.push(Import {
                module,
                name,
                description,
            });
            maybe_yield().await;
        }
        Ok(())
    }

    async fn parse_function_declaration_section<S: Stream + ?Sized>(
        &mut self,
        stream: &mut S,
    ) -> Result<(), ParseError> {
        let count = read_vector_len(stream, limits::MAX_FUNCTIONS, "functions")?;
        for _ in 0..count {
            let idx: u32 = leb128::decode(stream)?;
            check_in_range("unknown function signature", idx, self.signatures.len())?;
            self.functions.push(Function {
                meta: FunctionMetadata {
                    signature: self.signatures[idx as usize].clone(),
                    ..Default::default()
                },
                body: vec![],
            });
            maybe_yield().await;
        }
        Ok(())
    }

    async fn parse_table_section<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<(), ParseError> {
        let count = read_vector_len(stream, limits::MAX_TABLES, "tables")?;
        for _ in 0..count {
            self.tables.push(Table {
                table_type: read_table_type(stream)?,
            });
            maybe_yield().await;
        }
        Ok(())
    }

    async fn parse_memory_section<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<(), ParseError> {
        let count = read_vector_len(stream, limits::MAX_MEMORIES, "memories")?;
        for _ in 0..count {
            self.memories.push(Memory {
                mem_type: MemType {
                    limits: read_limits(stream)?,
                },
            });
            maybe_yield().await;
        }
        Ok(())
    }

    async fn parse_global_section<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<(), ParseError> {
        let count = read_vector_len(stream, limits::MAX_GLOBALS, "globals")?;
        for _ in 0..count {
            let global_type = read_global_type(stream)?;
            let (actual, value) = read_const_expr(stream)?;
            if actual != global_type.valtype {
                return Err(ParseError::GlobalTypeMismatch {
                    expected: global_type.valtype,
                    actual,
                });
            }
            trace!(
                "global[{}] {} = {}",
                self.globals.len(),
                actual,
                value.format_as(actual)
            );
            self.globals.push(Global { global_type, value });
            maybe_yield().await;
        }
        Ok(())
    }

    async fn parse_export_section<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<(), ParseError> {
        let count = read_vector_len(stream, limits::MAX_EXPORTS, "exports")?;
        let mut names = HashSet::new();
        for _ in 0..count {
            let name = read_name(stream)?;
            let kind = stream.read_byte()?;
            let idx: u32 = leb128::decode(stream)?;
            let description = match kind {
                DESC_FUNC => {
                    check_in_range("unknown function export", idx, self.functions.len())?;
                    ExportDescription::Func(idx)
                }
                DESC_TABLE => {
                    check_in_range("unknown table export", idx, self.tables.len())?;
                    ExportDescription::Table(idx)
                }
                DESC_MEMORY => {
                    check_in_range("unknown memory export", idx, self.memories.len())?;
                    ExportDescription::Mem(idx)
                }
                DESC_GLOBAL => {
                    check_in_range("unknown global export", idx, self.globals.len())?;
                    ExportDescription::Global(idx)
                }
                _ => return Err(ParseError::UnknownExportKind(kind)),
            };
            if !names.insert(name.clone()) {
                return Err(ParseError::DuplicateExport(name));
            }
            self.exports.push(Export { name, description });
            maybe_yield().await;
        }
        Ok(())
    }

    async fn parse_code_section<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<(), ParseError> {
        // the function section already bounded the count
        let count: u32 = leb128::decode(stream)?;
        if count as usize != self.functions.len() {
            return Err(ParseError::CodeCountMismatch {
                actual: count,
                expected: self.functions.len(),
            });
        }
        for func in self.functions.iter_mut() {
            read_code(stream, func)?;
            maybe_yield().await;
        }
        Ok(())
    }
}

// Section item readers ------------------------------------------------------

fn read_vector_len<S: Stream + ?Sized>(
    stream: &mut S,
    max: u32,
    what: &str,
) -> Result<u32, ParseError> {
    let len: u32 = leb128::decode(stream)?;
    if len > max {
        return Err(ParseError::ModuleTooLarge(format!(
            "too many {what}: {len}, max: {max}"
        )));
    }
    Ok(len)
}

fn check_in_range(what: &'static str, idx: u32, len: usize) -> Result<(), ParseError> {
    if idx as usize >= len {
        return Err(ParseError::OutOfRange { what, idx, len });
    }
    Ok(())
}

fn read_valtype<S: Stream + ?Sized>(stream: &mut S) -> Result<ValType, ParseError> {
    let byte = stream.read_byte()?;
    match ValType::decode(byte) {
        // no SIMD support
        Some(ValType::V128) | None => Err(ParseError::UnknownValType(byte)),
        Some(vt) => Ok(vt),
    }
}

fn read_name<S: Stream + ?Sized>(stream: &mut S) -> Result<String, ParseError> {
    let len: u32 = leb128::decode(stream)?;
    if len > limits::MAX_NAME_LENGTH {
        return Err(ParseError::NameTooLong(len));
    }
    let bytes = stream.read_bytes(len as usize)?;
    String::from_utf8(bytes).map_err(ParseError::InvalidName)
}

fn read_signature_types<S: Stream + ?Sized>(
    stream: &mut S,
    max: u32,
    what: &str,
) -> Result<Vec<ValType>, ParseError> {
    let len: u32 = leb128::decode(stream)?;
    if len > max {
        return Err(ParseError::ModuleTooLarge(format!(
            "too many {what} to function: {len}, max: {max}"
        )));
    }
    (0..len).map(|_| read_valtype(stream)).collect()
}

fn read_signature<S: Stream + ?Sized>(stream: &mut S) -> Result<FunctionSignature, ParseError> {
    let magic = stream.read_byte()?;
    if magic != TYPE_FUNC {
        return Err(ParseError::TypeMagicMismatch(magic));
    }
    let params = read_signature_types(stream, limits::MAX_FUNCTION_PARAMS, "parameters")?;
    let results = read_signature_types(stream, limits::MAX_FUNCTION_RESULTS, "results")?;
    Ok(FunctionSignature { params, results })
}

fn read_limits<S: Stream + ?Sized>(stream: &mut S) -> Result<Limits, ParseError> {
    let flags = stream.read_byte()?;
    let min = leb128::decode(stream)?;
    let max = if flags & LIMITS_HAS_MAX != 0 {
        leb128::decode(stream)?
    } else {
        u32::MAX
    };
    Ok(Limits { min, max })
}

fn read_table_type<S: Stream + ?Sized>(stream: &mut S) -> Result<TableType, ParseError> {
    let reftype = read_valtype(stream)?;
    if !reftype.is_ref() {
        return Err(ParseError::InvalidTableType(reftype));
    }
    let limits = read_limits(stream)?;
    Ok(TableType { limits, reftype })
}

fn read_global_type<S: Stream + ?Sized>(stream: &mut S) -> Result<GlobalType, ParseError> {
    let valtype = read_valtype(stream)?;
    let mutable = stream.read_byte()? != 0;
    Ok(GlobalType { valtype, mutable })
}

/// Read a constant initialiser, returning the type it produces.
///
/// Only the numeric `*.const` forms are supported.
fn read_const_expr<S: Stream + ?Sized>(stream: &mut S) -> Result<(ValType, Value), ParseError> {
    let opcode = stream.read_byte()?;
    let result = match opcode {
        OP_I32_CONST => (ValType::I32, Value::i32(leb128::decode(stream)?)),
        OP_I64_CONST => (ValType::I64, Value::i64(leb128::decode(stream)?)),
        OP_F32_CONST => (ValType::F32, Value::f32(stream.read_f32()?)),
        OP_F64_CONST => (ValType::F64, Value::f64(stream.read_f64()?)),
        _ => return Err(ParseError::UnimplementedConstExpr(opcode)),
    };
    let end = stream.read_byte()?;
    if end != OP_END {
        return Err(ParseError::UnterminatedConstExpr(end));
    }
    Ok(result)
}

/// Read one function body into `func`, validating it on the way.
fn read_code<S: Stream + ?Sized>(stream: &mut S, func: &mut Function) -> Result<(), ParseError> {
    let expected: u32 = leb128::decode(stream)?;
    let start = stream.bytes_consumed();

    let groups: u32 = leb128::decode(stream)?;
    let mut locals = vec![];
    for _ in 0..groups {
        let n: u32 = leb128::decode(stream)?;
        let total = usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_add(locals.len()))
            .ok_or_else(|| ParseError::ModuleTooLarge(format!("too many locals: {n} on top of {}", locals.len())))?;
        if total > limits::MAX_FUNCTION_LOCALS as usize {
            return Err(ParseError::ModuleTooLarge(format!("too many locals: {total}")));
        }
        let valtype = read_valtype(stream)?;
        locals.extend(std::iter::repeat(valtype).take(n as usize));
    }

    let mut validator = FunctionValidator::new(&func.meta.signature, &locals);
    let mut body = vec![];
    while let Some(inst) = Instruction::decode(stream)? {
        validator.validate(&inst)?;
        body.push(inst);
    }
    validator.finalize()?;

    let actual = stream.bytes_consumed() - start;
    if actual != expected as usize {
        return Err(ParseError::FunctionSizeMismatch { actual, expected });
    }

    let too_large = |_| ParseError::ModuleTooLarge("function stack too deep".to_string());
    func.meta.locals = locals;
    func.meta.max_stack_size_bytes = u32::try_from(validator.maximum_stack_size_bytes()).map_err(too_large)?;
    func.meta.max_stack_elements = u32::try_from(validator.maximum_stack_elements()).map_err(too_large)?;
    func.body = body;
    Ok(())
}
