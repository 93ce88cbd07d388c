//! WebAssembly binary format constants.

// ---------------------------------------------------------------------------
// Preamble
// ---------------------------------------------------------------------------

pub const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
pub const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

// ---------------------------------------------------------------------------
// Section IDs
// ---------------------------------------------------------------------------

pub const SECTION_CUSTOM: u8 = 0;
pub const SECTION_TYPE: u8 = 1;
pub const SECTION_IMPORT: u8 = 2;
pub const SECTION_FUNCTION: u8 = 3;
pub const SECTION_TABLE: u8 = 4;
pub const SECTION_MEMORY: u8 = 5;
pub const SECTION_GLOBAL: u8 = 6;
pub const SECTION_EXPORT: u8 = 7;
pub const SECTION_START: u8 = 8;
pub const SECTION_ELEMENT: u8 = 9;
pub const SECTION_CODE: u8 = 10;
pub const SECTION_DATA: u8 = 11;
pub const SECTION_DATA_COUNT: u8 = 12;

// Type constructors
pub const TYPE_FUNC: u8 = 0x60;

// Import/export descriptor kinds
pub const DESC_FUNC: u8 = 0x00;
pub const DESC_TABLE: u8 = 0x01;
pub const DESC_MEMORY: u8 = 0x02;
pub const DESC_GLOBAL: u8 = 0x03;

// Limits flag
pub const LIMITS_HAS_MAX: u8 = 0x01;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_END: u8 = 0x0b;
pub const OP_RETURN: u8 = 0x0f;
pub const OP_LOCAL_GET: u8 = 0x20;
pub const OP_LOCAL_SET: u8 = 0x21;
pub const OP_I32_CONST: u8 = 0x41;
pub const OP_I64_CONST: u8 = 0x42;
pub const OP_F32_CONST: u8 = 0x43;
pub const OP_F64_CONST: u8 = 0x44;
pub const OP_I32_ADD: u8 = 0x6a;
