//! Implementation limits enforced while parsing.
//!
//! Counts above these caps are rejected with `ParseError::ModuleTooLarge`
//! before any allocation happens, so a hostile module cannot claim an
//! unrealistic vector length.

// =============================================================================
// Module-level limits
// =============================================================================

/// Maximum number of function signatures in the type section
pub const MAX_FUNCTION_SIGNATURES: u32 = 1 << 17;

/// Maximum number of defined functions in a module
pub const MAX_FUNCTIONS: u32 = 1 << 16;

/// Maximum number of imports in a module
pub const MAX_IMPORTS: u32 = 1 << 8;

/// Maximum number of tables in a module
///
/// Individual table sizes are a runtime concern and are not checked here.
pub const MAX_TABLES: u32 = 1 << 4;

/// Maximum number of memories in a module
pub const MAX_MEMORIES: u32 = 1;

/// Maximum number of globals in a module
pub const MAX_GLOBALS: u32 = 1 << 10;

/// Maximum number of exports in a module
pub const MAX_EXPORTS: u32 = 1 << 8;

/// Maximum byte length of an import or export name
pub const MAX_NAME_LENGTH: u32 = 1 << 8;

// =============================================================================
// Function-level limits
// =============================================================================

/// Maximum number of declared locals in a function, parameters excluded
pub const MAX_FUNCTION_LOCALS: u32 = 1 << 8;

/// Maximum number of function parameters
///
/// Kept at six so that every argument arrives in a register on both
/// supported calling conventions.
pub const MAX_FUNCTION_PARAMS: u32 = 6;

/// Maximum number of function results
pub const MAX_FUNCTION_RESULTS: u32 = 1;
