//! Running compiled code.
//!
//! Compiled functions run on a [`thread::VMThread`], a fiber with its own
//! guard-paged stack, so a call can be parked before it starts and resumed
//! by the host. [`vm::VM`] ties a compiled module to such a thread and hands
//! out typed handles to its exported functions.

pub mod signature;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub mod thread;
pub mod value;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub mod vm;

pub use value::Value;

use crate::compiler::Architecture;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("VMThread does not support calling into another VMThread")]
    NestedResume,
    #[error("Attempting to yield when there is no VMThread")]
    NoActiveThread,
    #[error("Cannot stop a running VMThread")]
    StopWhileRunning,
    #[error("Failed to allocate thread stack")]
    StackAllocation(#[source] io::Error),
    #[error("Cannot run a function when one is already executing")]
    Busy,
    #[error("Computation finished without a result")]
    Incomplete,
    #[error("Module compiled for {0} cannot run on this host")]
    ForeignArchitecture(Architecture),
}
