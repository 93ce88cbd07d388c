//! Fibers: functions that run on their own stack on the calling OS thread and
//! can pause themselves part way through.
//!
//! A [`VMThread`] switches between exactly two contexts, the host that calls
//! [`VMThread::resume`] and the fiber itself, which hands control back with
//! [`VMThread::yield_now`] or by returning. Only one fiber can be active on an
//! OS thread at a time; fibers do not nest.

// Declares a global function symbol in `global_asm!`. Mach-O prefixes C
// symbols with an underscore.
#[cfg(target_vendor = "apple")]
macro_rules! asm_function {
    ($name:literal) => {
        concat!(".globl _", $name, "\n.p2align 4\n_", $name, ":")
    };
}

#[cfg(not(target_vendor = "apple"))]
macro_rules! asm_function {
    ($name:literal) => {
        concat!(
            ".globl ", $name, "\n.hidden ", $name, "\n.type ", $name, ", %function\n.p2align 4\n", $name, ":"
        )
    };
}

mod stack;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        use x86_64 as arch;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        use aarch64 as arch;
    }
}

pub use stack::page_size;

use super::RuntimeError;
use arch::SaveArea;
use log::trace;
use stack::Stack;
use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

/// Default size of a fiber stack, 64 KiB.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VMThreadConfig {
    /// Usable stack bytes, rounded up to whole pages.
    pub stack_size: usize,
    /// Put an inaccessible page on each side of the stack so overflow and
    /// underflow abort the process.
    pub enable_guard_pages: bool,
}

impl Default for VMThreadConfig {
    fn default() -> Self {
        VMThreadConfig {
            stack_size: DEFAULT_STACK_SIZE,
            enable_guard_pages: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not started, finished, or stopped. The next resume starts the function
    /// from the top.
    Stopped,
    /// Paused in [`VMThread::yield_now`].
    Suspended,
    Running,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Stopped => write!(f, "stopped"),
            State::Suspended => write!(f, "suspended"),
            State::Running => write!(f, "running"),
        }
    }
}

thread_local! {
    static CURRENT: Cell<*const VMThread> = const { Cell::new(ptr::null()) };
}

/// A function running on its own stack, on the OS thread that resumes it.
///
/// Threads are boxed because the fiber keeps a pointer to its `VMThread`
/// while it runs. A thread may be dropped while stopped or suspended; the
/// frames of a suspended function are discarded without running their
/// destructors. Dropping a running thread aborts the process.
pub struct VMThread {
    state: Cell<State>,
    func: UnsafeCell<Box<dyn FnMut()>>,
    stack: Stack,
    own_context: UnsafeCell<SaveArea>,
    host_context: UnsafeCell<SaveArea>,
    panic: Cell<Option<Box<dyn Any + Send>>>,
}

impl VMThread {
    pub fn create(func: impl FnMut() + 'static, config: VMThreadConfig) -> Result<Box<Self>, RuntimeError> {
        let stack =
            Stack::new(config.stack_size, config.enable_guard_pages).map_err(RuntimeError::StackAllocation)?;
        trace!(
            "created thread with {} byte stack at {:#x}",
            stack.size(),
            stack.bottom()
        );
        Ok(Box::new(VMThread {
            state: Cell::new(State::Stopped),
            func: UnsafeCell::new(Box::new(func)),
            stack,
            own_context: UnsafeCell::new(SaveArea::default()),
            host_context: UnsafeCell::new(SaveArea::default()),
            panic: Cell::new(None),
        }))
    }

    /// Start the function, or continue it from where it last yielded. Returns
    /// once it yields again or finishes.
    ///
    /// A panic in the function is re-raised here, after the thread has moved
    /// to [`State::Stopped`].
    pub fn resume(&self) -> Result<(), RuntimeError> {
        if !CURRENT.with(Cell::get).is_null() {
            return Err(RuntimeError::NestedResume);
        }
        if self.state.get() == State::Stopped {
            unsafe {
                arch::init_context(
                    &mut *self.own_context.get(),
                    self.stack.top(),
                    thread_entry as *const () as usize,
                    self as *const VMThread as usize,
                );
            }
        }
        trace!("resuming {} thread", self.state.get());
        self.state.set(State::Running);
        self.switch_in();
        trace!("thread is {}", self.state.get());

        if let Some(payload) = self.panic.take() {
            panic::resume_unwind(payload);
        }
        Ok(())
    }

    /// Reset a suspended thread so that the next resume starts over. Has no
    /// effect on a stopped thread.
    pub fn stop(&self) -> Result<(), RuntimeError> {
        match self.state.get() {
            State::Running => Err(RuntimeError::StopWhileRunning),
            State::Suspended => {
                trace!("stopping suspended thread");
                self.state.set(State::Stopped);
                Ok(())
            }
            State::Stopped => Ok(()),
        }
    }

    /// Pause the active thread and return to whoever resumed it.
    pub fn yield_now() -> Result<(), RuntimeError> {
        let current = CURRENT.with(Cell::get);
        if current.is_null() {
            return Err(RuntimeError::NoActiveThread);
        }
        let thread = unsafe { &*current };
        thread.state.set(State::Suspended);
        thread.switch_out();
        Ok(())
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn stack_bottom(&self) -> usize {
        self.stack.bottom()
    }

    pub fn stack_top(&self) -> usize {
        self.stack.top()
    }

    fn switch_in(&self) {
        CURRENT.with(|c| c.set(self));
        unsafe { arch::switch(self.host_context.get(), self.own_context.get()) };
    }

    fn switch_out(&self) {
        CURRENT.with(|c| c.set(ptr::null()));
        unsafe { arch::switch(self.own_context.get(), self.host_context.get()) };
    }
}

impl Drop for VMThread {
    fn drop(&mut self) {
        let current = CURRENT.with(Cell::get);
        if self.state.get() == State::Running || ptr::eq(current, self) {
            log::error!("VMThread dropped while running");
            std::process::abort();
        }
    }
}

impl fmt::Debug for VMThread {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VMThread")
            .field("state", &self.state.get())
            .field("stack_bottom", &format_args!("{:#x}", self.stack_bottom()))
            .field("stack_top", &format_args!("{:#x}", self.stack_top()))
            .finish()
    }
}

/// First frame on every fiber stack.
extern "C" fn thread_entry(thread: *const VMThread) -> ! {
    let thread = unsafe { &*thread };
    let func = unsafe { &mut *thread.func.get() };
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(func)) {
        thread.panic.set(Some(payload));
    }
    thread.state.set(State::Stopped);
    thread.switch_out();
    // a stopped thread is always re-entered through a fresh context
    std::process::abort()
}
