use super::signature::{signature_of, NativeParams, NativeResult};
use super::thread::{State, VMThread, VMThreadConfig};
use super::RuntimeError;
use crate::compiler::module::CompiledModule;
use log::debug;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

type Pending = Rc<RefCell<Option<Box<dyn FnOnce()>>>>;

/// A compiled module ready to run, together with the thread its functions
/// run on.
///
/// One computation runs at a time. A computation is started by
/// [`FunctionHandle::invoke`] and driven with [`Computation::execute`].
pub struct VM {
    thread: Box<VMThread>,
    pending: Pending,
    /// Bumped by every invoke; identifies the computation that owns the thread.
    invocation: Cell<u64>,
    module: CompiledModule,
}

impl VM {
    pub fn create(module: CompiledModule) -> Result<Self, RuntimeError> {
        if !module.is_executable() {
            return Err(RuntimeError::ForeignArchitecture(module.architecture));
        }
        let pending: Pending = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&pending);
        let thread = VMThread::create(
            move || {
                // taken before parking so a stopped computation can be replaced
                let Some(func) = slot.borrow_mut().take() else {
                    return;
                };
                if VMThread::yield_now().is_ok() {
                    func();
                }
            },
            VMThreadConfig::default(),
        )?;
        Ok(VM {
            thread,
            pending,
            invocation: Cell::new(0),
            module,
        })
    }

    /// Find an exported function whose WASM signature matches `fn(P) -> R`.
    pub fn lookup_function<P: NativeParams, R: NativeResult>(
        &self,
        name: &str,
    ) -> Option<FunctionHandle<'_, P, R>> {
        let func = self.module.exported_function(name)?;
        let expected = signature_of::<P, R>();
        if func.metadata().signature != expected {
            debug!(
                "{} has signature {}, not {}",
                name,
                func.metadata().signature,
                expected
            );
            return None;
        }
        Some(FunctionHandle {
            vm: self,
            entry: func.entry_point()?,
            _signature: PhantomData,
        })
    }

    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    fn is_busy(&self) -> bool {
        self.pending.borrow().is_some() || self.thread.state() != State::Stopped
    }
}

/// A typed reference to a compiled function in a [`VM`].
pub struct FunctionHandle<'vm, P, R> {
    vm: &'vm VM,
    entry: *const u8,
    _signature: PhantomData<fn(P) -> R>,
}

impl<'vm, P: NativeParams, R: NativeResult> FunctionHandle<'vm, P, R> {
    /// Start a call. The returned computation is parked before any compiled
    /// code has run.
    pub fn invoke(&self, args: P) -> Result<Computation<'vm, R>, RuntimeError> {
        if self.vm.is_busy() {
            return Err(RuntimeError::Busy);
        }
        let result = Rc::new(Cell::new(None));
        let out = Rc::clone(&result);
        let entry = self.entry;
        *self.vm.pending.borrow_mut() = Some(Box::new(move || {
            // the signature was checked by lookup_function
            out.set(Some(unsafe { args.call::<R>(entry) }));
        }));
        if let Err(e) = self.vm.thread.resume() {
            self.vm.pending.borrow_mut().take();
            return Err(e);
        }
        let id = self.vm.invocation.get() + 1;
        self.vm.invocation.set(id);
        Ok(Computation {
            vm: self.vm,
            id,
            result,
        })
    }

    /// Run a call to completion.
    pub fn call(&self, args: P) -> Result<R, RuntimeError> {
        let computation = self.invoke(args)?;
        computation.execute()?;
        computation.result().ok_or(RuntimeError::Incomplete)
    }
}

/// An in-flight call of a [`FunctionHandle`].
///
/// Dropping a parked computation cancels it.
pub struct Computation<'vm, R> {
    vm: &'vm VM,
    id: u64,
    result: Rc<Cell<Option<R>>>,
}

impl<'vm, R> Computation<'vm, R> {
    /// Whether the VM's thread is parked in this computation rather than a
    /// later one.
    fn is_parked(&self) -> bool {
        self.vm.invocation.get() == self.id && self.vm.thread.state() == State::Suspended
    }
}

impl<'vm, R: NativeResult> Computation<'vm, R> {
    /// Continue the call if it is parked.
    pub fn execute(&self) -> Result<(), RuntimeError> {
        if self.is_parked() {
            self.vm.thread.resume()?;
        }
        Ok(())
    }

    /// Abandon a parked call, leaving the VM free for another.
    pub fn cancel(&self) -> Result<(), RuntimeError> {
        if self.is_parked() {
            self.vm.thread.stop()?;
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        // a later invoke is only possible once this one has finished
        self.vm.invocation.get() != self.id || self.vm.thread.state() == State::Stopped
    }

    /// The value returned by the function, once it has finished.
    pub fn result(&self) -> Option<R> {
        self.result.get()
    }
}

impl<'vm, R> Drop for Computation<'vm, R> {
    fn drop(&mut self) {
        if self.is_parked() && self.vm.thread.stop().is_ok() {
            debug!("cancelled parked computation on drop");
        }
    }
}
