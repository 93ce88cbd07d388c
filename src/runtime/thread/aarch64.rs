use static_assertions::const_assert_eq;
use std::arch::global_asm;
use std::mem;

/// Planted as the link register of the entry function, which never returns.
const DUMMY_RETURN_ADDRESS: usize = 0xdead_dead_dead_dead;

/// Registers preserved across a switch. The field order is the layout the
/// assembly below reads and writes.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SaveArea {
    /// x19 to x30
    x: [usize; 12],
    sp: usize,
    lr: usize,
    /// Low halves of v8 to v15.
    d: [u64; 8],
}

const_assert_eq!(mem::size_of::<SaveArea>(), 22 * mem::size_of::<usize>());

global_asm!(
    ".text",
    asm_function!("wasmcc_switch"),
    "mov x10, sp",
    "mov x11, x30",
    "stp x19, x20, [x0, #0]",
    "stp x21, x22, [x0, #16]",
    "stp x23, x24, [x0, #32]",
    "stp x25, x26, [x0, #48]",
    "stp x27, x28, [x0, #64]",
    "stp x29, x30, [x0, #80]",
    "stp x10, x11, [x0, #96]",
    "stp d8, d9, [x0, #112]",
    "stp d10, d11, [x0, #128]",
    "stp d12, d13, [x0, #144]",
    "stp d14, d15, [x0, #160]",
    "ldp x19, x20, [x1, #0]",
    "ldp x21, x22, [x1, #16]",
    "ldp x23, x24, [x1, #32]",
    "ldp x25, x26, [x1, #48]",
    "ldp x27, x28, [x1, #64]",
    "ldp x29, x30, [x1, #80]",
    "ldp x10, x11, [x1, #96]",
    "ldp d8, d9, [x1, #112]",
    "ldp d10, d11, [x1, #128]",
    "ldp d12, d13, [x1, #144]",
    "ldp d14, d15, [x1, #160]",
    "mov sp, x10",
    "br x11",
    // first entry: x19 holds the argument, x20 the function and x21 the
    // return address it is given
    asm_function!("wasmcc_enter"),
    "mov x0, x19",
    "mov x30, x21",
    "br x20",
);

extern "C" {
    fn wasmcc_switch(from: *mut SaveArea, to: *const SaveArea);
    fn wasmcc_enter();
}

/// Save the current registers into `from` and continue from `to`.
///
/// # Safety
///
/// `to` must hold a context produced by a previous switch or by
/// [`init_context`], whose stack is still mapped.
pub unsafe fn switch(from: *mut SaveArea, to: *const SaveArea) {
    wasmcc_switch(from, to);
}

/// Prepare `ctx` so that switching to it calls `entry(arg)` on the stack
/// ending at `stack_top`.
///
/// # Safety
///
/// `stack_top` must be the 16-byte aligned end of a writable stack.
pub unsafe fn init_context(ctx: &mut SaveArea, stack_top: usize, entry: usize, arg: usize) {
    *ctx = SaveArea::default();
    ctx.x[0] = arg;
    ctx.x[1] = entry;
    ctx.x[2] = DUMMY_RETURN_ADDRESS;
    ctx.sp = stack_top;
    ctx.lr = wasmcc_enter as *const () as usize;
}
