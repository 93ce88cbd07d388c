use static_assertions::const_assert_eq;
use std::arch::global_asm;
use std::mem;

/// Bytes below the initial stack pointer left alone for the System V red
/// zone.
const RED_ZONE: usize = 128;

/// Planted as the return address of the entry function, which never returns.
const DUMMY_RETURN_ADDRESS: usize = 0xdead_dead_dead_dead;

/// Registers preserved across a switch. The field order is the layout the
/// assembly below reads and writes.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SaveArea {
    rip: usize,
    rsp: usize,
    rbp: usize,
    rbx: usize,
    r12: usize,
    r13: usize,
    r14: usize,
    r15: usize,
}

const_assert_eq!(mem::size_of::<SaveArea>(), 8 * mem::size_of::<usize>());

global_asm!(
    ".text",
    asm_function!("wasmcc_switch"),
    "lea rax, [rip + 2f]",
    "mov [rdi], rax",
    "mov [rdi + 8], rsp",
    "mov [rdi + 16], rbp",
    "mov [rdi + 24], rbx",
    "mov [rdi + 32], r12",
    "mov [rdi + 40], r13",
    "mov [rdi + 48], r14",
    "mov [rdi + 56], r15",
    "mov r15, [rsi + 56]",
    "mov r14, [rsi + 48]",
    "mov r13, [rsi + 40]",
    "mov r12, [rsi + 32]",
    "mov rbx, [rsi + 24]",
    "mov rbp, [rsi + 16]",
    "mov rsp, [rsi + 8]",
    "jmp qword ptr [rsi]",
    "2:",
    "ret",
    // first entry: r12 holds the function and r13 its argument
    asm_function!("wasmcc_enter"),
    "mov rdi, r13",
    "jmp r12",
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
    let return_slot = (stack_top - RED_ZONE - mem::size_of::<usize>()) as *mut usize;
    return_slot.write(DUMMY_RETURN_ADDRESS);
    *ctx = SaveArea {
        rip: wasmcc_enter as *const () as usize,
        rsp: return_slot as usize,
        r12: entry,
        r13: arg,
        ..SaveArea::default()
    };
}
