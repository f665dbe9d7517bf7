//! x86_64 (System V) context switch
//!
//! The initial stack of a task holds a single return address pointing at
//! [`task_entry_trampoline`]. The first switch into the task pops it with
//! `ret`, and the trampoline calls the entry function with the argument moved
//! into `rdi`.

use ::x86_64::VirtAddr;

use super::{EntryFn, MIN_PREPARE_SIZE, STACK_ALIGN};

/// CPU context saved during a context switch
///
/// Only callee-saved registers are stored. The order must match the assembly
/// in [`switch_context`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub r15: u64,
    pub r14: u64,
    /// Argument for the entry function on a freshly prepared context
    pub r13: u64,
    /// Entry function on a freshly prepared context
    pub r12: u64,
    pub rbx: u64,
    /// Frame pointer, zero on a fresh context so stack walks stop there
    pub rbp: u64,
    /// Stack pointer - saved last, restored last
    pub rsp: u64,
}

impl Context {
    /// Saved stack pointer
    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }
}

/// Switch from the current context to `next`
///
/// Saves all callee-saved registers to `current`, restores them from `next`
/// and returns into whatever return address sits on top of the new stack.
///
/// # Safety
/// - Both pointers must be valid and properly aligned
/// - `next` must come from [`prepare`] or from an earlier `switch_context`
///   whose stack is still alive
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_current: *mut Context, _next: *const Context) {
    // rdi = current, rsi = next
    core::arch::naked_asm!(
        "mov [rdi + 0], r15",
        "mov [rdi + 8], r14",
        "mov [rdi + 16], r13",
        "mov [rdi + 24], r12",
        "mov [rdi + 32], rbx",
        "mov [rdi + 40], rbp",
        "mov [rdi + 48], rsp",
        "mov r15, [rsi + 0]",
        "mov r14, [rsi + 8]",
        "mov r13, [rsi + 16]",
        "mov r12, [rsi + 24]",
        "mov rbx, [rsi + 32]",
        "mov rbp, [rsi + 40]",
        "mov rsp, [rsi + 48]",
        "ret",
    )
}

/// First code a task executes on its own stack
///
/// R12 holds the entry function and R13 its argument. When the entry returns
/// the task is done and the completion handler switches away for good.
#[unsafe(naked)]
unsafe extern "C" fn task_entry_trampoline() -> ! {
    core::arch::naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {finished}",
        "ud2",
        finished = sym crate::scheduler::task_finished,
    )
}

/// Build the initial context for a task running on `stack`
///
/// Panics if `stack` is smaller than [`MIN_PREPARE_SIZE`].
pub fn prepare(stack: &mut [u8], entry: EntryFn, arg: *mut ()) -> Context {
    assert!(
        stack.len() >= MIN_PREPARE_SIZE,
        "task stack of {} bytes is too small",
        stack.len()
    );

    // Stack grows down, so start at the high end
    let base = VirtAddr::from_ptr(stack.as_ptr());
    let top = (base + stack.len() as u64).align_down(STACK_ALIGN as u64);

    // `ret` pops the return slot, leaving rsp 16-byte aligned at the
    // trampoline, so its `call` enters the entry function with the ABI's
    // rsp % 16 == 8
    let ret_slot = top - 8u64;
    let offset = (ret_slot - base) as usize;
    let trampoline = task_entry_trampoline as *const () as usize as u64;
    stack[offset..offset + 8].copy_from_slice(&trampoline.to_ne_bytes());

    Context {
        rsp: ret_slot.as_u64(),
        r12: entry as usize as u64,
        r13: arg as usize as u64,
        ..Default::default()
    }
}
