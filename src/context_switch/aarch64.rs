//! aarch64 (AAPCS64) context switch
//!
//! A prepared context starts with the link register pointing at
//! [`task_entry_trampoline`], so the `ret` at the end of the first switch
//! lands there. The trampoline moves the argument into `x0` and branches to
//! the entry function.

use super::{EntryFn, MIN_PREPARE_SIZE, STACK_ALIGN};

/// CPU context saved during a context switch
///
/// Layout (must match [`switch_context`]):
///   offset 0:   x19..x28
///   offset 80:  x29 (fp), x30 (lr)
///   offset 96:  sp
///   offset 104: d8..d15
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    /// x19..x28; x19 holds the entry function and x20 its argument on a
    /// freshly prepared context
    pub x: [u64; 10],
    pub fp: u64,
    pub lr: u64,
    pub sp: u64,
    /// Low 64 bits of v8..v15
    pub d: [u64; 8],
}

impl Context {
    /// Saved stack pointer
    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }
}

/// Switch from the current context to `next`
///
/// # Safety
/// - Both pointers must be valid and properly aligned
/// - `next` must come from [`prepare`] or from an earlier `switch_context`
///   whose stack is still alive
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_current: *mut Context, _next: *const Context) {
    // x0 = current, x1 = next
    core::arch::naked_asm!(
        "stp x19, x20, [x0, #0]",
        "stp x21, x22, [x0, #16]",
        "stp x23, x24, [x0, #32]",
        "stp x25, x26, [x0, #48]",
        "stp x27, x28, [x0, #64]",
        "stp x29, x30, [x0, #80]",
        "mov x9, sp",
        "str x9, [x0, #96]",
        "stp d8, d9, [x0, #104]",
        "stp d10, d11, [x0, #120]",
        "stp d12, d13, [x0, #136]",
        "stp d14, d15, [x0, #152]",
        "ldp x19, x20, [x1, #0]",
        "ldp x21, x22, [x1, #16]",
        "ldp x23, x24, [x1, #32]",
        "ldp x25, x26, [x1, #48]",
        "ldp x27, x28, [x1, #64]",
        "ldp x29, x30, [x1, #80]",
        "ldr x9, [x1, #96]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #104]",
        "ldp d10, d11, [x1, #120]",
        "ldp d12, d13, [x1, #136]",
        "ldp d14, d15, [x1, #152]",
        "ret",
    )
}

/// First code a task executes on its own stack
#[unsafe(naked)]
unsafe extern "C" fn task_entry_trampoline() -> ! {
    core::arch::naked_asm!(
        "mov x0, x20",
        "blr x19",
        "bl {finished}",
        "brk #0x1",
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

    let top = stack.as_ptr_range().end as usize & !(STACK_ALIGN - 1);

    let mut x = [0u64; 10];
    x[0] = entry as usize as u64;
    x[1] = arg as usize as u64;

    Context {
        x,
        lr: task_entry_trampoline as *const () as usize as u64,
        sp: top as u64,
        ..Default::default()
    }
}
