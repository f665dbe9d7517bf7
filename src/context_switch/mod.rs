//! Stack manager: initial task contexts and the context switch primitive
//!
//! Every other module treats [`Context`] as an opaque value. The only
//! operations are [`prepare`], which turns a fresh stack buffer into a context
//! that starts executing an entry function, and [`switch_context`], which
//! saves the running context and resumes another one.
//!
//! Each supported instruction set has its own implementation:
//! - `x86_64` (System V ABI): argument passed in `rdi`
//! - `aarch64` (AAPCS64): argument passed in `x0`
//!
//! # Floating point state
//!
//! Only callee-saved registers are preserved. On both supported ABIs the
//! vector registers that a callee must preserve are covered (none on System V,
//! the low halves of v8-v15 on AAPCS64), so `switch_context` behaves exactly
//! like an ordinary function call from the compiler's point of view.

#[cfg(target_arch = "x86_64")]
mod x86_64_sysv;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64_sysv::{prepare, switch_context, Context};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::{prepare, switch_context, Context};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("ralph_coop only supports x86_64 and aarch64");

/// Entry point of a task, called once with the argument given to [`prepare`]
///
/// When it returns, the trampoline calls `scheduler::task_finished`, which
/// never returns.
pub type EntryFn = extern "C" fn(*mut ());

/// Required alignment of the stack pointer at a call boundary
pub const STACK_ALIGN: usize = 16;

/// Smallest buffer `prepare` accepts: room for the alignment slack and the
/// initial return slot
pub const MIN_PREPARE_SIZE: usize = 2 * STACK_ALIGN;
