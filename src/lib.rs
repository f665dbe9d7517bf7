//! Cooperative multitasking on hand-switched stacks
//!
//! Tasks are closures that run on their own 16 KiB (configurable) stacks and
//! interleave on the calling thread. A task gives up the CPU only by calling
//! [`yield_now`]; the scheduler resumes tasks in strict registration order,
//! skipping those that have finished.
//!
//! ```no_run
//! use ralph_coop::{run, spawn, yield_now};
//!
//! for name in ["ping", "pong"] {
//!     spawn(name, move || {
//!         for _ in 0..3 {
//!             println!("{name}");
//!             yield_now();
//!         }
//!     })
//!     .unwrap();
//! }
//! run().unwrap();
//! ```
//!
//! Every OS thread owns an independent scheduler. Task stacks have no guard
//! page. The lowest 1 KiB of each stack holds a canary pattern that is checked
//! every time a task switches out; a task that ran into it aborts the process
//! with an error naming the task. Size [`Config::stack_size`] for the deepest
//! call chain.

pub mod config;
pub mod context_switch;
pub mod error;
pub mod scheduler;
pub(crate) mod task;

pub use config::Config;
pub use error::Error;
pub use scheduler::{
    configure,
    current_config,
    current_task,
    is_running,
    run,
    spawn,
    task_count,
    try_yield_now,
    yield_now,
    RunStats,
};
pub use task::TaskId;
