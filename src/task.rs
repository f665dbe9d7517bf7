//! Task structure for cooperative multitasking

use crate::context_switch::{self, Context, EntryFn};

/// Registration index of a task within its run phase
pub type TaskId = usize;

/// Body of a task, boxed at spawn time and consumed on its first dispatch
pub(crate) type TaskBody = Box<dyn FnOnce() + 'static>;

/// Bytes at the low end of every task stack filled with [`STACK_CANARY`]
pub const STACK_GUARD_SIZE: usize = 1024;

/// Pattern written over the guard region when a task is launched
pub const STACK_CANARY: u64 = 0x5AFE_57AC_C0DE_CAFE;

/// Task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered, never switched into
    NotStarted,
    /// Has been switched into at least once and has not returned yet
    Suspended,
    /// Body returned (or panicked)
    Done,
}

/// A schedulable task
pub struct Task {
    /// Registration index
    pub id: TaskId,
    /// Human-readable name
    pub name: &'static str,
    /// Current state
    pub state: TaskState,
    /// Saved CPU context, meaningful once the task has started
    pub context: Context,
    /// Task's private stack (heap-allocated, never resized)
    stack: Box<[u8]>,
    /// Body, present until the task is first dispatched
    body: Option<TaskBody>,
}

impl Task {
    /// Create a new task with a zeroed stack of `stack_size` bytes
    pub(crate) fn new(id: TaskId, name: &'static str, stack_size: usize, body: TaskBody) -> Self {
        Task {
            id,
            name,
            state: TaskState::NotStarted,
            context: Context::default(),
            stack: vec![0u8; stack_size].into_boxed_slice(),
            body: Some(body),
        }
    }

    /// Lay out the initial context on the task's stack
    ///
    /// The body is handed to `entry` through a thin pointer to a second box;
    /// `entry` takes ownership of it. Returns `false` if the task has already
    /// been launched.
    pub(crate) fn launch(&mut self, entry: EntryFn) -> bool {
        let Some(body) = self.body.take() else {
            return false;
        };
        for word in self.stack[..STACK_GUARD_SIZE].chunks_exact_mut(8) {
            word.copy_from_slice(&STACK_CANARY.to_ne_bytes());
        }
        let arg = Box::into_raw(Box::new(body)) as *mut ();
        self.context = context_switch::prepare(&mut self.stack, entry, arg);
        self.state = TaskState::Suspended;
        true
    }
}

impl Task {
    /// Whether the guard region at the bottom of the stack is untouched
    ///
    /// Always true for a task that has not been launched yet.
    pub(crate) fn stack_intact(&self) -> bool {
        if self.state == TaskState::NotStarted {
            return true;
        }
        let canary = STACK_CANARY.to_ne_bytes();
        self.stack[..STACK_GUARD_SIZE]
            .chunks_exact(8)
            .all(|word| word == canary)
    }

    /// Overwrite a guard word, as a task running off its stack would
    #[cfg(test)]
    pub(crate) fn clobber_guard(&mut self) {
        let top = STACK_GUARD_SIZE - 8;
        self.stack[top..STACK_GUARD_SIZE].copy_from_slice(&0u64.to_ne_bytes());
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("stack_size", &self.stack.len())
            .finish()
    }
}
