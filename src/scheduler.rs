//! Cooperative multitasking scheduler
//!
//! Provides round-robin scheduling over tasks in registration order.
//! Tasks yield voluntarily via yield_now(); run() drives them from the
//! caller's own stack (the main context) until every task has returned.
//!
//! Control always bounces through the main context: a task that yields or
//! finishes switches back into run(), which picks the next task and switches
//! into it. Exactly one context executes at any time.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, trace, warn};

use crate::config::Config;
use crate::context_switch::{switch_context, Context};
use crate::error::Error;
use crate::task::{Task, TaskBody, TaskId, TaskState};

thread_local! {
    // One runtime per OS thread. The scheduler is only ever borrowed for
    // bookkeeping; no borrow is held across a context switch.
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::new(Config::default()));
}

/// Access the calling thread's scheduler mutably via closure
fn with<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler) -> R,
{
    SCHEDULER.with(|cell| f(&mut cell.borrow_mut()))
}

/// Why control came back to the main context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    /// First entry into the run loop
    Start,
    /// The running task called yield_now()
    Yielded,
    /// The running task's body returned
    Finished,
}

/// Pair of contexts for one switch: save into the first, resume the second
type Switch = (*mut Context, *const Context);

/// Statistics of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Number of tasks that ran
    pub tasks: usize,
    /// Total switches into task contexts
    pub switches: u64,
    /// Switches into each task, indexed by [`TaskId`]
    pub switches_per_task: Vec<u64>,
}

/// The scheduler structure
pub(crate) struct Scheduler {
    /// All registered tasks; never pushed to while running
    tasks: Vec<Task>,
    /// Index of the task whose context is (or was last) executing
    current: TaskId,
    /// Task that just yielded or finished
    previous: TaskId,
    /// Context of the stack that called run()
    main_context: Context,
    /// Set by the task side right before switching back to main
    event: Event,
    running: bool,
    in_task: bool,
    switches: Vec<u64>,
    first_panic: Option<Error>,
    config: Config,
}

impl Scheduler {
    fn new(config: Config) -> Self {
        Scheduler {
            tasks: Vec::new(),
            current: 0,
            previous: 0,
            main_context: Context::default(),
            event: Event::Start,
            running: false,
            in_task: false,
            switches: Vec::new(),
            first_panic: None,
            config,
        }
    }

    fn spawn(&mut self, name: &'static str, body: TaskBody) -> Result<TaskId, Error> {
        if self.running {
            return Err(Error::SpawnWhileRunning);
        }

        let id = self.tasks.len();
        self.tasks.push(Task::new(id, name, self.config.stack_size, body));
        debug!(task = id, name, stack_size = self.config.stack_size, "task spawned");

        Ok(id)
    }

    fn configure(&mut self, config: Config) -> Result<(), Error> {
        config.validate()?;
        if self.running {
            return Err(Error::AlreadyRunning);
        }
        if !self.tasks.is_empty() {
            return Err(Error::TasksPending {
                count: self.tasks.len(),
            });
        }
        self.config = config;
        Ok(())
    }

    /// Enter the run phase. Returns `false` when there is nothing to run.
    fn begin(&mut self) -> Result<bool, Error> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }
        if self.tasks.is_empty() {
            return Ok(false);
        }

        self.running = true;
        self.switches = vec![0; self.tasks.len()];
        debug!(tasks = self.tasks.len(), "scheduler started");

        Ok(true)
    }

    /// Find the next task to run (round-robin)
    ///
    /// Scans forward from the task after `current`, wrapping, and skips
    /// finished tasks. Stops at `previous` no matter its state, so getting
    /// `previous` back means no other task is runnable.
    fn find_next(&self) -> TaskId {
        let len = self.tasks.len();
        let mut idx = self.current;
        loop {
            idx = (idx + 1) % len;
            if idx == self.previous || self.tasks[idx].state != TaskState::Done {
                return idx;
            }
        }
    }

    /// React to the event that brought control back to the main context
    ///
    /// Returns the switch into the next task, or `None` when the run is over.
    fn dispatch(&mut self, event: Event) -> Option<Switch> {
        match event {
            Event::Start => {
                self.current = 0;
                self.previous = 0;
            }
            Event::Yielded => {
                self.previous = self.current;
                self.current = self.find_next();
            }
            Event::Finished => {
                let task = &mut self.tasks[self.current];
                task.state = TaskState::Done;
                debug!(task = task.id, name = task.name, "task finished");

                self.previous = self.current;
                self.current = self.find_next();
                if self.current == self.previous {
                    return None;
                }
            }
        }

        Some(self.enter_current(event))
    }

    fn enter_current(&mut self, event: Event) -> Switch {
        let idx = self.current;
        let task = &mut self.tasks[idx];
        if task.state == TaskState::NotStarted {
            task.launch(task_main);
        }
        trace!(task = idx, ?event, sp = task.context.stack_pointer(), "switching to task");

        self.switches[idx] += 1;
        self.in_task = true;

        (
            &mut self.main_context as *mut Context,
            &self.tasks[idx].context as *const Context,
        )
    }

    /// Hand control from the running task back to the main context
    fn suspend_current(&mut self, event: Event) -> Result<Switch, Error> {
        if !self.in_task {
            return Err(Error::NotInTask);
        }
        self.in_task = false;
        self.event = event;

        Ok((
            &mut self.tasks[self.current].context as *mut Context,
            &self.main_context as *const Context,
        ))
    }

    /// Check the guard region of the task that last ran
    fn check_current_stack(&self) -> Result<(), Error> {
        let task = &self.tasks[self.current];
        if task.stack_intact() {
            return Ok(());
        }
        Err(Error::StackOverflow {
            task: task.id,
            name: task.name,
            stack_size: self.config.stack_size,
        })
    }

    fn record_panic(&mut self, payload: Box<dyn Any + Send>) {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        let task = &self.tasks[self.current];
        warn!(task = task.id, name = task.name, %message, "task panicked");

        if self.first_panic.is_none() {
            self.first_panic = Some(Error::TaskPanicked {
                task: task.id,
                name: task.name,
                message,
            });
        }
    }

    /// Leave the run phase: free every stack and reset for the next run
    fn finish(&mut self) -> Result<RunStats, Error> {
        let switches_per_task = std::mem::take(&mut self.switches);
        let stats = RunStats {
            tasks: self.tasks.len(),
            switches: switches_per_task.iter().sum(),
            switches_per_task,
        };

        self.tasks = Vec::new();
        self.current = 0;
        self.previous = 0;
        self.main_context = Context::default();
        self.event = Event::Start;
        self.running = false;
        self.in_task = false;
        debug!(tasks = stats.tasks, switches = stats.switches, "scheduler finished");

        match self.first_panic.take() {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }
}

/// Rust-side entry of every task, reached from the context trampoline
///
/// Takes ownership of the body leaked by `Task::launch`. Panics stop here;
/// unwinding must never reach the trampoline.
extern "C" fn task_main(arg: *mut ()) {
    // Safety: `Task::launch` leaked exactly this box for this single call
    let body = unsafe { Box::from_raw(arg as *mut TaskBody) };
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || body())) {
        with(|sched| sched.record_panic(payload));
    }
}

/// Completion handler the trampoline calls once a task body has returned
pub(crate) extern "C" fn task_finished() -> ! {
    if let Ok((task, main)) = with(|sched| sched.suspend_current(Event::Finished)) {
        // Safety: both contexts live inside the thread's scheduler, and the
        // main context was saved by run() when it switched into this task
        unsafe { switch_context(task, main) };
    }

    // A finished task is never resumed
    std::process::abort()
}

// ============================================================================
// Public API functions
// ============================================================================

/// Register a task on the calling thread's scheduler
///
/// `f` runs at most once, on its own stack, when [`run`] dispatches it. Tasks
/// can only be registered while the scheduler is idle.
pub fn spawn<F>(name: &'static str, f: F) -> Result<TaskId, Error>
where
    F: FnOnce() + 'static,
{
    with(|sched| sched.spawn(name, Box::new(f)))
}

/// Run every registered task to completion
///
/// Blocks until all tasks have returned, then releases their stacks and
/// resets the scheduler so a new set of tasks can be registered. A panic in
/// a task body is reported here after the other tasks have finished.
pub fn run() -> Result<RunStats, Error> {
    if !with(Scheduler::begin)? {
        return Ok(RunStats::default());
    }

    let mut event = Event::Start;
    while let Some((main, task)) = with(|sched| sched.dispatch(event)) {
        // Safety: `main` is the scheduler's main context and `task` was
        // either freshly prepared or saved by the task's last switch out.
        // The task vector is not resized while running.
        unsafe { switch_context(main, task) };

        // Memory below the stack may already be damaged; nothing is safe
        // to unwind through
        event = match with(|sched| sched.check_current_stack().map(|()| sched.event)) {
            Ok(event) => event,
            Err(err) => {
                error!(%err, "task stack guard clobbered, aborting");
                std::process::abort()
            }
        };
    }

    with(Scheduler::finish)
}

/// Yield the current task to let other tasks run
///
/// Returns once the scheduler comes back around to this task.
///
/// # Panics
/// Panics when called outside of a running task.
pub fn yield_now() {
    if let Err(err) = try_yield_now() {
        panic!("{err}");
    }
}

/// Like [`yield_now`], but reports misuse instead of panicking
pub fn try_yield_now() -> Result<(), Error> {
    let (task, main) = with(|sched| sched.suspend_current(Event::Yielded))?;
    // Safety: we are on this task's stack, run() is parked in the main
    // context, and both live inside the thread's scheduler
    unsafe { switch_context(task, main) };
    Ok(())
}

/// Replace the calling thread's configuration
///
/// Only allowed while idle and before any task is registered.
pub fn configure(config: Config) -> Result<(), Error> {
    with(|sched| sched.configure(config))
}

/// Configuration in effect on the calling thread
pub fn current_config() -> Config {
    with(|sched| sched.config)
}

/// The task currently executing, if called from inside one
pub fn current_task() -> Option<TaskId> {
    with(|sched| sched.in_task.then_some(sched.current))
}

/// Number of registered tasks
pub fn task_count() -> usize {
    with(|sched| sched.tasks.len())
}

/// Whether a run phase is active on the calling thread
pub fn is_running() -> bool {
    with(|sched| sched.running)
}
