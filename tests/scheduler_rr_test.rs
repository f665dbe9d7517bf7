//! Round-robin scheduler integration tests.
//!
//! Every test runs on its own thread and therefore on its own scheduler.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ralph_coop::{
    configure, current_task, is_running, run, spawn, task_count, try_yield_now, yield_now, Config,
    Error, RunStats, TaskId,
};

type Log = Rc<RefCell<Vec<TaskId>>>;

fn fib_yielding(n: u64) -> u64 {
    if n <= 1 {
        return n;
    }
    yield_now();
    fib_yielding(n - 1) + fib_yielding(n - 2)
}

fn fib_plain(n: u64) -> u64 {
    if n <= 1 {
        return n;
    }
    fib_plain(n - 1) + fib_plain(n - 2)
}

/// Yields performed by `fib_yielding(n)`: one per call with n > 1
fn fib_yields(n: u64) -> usize {
    if n <= 1 {
        return 0;
    }
    1 + fib_yields(n - 1) + fib_yields(n - 2)
}

/// Completion order of tasks that yield `yields[i]` times each, derived by
/// stepping the dispatch policy: scan forward from the last task, skip
/// finished ones, stop when only the last task is left.
fn simulate_completion(yields: &[usize]) -> Vec<usize> {
    let n = yields.len();
    let mut remaining: Vec<usize> = yields.iter().map(|y| y + 1).collect();
    let mut done = vec![false; n];
    let mut order = Vec::new();
    if n == 0 {
        return order;
    }

    let mut current = 0;
    loop {
        remaining[current] -= 1;
        if remaining[current] == 0 {
            done[current] = true;
            order.push(current);
        }
        let previous = current;
        let mut next = (current + 1) % n;
        while next != previous && done[next] {
            next = (next + 1) % n;
        }
        if done[next] {
            break;
        }
        current = next;
    }
    order
}

/// Spawn a task that logs its id every time it runs and yields `yields` times
fn spawn_logging(log: &Log, yields: usize) -> TaskId {
    let log = Rc::clone(log);
    spawn("logger", move || {
        let me = current_task().expect("running inside a task");
        log.borrow_mut().push(me);
        for _ in 0..yields {
            yield_now();
            log.borrow_mut().push(me);
        }
    })
    .expect("spawn before run")
}

#[test]
fn test_run_without_tasks_is_noop() {
    assert_eq!(run(), Ok(RunStats::default()));
    assert!(!is_running());
}

#[test]
fn test_tasks_resume_in_registration_order() {
    let log: Log = Rc::default();
    let ids: Vec<TaskId> = (0..3).map(|_| spawn_logging(&log, 1)).collect();
    assert_eq!(ids, vec![0, 1, 2]);

    let stats = run().expect("run succeeds");

    assert_eq!(*log.borrow(), vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(stats.tasks, 3);
    assert_eq!(stats.switches_per_task, vec![2, 2, 2]);
    assert_eq!(stats.switches, 6);
}

#[test]
fn test_finished_tasks_are_skipped() {
    let log: Log = Rc::default();
    spawn_logging(&log, 0);
    spawn_logging(&log, 3);
    spawn_logging(&log, 1);

    run().expect("run succeeds");

    // Task 0 is gone after round one, task 2 after round two
    assert_eq!(*log.borrow(), vec![0, 1, 2, 1, 2, 1, 1]);
}

#[test]
fn test_single_task_yielding_many_times_runs_to_completion() {
    const YIELDS: usize = 25;
    let log: Log = Rc::default();
    spawn_logging(&log, YIELDS);

    let stats = run().expect("run succeeds");

    assert_eq!(log.borrow().len(), YIELDS + 1);
    assert!(log.borrow().iter().all(|&id| id == 0));
    assert_eq!(stats.switches_per_task, vec![YIELDS as u64 + 1]);
}

#[test]
fn test_task_without_yield_completes_in_one_switch() {
    let ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&ran);
    spawn("once", move || flag.set(true)).unwrap();

    let stats = run().unwrap();

    assert!(ran.get());
    assert_eq!(stats.switches, 1);
}

#[test]
fn test_recursion_survives_yields() {
    let results = Rc::new(RefCell::new(Vec::new()));
    for n in [10, 7] {
        let results = Rc::clone(&results);
        spawn("fib", move || {
            let value = fib_yielding(n);
            results.borrow_mut().push((n, value));
        })
        .unwrap();
    }

    run().unwrap();

    let results = results.borrow();
    assert_eq!(results.len(), 2);
    for &(n, value) in results.iter() {
        assert_eq!(value, fib_plain(n));
    }
    assert!(results.contains(&(10, 55)));
}

fn frame_value(depth: u32, seed: u64) -> u64 {
    seed.wrapping_mul(31).wrapping_add(depth as u64)
}

fn descend_yielding(depth: u32, seed: u64) -> u64 {
    let local = [frame_value(depth, seed); 4];
    if depth == 0 {
        return local.iter().sum();
    }
    yield_now();
    let below = descend_yielding(depth - 1, seed + 1);
    assert_eq!(local[3], frame_value(depth, seed));
    below.wrapping_add(local[0])
}

fn descend_plain(depth: u32, seed: u64) -> u64 {
    let local = [frame_value(depth, seed); 4];
    if depth == 0 {
        return local.iter().sum();
    }
    descend_plain(depth - 1, seed + 1).wrapping_add(local[0])
}

#[test]
fn test_locals_on_deep_stack_stay_intact() {
    const DEPTH: u32 = 20;
    let got = Rc::new(RefCell::new(vec![0u64; 4]));
    for seed in 0..4u64 {
        let got = Rc::clone(&got);
        spawn("descend", move || {
            got.borrow_mut()[seed as usize] = descend_yielding(DEPTH, seed);
        })
        .unwrap();
    }
    run().unwrap();

    let expected: Vec<u64> = (0..4).map(|seed| descend_plain(DEPTH, seed)).collect();
    assert_eq!(*got.borrow(), expected);
}

#[test]
fn test_fibonacci_scenario_follows_simulated_order() {
    let printed = Rc::new(RefCell::new(Vec::new()));
    let inputs = [3u64, 4, 5];
    for n in inputs {
        let printed = Rc::clone(&printed);
        spawn("fib", move || {
            let value = fib_yielding(n);
            printed.borrow_mut().push((current_task().unwrap(), value));
        })
        .unwrap();
    }

    run().unwrap();

    let yields: Vec<usize> = inputs.iter().map(|&n| fib_yields(n)).collect();
    assert_eq!(yields, vec![2, 4, 7]);
    let order = simulate_completion(&yields);
    assert_eq!(order, vec![0, 1, 2]);

    let expected: Vec<(TaskId, u64)> = order.iter().map(|&i| (i, fib_plain(inputs[i]))).collect();
    assert_eq!(*printed.borrow(), expected);
    assert_eq!(*printed.borrow(), vec![(0, 2), (1, 3), (2, 5)]);
}

#[test]
fn test_fibonacci_scenario_in_reverse_registration() {
    let printed = Rc::new(RefCell::new(Vec::new()));
    let inputs = [5u64, 4, 3];
    for n in inputs {
        let printed = Rc::clone(&printed);
        spawn("fib", move || {
            let value = fib_yielding(n);
            printed.borrow_mut().push((current_task().unwrap(), value));
        })
        .unwrap();
    }

    run().unwrap();

    let yields: Vec<usize> = inputs.iter().map(|&n| fib_yields(n)).collect();
    assert_eq!(simulate_completion(&yields), vec![2, 1, 0]);
    assert_eq!(*printed.borrow(), vec![(2, 2), (1, 3), (0, 5)]);
}

#[test]
fn test_run_releases_tasks_and_can_run_again() {
    let shared = Rc::new(Cell::new(0u32));
    for _ in 0..4 {
        let shared = Rc::clone(&shared);
        spawn("counter", move || {
            shared.set(shared.get() + 1);
            yield_now();
            shared.set(shared.get() + 1);
        })
        .unwrap();
    }
    assert_eq!(task_count(), 4);

    run().unwrap();

    assert_eq!(shared.get(), 8);
    assert_eq!(task_count(), 0);
    assert!(!is_running());
    // Bodies (and their captured handles) are gone
    assert_eq!(Rc::strong_count(&shared), 1);

    let log: Log = Rc::default();
    assert_eq!(spawn_logging(&log, 2), 0);
    assert_eq!(spawn_logging(&log, 0), 1);
    let stats = run().unwrap();
    assert_eq!(*log.borrow(), vec![0, 1, 0, 0]);
    assert_eq!(stats.switches_per_task, vec![3, 1]);
}

#[test]
fn test_many_tasks_terminate() {
    let finished = Rc::new(Cell::new(0usize));
    for i in 0..64 {
        let finished = Rc::clone(&finished);
        spawn("worker", move || {
            for _ in 0..(i % 7) {
                yield_now();
            }
            finished.set(finished.get() + 1);
        })
        .unwrap();
    }

    let stats = run().unwrap();

    assert_eq!(finished.get(), 64);
    assert_eq!(stats.tasks, 64);
}

#[test]
fn test_current_task_only_inside_tasks() {
    assert_eq!(current_task(), None);

    let seen = Rc::new(RefCell::new(Vec::new()));
    for _ in 0..2 {
        let seen = Rc::clone(&seen);
        spawn("who", move || {
            seen.borrow_mut().push((current_task(), is_running()));
        })
        .unwrap();
    }
    run().unwrap();

    assert_eq!(*seen.borrow(), vec![(Some(0), true), (Some(1), true)]);
    assert_eq!(current_task(), None);
}

#[test]
fn test_yield_outside_task_is_reported() {
    assert_eq!(try_yield_now(), Err(Error::NotInTask));
}

#[test]
#[should_panic(expected = "yield called outside of a running task")]
fn test_yield_now_outside_task_panics() {
    yield_now();
}

#[test]
fn test_spawn_and_run_inside_task_are_rejected() {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    spawn("nested", move || {
        sink.borrow_mut().push(spawn("late", || {}).unwrap_err());
        sink.borrow_mut().push(run().unwrap_err());
        sink.borrow_mut().push(configure(Config::builtin()).unwrap_err());
    })
    .unwrap();

    run().unwrap();

    assert_eq!(
        *errors.borrow(),
        vec![Error::SpawnWhileRunning, Error::AlreadyRunning, Error::AlreadyRunning]
    );
}

#[test]
fn test_configure_rules() {
    assert!(matches!(
        configure(Config::builtin().with_stack_size(512)),
        Err(Error::StackTooSmall { requested: 512, .. })
    ));

    configure(Config::builtin().with_stack_size(32 * 1024)).unwrap();
    assert_eq!(ralph_coop::current_config().stack_size, 32 * 1024);

    spawn("t", || {}).unwrap();
    assert_eq!(
        configure(Config::builtin()),
        Err(Error::TasksPending { count: 1 })
    );
    run().unwrap();

    // Idle and empty again
    configure(Config::builtin()).unwrap();
}

#[test]
fn test_panicking_task_is_reported_after_others_finish() {
    let finished = Rc::new(Cell::new(0u32));
    for name in ["ok", "boom", "ok"] {
        let finished = Rc::clone(&finished);
        spawn(name, move || {
            yield_now();
            if name == "boom" {
                panic!("kaboom");
            }
            yield_now();
            finished.set(finished.get() + 1);
        })
        .unwrap();
    }

    let err = run().unwrap_err();

    assert_eq!(
        err,
        Error::TaskPanicked {
            task: 1,
            name: "boom",
            message: "kaboom".to_string()
        }
    );
    assert_eq!(finished.get(), 2);
    assert_eq!(task_count(), 0);

    spawn("after", || {}).unwrap();
    assert!(run().is_ok());
}

#[test]
fn test_threads_have_independent_schedulers() {
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            std::thread::spawn(move || {
                let sum = Rc::new(Cell::new(0u64));
                for i in 0..3 {
                    let sum = Rc::clone(&sum);
                    spawn("thread-task", move || {
                        let value = fib_yielding(t + i);
                        sum.set(sum.get() + value);
                    })
                    .unwrap();
                }
                run().unwrap();
                sum.get()
            })
        })
        .collect();

    for (t, handle) in handles.into_iter().enumerate() {
        let t = t as u64;
        let expected: u64 = (0..3).map(|i| fib_plain(t + i)).sum();
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_simulator_matches_hand_derived_orders() {
    assert_eq!(simulate_completion(&[]), Vec::<usize>::new());
    assert_eq!(simulate_completion(&[0]), vec![0]);
    assert_eq!(simulate_completion(&[1, 0, 1]), vec![1, 0, 2]);
}
