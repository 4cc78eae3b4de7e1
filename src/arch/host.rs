//! # Host Simulation Port
//!
//! Runs the firmware's tasks on a desktop. Every task is a stackful
//! coroutine living on the thread that called `init`; `start` turns that
//! thread into the dispatcher, which resumes one coroutine at a time. A
//! task hands the CPU back only by sleeping, exiting, or killing itself,
//! which is the target's cooperative model without any host locking.
//!
//! ## Dispatch
//!
//! Whenever the running task suspends or ends, the dispatcher resumes the
//! highest-priority ready task, oldest first among equals. A sleeping task
//! counts as ready once its deadline has passed. When nothing is ready the
//! dispatcher sleeps until the earliest deadline.
//!
//! ## Exit and Abort
//!
//! The coroutine of a finished or killed task is reset without unwinding
//! and its stack is unmapped. No code of the victim runs after the kill,
//! not even destructors, exactly as on the target; what its locals owned
//! is leaked, its stack is not.
//!
//! Like the target, the code that runs before `start` is not a task: it
//! may create and kill tasks but not sleep or exit.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::config::{SchedulerConfig, HOST_STACK_SIZE, MAX_TASKS};
use crate::error::SchedError;
use crate::primitive::{ExecutionPrimitive, SpawnAttributes, TaskEntry};
use crate::task::{Priority, TaskId};

/// Longest stretch the dispatcher sleeps when no task has a deadline.
const IDLE_NAP: Duration = Duration::from_secs(60);

/// Why a task handed the CPU back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Switch {
    Suspend,
    Exit,
}

type Task = Coroutine<(), Switch, ()>;
type TaskYielder = Yielder<(), Switch>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Ready,
    Running,
    Sleeping { until: Instant },
}

struct Context {
    priority: Priority,
    state: ContextState,
    seq: u64,
    /// Parked here while the task is suspended. The dispatcher holds it
    /// while the task runs.
    task: Option<Task>,
    /// Set on first dispatch; valid for as long as the coroutine exists.
    yielder: *const TaskYielder,
}

impl Context {
    fn is_ready(&self, now: Instant) -> bool {
        match self.state {
            ContextState::Ready => true,
            ContextState::Running => false,
            ContextState::Sleeping { until } => until <= now,
        }
    }
}

#[derive(Default)]
struct Machine {
    contexts: HashMap<TaskId, Context>,
    running: Option<TaskId>,
    next_pid: u32,
    next_seq: u64,
}

impl Machine {
    fn allocate_pid(&mut self) -> TaskId {
        loop {
            self.next_pid = self.next_pid.wrapping_add(1);
            let pid = TaskId::from_raw(self.next_pid);
            if !pid.is_none() && !self.contexts.contains_key(&pid) {
                return pid;
            }
        }
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Hand the CPU to the best ready task, if any.
    fn dispatch(&mut self, now: Instant) -> Option<(TaskId, Task)> {
        debug_assert!(self.running.is_none());
        let pid = self
            .contexts
            .iter()
            .filter(|(_, c)| c.is_ready(now))
            .max_by_key(|(_, c)| (c.priority, std::cmp::Reverse(c.seq)))
            .map(|(pid, _)| *pid)?;
        let ctx = self.contexts.get_mut(&pid)?;
        let task = ctx.task.take()?;
        ctx.state = ContextState::Running;
        self.running = Some(pid);
        Some((pid, task))
    }

    fn running_context(&mut self) -> Result<(TaskId, &mut Context), SchedError> {
        let pid = self.running.ok_or(SchedError::NoTaskContext)?;
        let ctx = self
            .contexts
            .get_mut(&pid)
            .ok_or(SchedError::NoTaskContext)?;
        Ok((pid, ctx))
    }

    fn earliest_wake(&self) -> Option<Instant> {
        self.contexts
            .values()
            .filter_map(|c| match c.state {
                ContextState::Sleeping { until } => Some(until),
                _ => None,
            })
            .min()
    }
}

/// Return to the dispatcher from the running task.
fn hand_back(yielder: *const TaskYielder, switch: Switch) {
    // Safety: the yielder belongs to the running coroutine and we are on
    // its stack.
    unsafe { (*yielder).suspend(switch) }
}

/// Free a task's stack without running any more of its code.
fn discard(mut task: Task) {
    if task.started() && !task.done() {
        // Safety: task bodies borrow nothing from outside their own
        // stack, so skipping the drops of their locals only leaks them,
        // as the hardware port does when it abandons a stack.
        unsafe { task.force_reset() };
    }
    drop(task);
}

/// Host execution backend.
pub struct HostBackend {
    /// The thread that called `global_init`; the only one let in.
    owner: OnceLock<ThreadId>,
    machine: RefCell<Machine>,
}

// Safety: `machine`, and every coroutine in it, is only reached through
// `with_machine`, which admits the owner thread alone.
unsafe impl Sync for HostBackend {}

impl HostBackend {
    pub fn new() -> Self {
        Self {
            owner: OnceLock::new(),
            machine: RefCell::new(Machine::default()),
        }
    }

    fn is_owner(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }

    fn with_machine<R>(&self, f: impl FnOnce(&mut Machine) -> R) -> R {
        assert!(
            self.is_owner(),
            "host scheduler used off its dispatching thread"
        );
        f(&mut self.machine.borrow_mut())
    }

    /// First thing a task does: publish how to suspend it.
    fn adopt(&self, yielder: &TaskYielder) {
        self.with_machine(|m| {
            if let Ok((_, ctx)) = m.running_context() {
                ctx.yielder = yielder;
            }
        });
    }

    /// Run the best ready task until it hands the CPU back. Returns
    /// `false` if nothing was ready.
    fn run_next(&self) -> bool {
        let Some((pid, mut task)) = self.with_machine(|m| m.dispatch(Instant::now())) else {
            return false;
        };
        let outcome = task.resume(());

        let finished = self.with_machine(|m| {
            m.running = None;
            match outcome {
                CoroutineResult::Yield(Switch::Suspend) => match m.contexts.get_mut(&pid) {
                    Some(ctx) => {
                        ctx.task = Some(task);
                        None
                    }
                    None => Some(task),
                },
                CoroutineResult::Yield(Switch::Exit) | CoroutineResult::Return(()) => {
                    m.contexts.remove(&pid);
                    Some(task)
                }
            }
        });
        if let Some(task) = finished {
            log::trace!("host: {pid} finished");
            discard(task);
        }
        true
    }

    fn idle(&self) {
        let nap = self
            .with_machine(|m| m.earliest_wake())
            .map_or(IDLE_NAP, |until| until.saturating_duration_since(Instant::now()));
        thread::sleep(nap);
    }

    #[cfg(test)]
    fn live_contexts(&self) -> usize {
        self.with_machine(|m| m.contexts.len())
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionPrimitive for HostBackend {
    fn global_init(&self, config: &SchedulerConfig) {
        if self.owner.set(thread::current().id()).is_err() {
            log::warn!("host: backend already bound to a dispatching thread");
        }
        log::debug!(
            "host: dispatching on {:?}, tick {:?}",
            thread::current().name(),
            config.tick_duration()
        );
    }

    fn spawn(&self, attrs: SpawnAttributes, entry: TaskEntry<Self>) -> Result<TaskId, SchedError> {
        debug_assert!(!attrs.joinable && attrs.cancellable);
        debug_assert!(std::ptr::eq(self, entry.primitive()));

        self.with_machine(|m| {
            if m.contexts.len() >= MAX_TASKS {
                return Err(SchedError::PoolExhausted);
            }
            let stack = DefaultStack::new(HOST_STACK_SIZE).map_err(|e| {
                log::error!("host: task stack allocation failed: {e}");
                SchedError::PoolExhausted
            })?;
            let backend = entry.primitive();
            let task: Task = Coroutine::with_stack(stack, move |yielder: &TaskYielder, ()| {
                backend.adopt(yielder);
                entry.run();
            });

            let pid = m.allocate_pid();
            let seq = m.bump_seq();
            m.contexts.insert(
                pid,
                Context {
                    priority: attrs.priority,
                    state: ContextState::Ready,
                    seq,
                    task: Some(task),
                    yielder: std::ptr::null(),
                },
            );
            Ok(pid)
        })
    }

    fn suspend_for(&self, duration: Duration) {
        let now = Instant::now();
        let until = now.checked_add(duration).unwrap_or(now + IDLE_NAP);
        let yielder = self.with_machine(|m| -> Result<*const TaskYielder, SchedError> {
            let seq = m.bump_seq();
            let (_, ctx) = m.running_context()?;
            ctx.state = ContextState::Sleeping { until };
            ctx.seq = seq;
            Ok(ctx.yielder)
        });
        match yielder {
            Ok(yielder) => hand_back(yielder, Switch::Suspend),
            Err(e) => panic!("sleep: {e}"),
        }
    }

    fn terminate_current(&self) -> ! {
        let exiting = self.with_machine(|m| -> Result<(TaskId, *const TaskYielder), SchedError> {
            let (pid, yielder) = {
                let (pid, ctx) = m.running_context()?;
                (pid, ctx.yielder)
            };
            m.contexts.remove(&pid);
            Ok((pid, yielder))
        });
        match exiting {
            Ok((pid, yielder)) => {
                hand_back(yielder, Switch::Exit);
                unreachable!("{pid} resumed after exit")
            }
            Err(e) => panic!("exit: {e}"),
        }
    }

    fn abort(&self, id: TaskId) {
        let victim = self.with_machine(|m| {
            let ctx = m.contexts.remove(&id)?;
            Some((m.running == Some(id), ctx))
        });
        match victim {
            None => log::warn!("host: abort of unknown context {id}"),
            Some((true, ctx)) => {
                hand_back(ctx.yielder, Switch::Exit);
                unreachable!("{id} resumed after abort")
            }
            Some((false, ctx)) => {
                if let Some(task) = ctx.task {
                    discard(task);
                }
            }
        }
    }

    fn current(&self) -> TaskId {
        if !self.is_owner() {
            return TaskId::NONE;
        }
        self.with_machine(|m| m.running.unwrap_or(TaskId::NONE))
    }

    fn start(&self) -> ! {
        log::debug!("host: dispatcher running");
        loop {
            if !self.run_next() {
                self.idle();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Scheduler;
    use crate::task::GroupId;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::sync::mpsc;

    type Sched = Scheduler<HostBackend>;

    fn host_scheduler(rate: u32) -> &'static Sched {
        let config = SchedulerConfig::with_rate_multiplier(rate).unwrap();
        let sched = Box::leak(Box::new(Scheduler::new(HostBackend::new(), config)));
        sched.init();
        sched
    }

    /// Bring up a machine on its own thread: `setup` runs as the init
    /// code, then the thread dispatches forever. The returned scheduler
    /// is good for registry queries from the test thread.
    fn boot(rate: u32, setup: fn(&'static Sched)) -> &'static Sched {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("machine".into())
            .spawn(move || {
                let sched = host_scheduler(rate);
                setup(sched);
                tx.send(sched).unwrap();
                sched.start()
            })
            .unwrap();
        rx.recv().unwrap()
    }

    /// Poll `cond` for up to five seconds.
    fn eventually(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    static SLEEPS_DONE: AtomicBool = AtomicBool::new(false);
    static SLEEPS_LONG_ENOUGH: AtomicBool = AtomicBool::new(false);

    fn measure_sleeps(s: &'static Sched) {
        let mut ok = true;
        for ticks in [0, 1, 3] {
            let start = Instant::now();
            s.sleep(ticks);
            ok &= start.elapsed() >= Duration::from_millis(16 * u64::from(ticks));
        }
        SLEEPS_LONG_ENOUGH.store(ok, Ordering::SeqCst);
        SLEEPS_DONE.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_sleep_lower_bound_at_default_rate() {
        boot(1, |s| {
            s.create(GroupId::GAME_LOGIC, measure_sleeps);
        });
        assert!(eventually(|| SLEEPS_DONE.load(Ordering::SeqCst)));
        assert!(SLEEPS_LONG_ENOUGH.load(Ordering::SeqCst));
    }

    static FAST_SLEEP_US: AtomicU32 = AtomicU32::new(0);

    fn fast_sleep(s: &'static Sched) {
        let start = Instant::now();
        s.sleep(1);
        FAST_SLEEP_US.store(start.elapsed().as_micros() as u32, Ordering::SeqCst);
    }

    #[test]
    fn test_sleep_halves_with_multiplier() {
        boot(2, |s| {
            s.create(GroupId::GAME_LOGIC, fast_sleep);
        });
        assert!(eventually(|| FAST_SLEEP_US.load(Ordering::SeqCst) != 0));
        assert!(FAST_SLEEP_US.load(Ordering::SeqCst) >= 8_000);
    }

    static ORDER: std::sync::Mutex<Vec<&'static str>> = std::sync::Mutex::new(Vec::new());

    fn record_clock(_: &'static Sched) {
        ORDER.lock().unwrap().push("clock");
    }

    fn record_lamp(_: &'static Sched) {
        ORDER.lock().unwrap().push("lamp");
    }

    #[test]
    fn test_timekeeping_dispatched_before_baseline() {
        let sched = boot(1, |s| {
            // Baseline task created first; priority must still win
            s.create(GroupId::LAMP_EFFECT, record_lamp);
            s.create(GroupId::REALTIME, record_clock);
        });
        assert!(eventually(|| ORDER.lock().unwrap().len() == 2));
        assert_eq!(*ORDER.lock().unwrap(), vec!["clock", "lamp"]);
        assert!(eventually(|| sched.task_count() == 0));
    }

    static CHECKED_PID: AtomicU32 = AtomicU32::new(0);
    static INIT_CURRENT: AtomicU32 = AtomicU32::new(u32::MAX);
    static SEEN_BEFORE: AtomicU32 = AtomicU32::new(0);
    static SEEN_AFTER: AtomicU32 = AtomicU32::new(0);

    fn check_identity(s: &'static Sched) {
        SEEN_BEFORE.store(s.current().as_raw(), Ordering::SeqCst);
        s.sleep(1);
        SEEN_AFTER.store(s.current().as_raw(), Ordering::SeqCst);
    }

    #[test]
    fn test_self_is_stable_across_sleep() {
        boot(4, |s| {
            INIT_CURRENT.store(s.current().as_raw(), Ordering::SeqCst);
            let pid = s.create(GroupId::GAME_LOGIC, check_identity);
            CHECKED_PID.store(pid.as_raw(), Ordering::SeqCst);
        });
        assert!(eventually(|| SEEN_AFTER.load(Ordering::SeqCst) != 0));
        let pid = CHECKED_PID.load(Ordering::SeqCst);
        assert_eq!(SEEN_BEFORE.load(Ordering::SeqCst), pid);
        assert_eq!(SEEN_AFTER.load(Ordering::SeqCst), pid);
        assert_eq!(INIT_CURRENT.load(Ordering::SeqCst), TaskId::NONE.as_raw());
    }

    static SLEEPY_PID: AtomicU32 = AtomicU32::new(0);
    static SLEEPY_STARTED: AtomicBool = AtomicBool::new(false);
    static SLEEPY_RESUMED: AtomicBool = AtomicBool::new(false);
    static ASSASSIN_DONE: AtomicBool = AtomicBool::new(false);

    fn sleepy(s: &'static Sched) {
        SLEEPY_STARTED.store(true, Ordering::SeqCst);
        s.sleep(5);
        SLEEPY_RESUMED.store(true, Ordering::SeqCst);
    }

    fn assassin(s: &'static Sched) {
        s.sleep(1);
        assert!(SLEEPY_STARTED.load(Ordering::SeqCst));
        s.kill(TaskId::from_raw(SLEEPY_PID.load(Ordering::SeqCst)));
        s.sleep(10);
        ASSASSIN_DONE.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_kill_during_sleep() {
        let sched = boot(1, |s| {
            let pid = s.create(GroupId::BALL_SEARCH, sleepy);
            SLEEPY_PID.store(pid.as_raw(), Ordering::SeqCst);
            s.create(GroupId::GAME_LOGIC, assassin);
        });
        assert!(eventually(|| ASSASSIN_DONE.load(Ordering::SeqCst)));
        assert!(!SLEEPY_RESUMED.load(Ordering::SeqCst));
        let pid = TaskId::from_raw(SLEEPY_PID.load(Ordering::SeqCst));
        assert_eq!(sched.group_of(pid), None);
    }

    static NEVER_RAN: AtomicBool = AtomicBool::new(false);
    static MARKER_DONE: AtomicBool = AtomicBool::new(false);

    fn never(_: &'static Sched) {
        NEVER_RAN.store(true, Ordering::SeqCst);
    }

    fn marker(s: &'static Sched) {
        s.sleep(2);
        MARKER_DONE.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_kill_before_first_dispatch() {
        let sched = boot(8, |s| {
            let pid = s.create(GroupId::SOUND_EFFECT, never);
            s.kill(pid);
            s.create(GroupId::DISPLAY_EFFECT, marker);
        });
        assert!(eventually(|| MARKER_DONE.load(Ordering::SeqCst)));
        assert!(!NEVER_RAN.load(Ordering::SeqCst));
        assert!(eventually(|| sched.task_count() == 0));
    }

    static EXITED_PID: AtomicU32 = AtomicU32::new(0);
    static AFTER_EXIT: AtomicBool = AtomicBool::new(false);

    fn quits(s: &'static Sched) {
        EXITED_PID.store(s.current().as_raw(), Ordering::SeqCst);
        s.exit();
    }

    fn quits_then_flags(s: &'static Sched) {
        quits(s);
        AFTER_EXIT.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_exit_clears_registry() {
        let sched = boot(8, |s| {
            s.create(GroupId::DISPLAY_EFFECT, quits_then_flags);
        });
        assert!(eventually(|| EXITED_PID.load(Ordering::SeqCst) != 0));
        let pid = TaskId::from_raw(EXITED_PID.load(Ordering::SeqCst));
        assert!(eventually(|| sched.group_of(pid).is_none()));
        assert!(!AFTER_EXIT.load(Ordering::SeqCst));
    }

    static SHIELD_LEAKED: AtomicBool = AtomicBool::new(false);
    static SHIELD_WITNESS: AtomicBool = AtomicBool::new(false);

    fn shielded_exit(s: &'static Sched) {
        let _ = panic::catch_unwind(AssertUnwindSafe(|| s.exit()));
        SHIELD_LEAKED.store(true, Ordering::SeqCst);
    }

    fn shield_witness(s: &'static Sched) {
        s.sleep(3);
        SHIELD_WITNESS.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_exit_cannot_be_caught_by_the_task() {
        boot(8, |s| {
            s.create(GroupId::GAME_LOGIC, shielded_exit);
            s.create(GroupId::ATTRACT_MODE, shield_witness);
        });
        assert!(eventually(|| SHIELD_WITNESS.load(Ordering::SeqCst)));
        assert!(!SHIELD_LEAKED.load(Ordering::SeqCst));
    }

    static SELF_KILL_PID: AtomicU32 = AtomicU32::new(0);
    static SELF_KILL_AFTER: AtomicBool = AtomicBool::new(false);
    static SELF_KILL_WITNESS: AtomicBool = AtomicBool::new(false);

    fn kills_itself(s: &'static Sched) {
        SELF_KILL_PID.store(s.current().as_raw(), Ordering::SeqCst);
        s.kill(s.current());
        SELF_KILL_AFTER.store(true, Ordering::SeqCst);
    }

    fn self_kill_witness(s: &'static Sched) {
        s.sleep(2);
        SELF_KILL_WITNESS.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_self_kill_does_not_return() {
        let sched = boot(8, |s| {
            s.create(GroupId::GAME_LOGIC, kills_itself);
            s.create(GroupId::ATTRACT_MODE, self_kill_witness);
        });
        assert!(eventually(|| SELF_KILL_WITNESS.load(Ordering::SeqCst)));
        assert!(!SELF_KILL_AFTER.load(Ordering::SeqCst));
        let pid = TaskId::from_raw(SELF_KILL_PID.load(Ordering::SeqCst));
        assert_eq!(sched.group_of(pid), None);
    }

    static TICKS_SEEN: AtomicU32 = AtomicU32::new(0);
    static GROUP_KILLED: AtomicUsize = AtomicUsize::new(0);
    static SEEN_AT_KILL: AtomicU32 = AtomicU32::new(0);
    static SEEN_LATER: AtomicU32 = AtomicU32::new(u32::MAX);

    fn forever(s: &'static Sched) {
        loop {
            TICKS_SEEN.fetch_add(1, Ordering::SeqCst);
            s.sleep(1);
        }
    }

    fn sweeper(s: &'static Sched) {
        s.sleep(3);
        GROUP_KILLED.store(s.kill_group(GroupId::LAMP_EFFECT), Ordering::SeqCst);
        SEEN_AT_KILL.store(TICKS_SEEN.load(Ordering::SeqCst), Ordering::SeqCst);
        s.sleep(5);
        SEEN_LATER.store(TICKS_SEEN.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    #[test]
    fn test_kill_group_stops_every_member() {
        let sched = boot(16, |s| {
            s.create(GroupId::LAMP_EFFECT, forever);
            s.create(GroupId::LAMP_EFFECT, forever);
            s.create(GroupId::GAME_LOGIC, sweeper);
        });
        assert!(eventually(|| SEEN_LATER.load(Ordering::SeqCst) != u32::MAX));
        assert_eq!(GROUP_KILLED.load(Ordering::SeqCst), 2);
        assert!(SEEN_AT_KILL.load(Ordering::SeqCst) >= 2);
        assert_eq!(
            SEEN_LATER.load(Ordering::SeqCst),
            SEEN_AT_KILL.load(Ordering::SeqCst)
        );
        assert_eq!(sched.find_group(GroupId::LAMP_EFFECT), None);
    }

    static POOL_PIDS: std::sync::Mutex<Vec<TaskId>> = std::sync::Mutex::new(Vec::new());
    static POOL_OVERFLOW_PANICKED: AtomicBool = AtomicBool::new(false);

    fn parked(s: &'static Sched) {
        s.sleep(1_000);
    }

    #[test]
    fn test_distinct_pids_and_pool_limit() {
        let sched = boot(1, |s| {
            for _ in 0..MAX_TASKS {
                POOL_PIDS
                    .lock()
                    .unwrap()
                    .push(s.create(GroupId::GAME_LOGIC, parked));
            }
            let overflow = panic::catch_unwind(AssertUnwindSafe(|| {
                s.create(GroupId::GAME_LOGIC, parked);
            }));
            POOL_OVERFLOW_PANICKED.store(overflow.is_err(), Ordering::SeqCst);
        });

        let mut pids = POOL_PIDS.lock().unwrap().clone();
        pids.sort_unstable();
        pids.dedup();
        assert_eq!(pids.len(), MAX_TASKS);
        assert!(POOL_OVERFLOW_PANICKED.load(Ordering::SeqCst));
        assert_eq!(sched.task_count(), MAX_TASKS);
    }

    const CHURN_CYCLES: u32 = 1_000;

    static CHURNED: AtomicU32 = AtomicU32::new(0);
    static CHURN_LIVE: AtomicUsize = AtomicUsize::new(usize::MAX);
    static CHURN_ON_MACHINE: AtomicBool = AtomicBool::new(false);

    fn churn(s: &'static Sched) {
        for _ in 0..CHURN_CYCLES {
            let pid = s.create(GroupId::LAMP_EFFECT, parked);
            // Let the new task start and suspend mid-body before the kill
            s.sleep(0);
            s.kill(pid);
            CHURNED.fetch_add(1, Ordering::SeqCst);
        }
        CHURN_ON_MACHINE.store(
            thread::current().name() == Some("machine"),
            Ordering::SeqCst,
        );
        CHURN_LIVE.store(s.primitive().live_contexts(), Ordering::SeqCst);
    }

    #[test]
    fn test_killed_tasks_release_their_contexts() {
        let sched = boot(1, |s| {
            s.create(GroupId::GAME_LOGIC, churn);
        });
        assert!(eventually(|| CHURN_LIVE.load(Ordering::SeqCst) != usize::MAX));
        assert_eq!(CHURNED.load(Ordering::SeqCst), CHURN_CYCLES);
        // Only the churning task itself is left
        assert_eq!(CHURN_LIVE.load(Ordering::SeqCst), 1);
        assert!(CHURN_ON_MACHINE.load(Ordering::SeqCst));
        assert!(eventually(|| sched.task_count() == 0));
    }

    #[test]
    #[should_panic(expected = "no task context")]
    fn test_sleep_before_start_panics() {
        let sched = host_scheduler(1);
        sched.sleep(1);
    }

    #[test]
    #[should_panic(expected = "no task context")]
    fn test_exit_before_start_panics() {
        let sched = host_scheduler(1);
        sched.exit();
    }

    static FOREIGN_TARGET: AtomicU32 = AtomicU32::new(0);

    #[test]
    #[should_panic(expected = "off its dispatching thread")]
    fn test_abort_from_foreign_thread_panics() {
        let sched = boot(1, |s| {
            let pid = s.create(GroupId::GAME_LOGIC, parked);
            FOREIGN_TARGET.store(pid.as_raw(), Ordering::SeqCst);
        });
        assert_eq!(sched.current(), TaskId::NONE);
        sched
            .primitive()
            .abort(TaskId::from_raw(FOREIGN_TARGET.load(Ordering::SeqCst)));
    }
}
