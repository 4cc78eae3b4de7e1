//! # FlipOS Demo Machine
//!
//! A small attract-mode workload exercising the scheduler. Built for the
//! Cortex-M4 it is the firmware image; built for a desktop it is the
//! simulator, with `--irq-multiplier` speeding up the tick.
//!
//! | Task            | Group          | Tier        | Behavior |
//! |-----------------|----------------|-------------|----------|
//! | `clock_task`    | REALTIME       | Timekeeping | Counts ticks, 1-tick period |
//! | `switch_poller` | INTERFACE      | Interface   | Polls the switch matrix every 2 ticks |
//! | `lamp_chase`    | LAMP_EFFECT    | Baseline    | Steps a lamp chase every 100 ms |
//! | `ball_search`   | BALL_SEARCH    | Baseline    | Pulses coils until killed |
//! | `attract_mode`  | ATTRACT_MODE   | Baseline    | Restarts effects, kills the ball search |

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

use core::sync::atomic::{AtomicU32, Ordering};

use flipos::{GroupId, Scheduler, TaskId};

#[cfg(target_os = "none")]
use panic_halt as _;

static CLOCK_TICKS: AtomicU32 = AtomicU32::new(0);
static SWITCH_SCANS: AtomicU32 = AtomicU32::new(0);
static LAMP_STEP: AtomicU32 = AtomicU32::new(0);
static COIL_PULSES: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// Timekeeping: never misses a tick while other work is ready.
fn clock_task(s: &'static Scheduler) {
    loop {
        CLOCK_TICKS.fetch_add(1, Ordering::Relaxed);
        s.sleep(1);
    }
}

fn switch_poller(s: &'static Scheduler) {
    loop {
        SWITCH_SCANS.fetch_add(1, Ordering::Relaxed);
        s.sleep(2);
    }
}

/// One lap of an 8-lamp chase, then exit.
fn lamp_chase(s: &'static Scheduler) {
    for _ in 0..8 {
        LAMP_STEP.fetch_add(1, Ordering::Relaxed);
        s.sleep(6);
    }
}

fn ball_search(s: &'static Scheduler) {
    loop {
        COIL_PULSES.fetch_add(1, Ordering::Relaxed);
        s.sleep(12);
    }
}

fn attract_mode(s: &'static Scheduler) {
    let search: TaskId = s.create(GroupId::BALL_SEARCH, ball_search);
    loop {
        s.recreate(GroupId::LAMP_EFFECT, lamp_chase);
        s.sleep_seconds(2);
        if s.find_group(GroupId::BALL_SEARCH) == Some(search) {
            log::info!("attract: ball found, stopping search {search}");
            s.kill(search);
        }
        log::info!(
            "attract: clock={} scans={} lamps={} pulses={} tasks={}",
            CLOCK_TICKS.load(Ordering::Relaxed),
            SWITCH_SCANS.load(Ordering::Relaxed),
            LAMP_STEP.load(Ordering::Relaxed),
            COIL_PULSES.load(Ordering::Relaxed),
            s.task_count()
        );
    }
}

fn create_machine_tasks(s: &'static Scheduler) {
    s.create(GroupId::REALTIME, clock_task);
    s.create(GroupId::INTERFACE, switch_poller);
    s.create(GroupId::ATTRACT_MODE, attract_mode);
}

// ---------------------------------------------------------------------------
// Firmware entry point
// ---------------------------------------------------------------------------

#[cfg(target_os = "none")]
static SCHED: Scheduler = Scheduler::new(
    flipos::arch::cortex_m4::CortexM4::new(),
    flipos::SchedulerConfig::DEFAULT,
);

/// Initializes the scheduler, creates tasks, and starts dispatching.
/// Does not return.
#[cfg(target_os = "none")]
#[cortex_m_rt::entry]
fn main() -> ! {
    SCHED.init();
    create_machine_tasks(&SCHED);
    SCHED.start()
}

// ---------------------------------------------------------------------------
// Simulator entry point
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "none"))]
mod sim {
    use clap::Parser;
    use tracing_subscriber::EnvFilter;

    use flipos::arch::host::HostBackend;
    use flipos::{GroupId, Scheduler, SchedulerConfig};

    #[derive(Parser, Debug)]
    #[command(name = "flipos", about = "Desktop simulation of the FlipOS demo machine")]
    pub struct Args {
        /// Run the tick this many times faster than the machine
        #[arg(long, default_value_t = 1)]
        pub irq_multiplier: u32,

        /// Stop the simulation after this many seconds of machine time
        #[arg(long, default_value_t = 10)]
        pub run_seconds: u32,
    }

    static RUN_SECONDS: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

    /// Ends the process once the configured run time has passed.
    fn power_off(s: &'static Scheduler) {
        s.sleep_seconds(RUN_SECONDS.load(core::sync::atomic::Ordering::Relaxed));
        log::info!("sim: power off with {} tasks live", s.task_count());
        std::process::exit(0);
    }

    pub fn run() -> ! {
        let args = Args::parse();

        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();

        let config = match SchedulerConfig::with_rate_multiplier(args.irq_multiplier) {
            Ok(config) => config,
            Err(e) => {
                log::error!("sim: {e}");
                std::process::exit(2);
            }
        };
        RUN_SECONDS.store(args.run_seconds, core::sync::atomic::Ordering::Relaxed);

        let sched: &'static Scheduler = Box::leak(Box::new(Scheduler::new(HostBackend::new(), config)));
        sched.init();
        super::create_machine_tasks(sched);
        sched.create(GroupId::GAME_LOGIC, power_off);
        sched.start()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    sim::run()
}
