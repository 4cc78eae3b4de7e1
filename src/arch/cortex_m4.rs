//! # Cortex-M4 Port Layer
//!
//! Hardware execution backend for the ARM Cortex-M4 (Thumb-2). Tasks live
//! in a fixed TCB pool ([`TaskTable`]); SysTick advances the tick and
//! PendSV performs every context switch.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore.
//!
//! A task only pends PendSV itself (sleep, exit, self-abort) or from the
//! idle loop, so switches happen exactly at cooperative suspension points.
//! Code running before `start` is on MSP and owns no TCB: it may create
//! and kill tasks but not sleep or exit.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest), can be preempted
//! - PendSV: Priority 0xFF (lowest), runs only when no other ISR is active

use core::arch::{asm, naked_asm};
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicPtr, Ordering};
use core::time::Duration;

use cortex_m::peripheral::syst::SystClkSource;

use crate::config::{SchedulerConfig, STACK_SIZE};
use crate::error::SchedError;
use crate::primitive::{ExecutionPrimitive, SpawnAttributes, TaskEntry};
use crate::scheduler::{TaskTable, IDLE_SLOT};
use crate::sync::{self, Mutex};
use crate::task::{TaskControlBlock, TaskId};

/// The port instance the exception handlers operate on. Set once by
/// `global_init`; the scheduler holding the port is a `static`.
static PORT: AtomicPtr<CortexM4> = AtomicPtr::new(core::ptr::null_mut());

/// Hardware execution backend.
pub struct CortexM4 {
    table: Mutex<RefCell<TaskTable<TaskEntry<CortexM4>>>>,
    /// Fixed at `global_init`.
    config: Mutex<Cell<SchedulerConfig>>,
}

impl CortexM4 {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(RefCell::new(TaskTable::new())),
            config: Mutex::new(Cell::new(SchedulerConfig::DEFAULT)),
        }
    }

    fn with_table<R>(&self, f: impl FnOnce(&mut TaskTable<TaskEntry<CortexM4>>) -> R) -> R {
        sync::locked(&self.table, f)
    }

    fn config(&self) -> SchedulerConfig {
        sync::critical_section(|cs| self.config.borrow(cs).get())
    }

    /// Switch away from a context that no longer exists. PendSV never
    /// returns here.
    fn switch_away() -> ! {
        trigger_pendsv();
        loop {
            cortex_m::asm::wfi();
        }
    }
}

impl Default for CortexM4 {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionPrimitive for CortexM4 {
    fn global_init(&self, config: &SchedulerConfig) {
        PORT.store(self as *const Self as *mut Self, Ordering::Release);
        sync::critical_section(|cs| self.config.borrow(cs).set(*config));
        self.with_table(|table| {
            table.install_idle();
            init_task_stack(&mut table.tasks[IDLE_SLOT], idle_loop);
        });
    }

    fn spawn(&self, attrs: SpawnAttributes, entry: TaskEntry<Self>) -> Result<TaskId, SchedError> {
        debug_assert!(!attrs.joinable && attrs.cancellable);
        self.with_table(|table| {
            let slot = table.allocate(attrs.priority, entry)?;
            init_task_stack(&mut table.tasks[slot], task_trampoline);
            Ok(table.tasks[slot].id)
        })
    }

    fn suspend_for(&self, duration: Duration) {
        let ticks = self.config().duration_to_ticks(duration);
        if let Err(e) = self.with_table(|table| table.suspend_current(ticks)) {
            panic!("sleep: {e}");
        }
        // PendSV is taken as soon as it is pended; we resume here later
        trigger_pendsv();
    }

    fn terminate_current(&self) -> ! {
        if let Err(e) = self.with_table(|table| table.terminate_current()) {
            panic!("exit: {e}");
        }
        Self::switch_away()
    }

    fn abort(&self, id: TaskId) {
        match self.with_table(|table| table.abort(id)) {
            Ok(true) => Self::switch_away(),
            Ok(false) => {}
            Err(e) => panic!("abort: {e}"),
        }
    }

    fn current(&self) -> TaskId {
        self.with_table(|table| table.current_id())
    }

    /// Configures the SysTick timer, sets interrupt priorities, and launches
    /// the first task. After this call the dispatcher owns the CPU.
    fn start(&self) -> ! {
        // Safety: the port only touches SYST and the system handler
        // priority registers; the application keeps every other peripheral.
        let mut cp = unsafe { cortex_m::Peripherals::steal() };
        configure_systick(&mut cp.SYST, self.config().systick_reload());
        set_interrupt_priorities();

        let first_sp = self.with_table(|table| {
            let first = table.schedule();
            table.tasks[first].stack_pointer as *const u32
        });

        unsafe { start_first_task(first_sp) }
    }
}

fn port() -> &'static CortexM4 {
    let ptr = PORT.load(Ordering::Acquire);
    assert!(!ptr.is_null(), "{}", SchedError::NotInitialized);
    // Safety: set from a `&'static` port in global_init and never cleared
    unsafe { &*ptr }
}

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// First code every task runs: fetch the entry stored in its TCB.
extern "C" fn task_trampoline() -> ! {
    match port().with_table(|table| table.current_entry()) {
        Some(entry) => entry.run(),
        None => idle_loop(),
    }
}

/// Body of the idle context: sleep until an interrupt, then let the
/// dispatcher look for a woken task.
extern "C" fn idle_loop() -> ! {
    loop {
        cortex_m::asm::wfi();
        trigger_pendsv();
    }
}

/// Fallback return address for a task frame. Entries never return.
extern "C" fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Stack initialization
// ---------------------------------------------------------------------------

/// Initialize a task's stack frame for first-time context switch.
///
/// We pre-populate the exception frame on the task's stack so that the
/// first PendSV "return" starts executing `pc`.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (entry point)
///   LR    (task_exit)
///   R12, R3, R2, R1, R0  (0)
/// [Software saved context]
///   R11 … R4  (0)           <- stack_pointer after init
/// ```
fn init_task_stack<E>(tcb: &mut TaskControlBlock<E>, pc: extern "C" fn() -> !) {
    // Align to 8 bytes (AAPCS requirement)
    let aligned_top = tcb.stack.top() & !0x07;
    debug_assert!(aligned_top - tcb.stack.0.as_ptr() as usize <= STACK_SIZE);

    // 16 registers: 8 software-saved + 8 hardware-stacked
    let frame_ptr = (aligned_top - 16 * 4) as *mut u32;

    unsafe {
        for i in 0..8 {
            *frame_ptr.add(i) = 0; // R4–R11
        }
        *frame_ptr.add(8) = 0; // R0
        *frame_ptr.add(9) = 0; // R1
        *frame_ptr.add(10) = 0; // R2
        *frame_ptr.add(11) = 0; // R3
        *frame_ptr.add(12) = 0; // R12
        *frame_ptr.add(13) = task_exit as usize as u32; // LR
        *frame_ptr.add(14) = pc as usize as u32; // PC
        *frame_ptr.add(15) = 0x0100_0000; // xPSR, Thumb bit set
    }

    tcb.stack_pointer = frame_ptr;
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire once per scheduler tick.
fn configure_systick(syst: &mut cortex_m::peripheral::SYST, reload: u32) {
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Pend a PendSV exception to perform a context switch.
///
/// Sets the PENDSVSET bit in the Interrupt Control and State Register (ICSR).
#[inline]
pub fn trigger_pendsv() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Set PendSV and SysTick to the lowest interrupt priority.
fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = val | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching to PSP and branching to Thread mode.
///
/// # Safety
/// Must only be called once, with a stack pointer prepared by
/// `init_task_stack`.
unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the 8 software-saved registers (8×4 = 32 bytes)
        "adds r0, #32",
        "msr psp, r0",

        // Switch to PSP for Thread mode (set CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Pop the hardware frame by hand: no exception to return from yet
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR (discarded, entries never return)
        "pop {{r5}}",          // PC (entry point)
        "pop {{r6}}",          // xPSR (discarded)

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler. Performs the actual context switch.
///
/// 1. Save R4–R11 onto the current task's stack (PSP)
/// 2. Store the updated PSP into the current TCB
/// 3. Ask the task table for the next context
/// 4. Restore R4–R11 from the new context's stack
/// 5. Return from exception (hardware restores R0–R3, R12, LR, PC, xPSR)
///
/// # Safety
/// Called directly by the NVIC; follows the Cortex-M4 exception
/// entry/exit convention.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {save_context}",

        "bl {do_schedule}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        // Return to Thread mode on PSP (EXC_RETURN = 0xFFFFFFFD)
        "ldr r0, =0xFFFFFFFD",
        "bx r0",

        save_context = sym save_current_context,
        do_schedule = sym do_context_switch,
    );
}

/// Save the outgoing context's stack pointer. Called from PendSV.
///
/// A slot freed by exit or abort keeps the stale pointer until it is
/// reallocated, which rewrites it.
unsafe extern "C" fn save_current_context(psp: *mut u32) {
    port().with_table(|table| table.current_tcb_mut().stack_pointer = psp);
}

/// Pick the next context and return its stack pointer. Called from PendSV.
unsafe extern "C" fn do_context_switch() -> *mut u32 {
    port().with_table(|table| {
        let next = table.schedule();
        table.tasks[next].stack_pointer
    })
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler: one scheduler tick.
///
/// Wakes due sleepers and pends a switch if the idle context holds the CPU.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    if port().with_table(|table| table.tick()) {
        trigger_pendsv();
    }
}
