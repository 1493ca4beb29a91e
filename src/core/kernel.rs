//! Global kernel state and initialization
//!
//! All mutable kernel state lives in two places: a small set of atomics
//! ([`KernelFlags`]) readable without a critical section, and the
//! [`OsState`] singleton behind a [`CsCell`], which holds the ready
//! structure, the control-block pools and the scheduler bookkeeping.
//! Control blocks reference each other by pool index, never by pointer;
//! the only raw pointers are the stack pointers the port layer consumes.

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::{
    CFG_CPU_CLOCK_HZ, CFG_PRIO_COUNT, CFG_PRIO_IDLE, CFG_PRIO_STAT, CFG_TASK_IDLE_STK_SIZE,
    CFG_TASK_STAT_EN, CFG_TASK_STAT_STK_SIZE, CFG_TCB_COUNT, CFG_TICKS_PER_SEC, OS_VERSION,
};
use crate::critical::critical_section;
use crate::core::cs_cell::CsCell;
use crate::core::hooks;
use crate::error::{OsError, OsResult};
use crate::prio::PrioBitmap;
use crate::task::OsTcb;
use crate::types::{stat, OsNestingCtr, OsOpt, OsPrio, OsStkElement, OsTick, TcbIdx};

#[cfg(any(feature = "sem", feature = "q"))]
use crate::config::CFG_MAX_EVENTS;
#[cfg(any(feature = "sem", feature = "q"))]
use crate::core::event::{EcbKind, OsEcb};
#[cfg(any(feature = "sem", feature = "q"))]
use crate::types::EcbIdx;

#[cfg(feature = "q")]
use crate::config::CFG_MAX_QS;
#[cfg(feature = "q")]
use crate::sync::queue::OsQcb;
#[cfg(feature = "q")]
use crate::types::QIdx;

#[cfg(feature = "mem")]
use crate::config::CFG_MAX_MEM_PART;
#[cfg(feature = "mem")]
use crate::mem::OsMemPart;
#[cfg(feature = "mem")]
use crate::types::MemIdx;

/// Id given to the idle task
pub const TASK_IDLE_ID: u16 = 65535;
/// Id given to the statistics task
pub const TASK_STAT_ID: u16 = 65534;

// ============ Atomic kernel flags ============

/// Kernel flags readable from any context
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    int_nesting: AtomicU8,
    lock_nesting: AtomicU8,
    time: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
            lock_nesting: AtomicU8::new(0),
            time: AtomicU32::new(0),
        }
    }

    pub(crate) fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.int_nesting.store(0, Ordering::SeqCst);
        self.lock_nesting.store(0, Ordering::SeqCst);
        self.time.store(0, Ordering::SeqCst);
    }

    /// Check if multitasking has started
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }

    /// Current interrupt nesting level
    #[inline(always)]
    pub fn int_nesting(&self) -> OsNestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    /// Note ISR entry; saturates at 255
    #[inline(always)]
    pub(crate) fn int_enter(&self) {
        if self.is_running() {
            let nesting = self.int_nesting.load(Ordering::Relaxed);
            if nesting < 255 {
                self.int_nesting.store(nesting + 1, Ordering::Relaxed);
            }
        }
    }

    /// Note ISR exit; floors at 0
    #[inline(always)]
    pub(crate) fn int_exit_dec(&self) {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        if nesting > 0 {
            self.int_nesting.store(nesting - 1, Ordering::Relaxed);
        }
    }

    /// Current scheduler lock nesting level
    #[inline(always)]
    pub fn lock_nesting(&self) -> OsNestingCtr {
        self.lock_nesting.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn lock_inc(&self) {
        let nesting = self.lock_nesting.load(Ordering::Relaxed);
        if nesting < 255 {
            self.lock_nesting.store(nesting + 1, Ordering::Relaxed);
        }
    }

    #[inline(always)]
    pub(crate) fn lock_dec(&self) {
        let nesting = self.lock_nesting.load(Ordering::Relaxed);
        if nesting > 0 {
            self.lock_nesting.store(nesting - 1, Ordering::Relaxed);
        }
    }

    /// Current value of the 32-bit tick counter
    #[inline(always)]
    pub fn time_get(&self) -> OsTick {
        self.time.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn time_set(&self, t: OsTick) {
        self.time.store(t, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn time_inc(&self) {
        self.time.fetch_add(1, Ordering::Relaxed);
    }
}

/// Global kernel flags instance
pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

// ============ Kernel state ============

/// The kernel state singleton: ready structure, control-block pools and
/// scheduler bookkeeping. A test constructs its own instance; firmware
/// uses the [`OS`] singleton through the service functions.
pub struct OsState {
    /// Ready set over all priorities
    pub(crate) rdy: PrioBitmap,
    /// Direct priority -> TCB index table
    pub(crate) prio_tbl: [Option<TcbIdx>; CFG_PRIO_COUNT],

    /// TCB pool
    pub(crate) tcbs: [OsTcb; CFG_TCB_COUNT],
    /// Head of the TCB free list (linked through `next`)
    pub(crate) tcb_free: Option<TcbIdx>,
    /// Head of the all-tasks doubly-linked list
    pub(crate) tcb_list: Option<TcbIdx>,

    /// Priority of the running task
    pub(crate) prio_cur: OsPrio,
    /// Priority of the highest-priority ready task
    pub(crate) prio_high_rdy: OsPrio,
    /// Running task
    pub(crate) tcb_cur: Option<TcbIdx>,
    /// Highest-priority ready task
    pub(crate) tcb_high_rdy: Option<TcbIdx>,
    /// Number of context switches performed
    pub(crate) ctx_sw_ctr: u32,

    #[cfg(any(feature = "sem", feature = "q"))]
    pub(crate) ecbs: [OsEcb; CFG_MAX_EVENTS],
    #[cfg(any(feature = "sem", feature = "q"))]
    pub(crate) ecb_free: Option<EcbIdx>,

    #[cfg(feature = "q")]
    pub(crate) queues: [OsQcb; CFG_MAX_QS],
    #[cfg(feature = "q")]
    pub(crate) q_free: Option<QIdx>,

    #[cfg(feature = "mem")]
    pub(crate) mems: [OsMemPart; CFG_MAX_MEM_PART],
    #[cfg(feature = "mem")]
    pub(crate) mem_free: Option<MemIdx>,

    /// Idle loop iterations since the last statistics snapshot
    pub(crate) idle_ctr: u32,
    /// Idle count captured over the last full second
    pub(crate) idle_ctr_run: u32,
    /// Idle count of one second of doing nothing else, the calibration base
    pub(crate) idle_ctr_max: u32,
    /// CPU usage in percent
    pub(crate) cpu_usage: u8,
    /// Statistics calibration completed
    pub(crate) stat_rdy: bool,
}

impl OsState {
    pub const fn new() -> Self {
        OsState {
            rdy: PrioBitmap::new(),
            prio_tbl: [None; CFG_PRIO_COUNT],

            tcbs: [const { OsTcb::new() }; CFG_TCB_COUNT],
            tcb_free: None,
            tcb_list: None,

            prio_cur: 0,
            prio_high_rdy: 0,
            tcb_cur: None,
            tcb_high_rdy: None,
            ctx_sw_ctr: 0,

            #[cfg(any(feature = "sem", feature = "q"))]
            ecbs: [const { OsEcb::new() }; CFG_MAX_EVENTS],
            #[cfg(any(feature = "sem", feature = "q"))]
            ecb_free: None,

            #[cfg(feature = "q")]
            queues: [const { OsQcb::new() }; CFG_MAX_QS],
            #[cfg(feature = "q")]
            q_free: None,

            #[cfg(feature = "mem")]
            mems: [const { OsMemPart::new() }; CFG_MAX_MEM_PART],
            #[cfg(feature = "mem")]
            mem_free: None,

            idle_ctr: 0,
            idle_ctr_run: 0,
            idle_ctr_max: 0,
            cpu_usage: 0,
            stat_rdy: false,
        }
    }

    /// Reset everything and thread the free lists through the pools.
    pub fn init(&mut self) {
        *self = Self::new();

        for i in 0..CFG_TCB_COUNT - 1 {
            self.tcbs[i].next = Some((i + 1) as TcbIdx);
        }
        self.tcb_free = Some(0);

        #[cfg(any(feature = "sem", feature = "q"))]
        {
            for i in 0..CFG_MAX_EVENTS - 1 {
                self.ecbs[i].kind = EcbKind::Unused {
                    next_free: Some((i + 1) as EcbIdx),
                };
            }
            self.ecb_free = Some(0);
        }

        #[cfg(feature = "q")]
        {
            for i in 0..CFG_MAX_QS - 1 {
                self.queues[i].next_free = Some((i + 1) as QIdx);
            }
            self.q_free = Some(0);
        }

        #[cfg(feature = "mem")]
        {
            for i in 0..CFG_MAX_MEM_PART - 1 {
                self.mems[i].next_free = Some((i + 1) as MemIdx);
            }
            self.mem_free = Some(0);
        }
    }

    /// Take a TCB from the free list and register the new task: priority
    /// table entry, all-tasks list membership and ready-set bit.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn tcb_init(
        &mut self,
        name: &'static str,
        prio: OsPrio,
        stk_ptr: *mut OsStkElement,
        stk_base: *mut OsStkElement,
        stk_size: usize,
        id: u16,
        ext: *mut (),
        opt: OsOpt,
    ) -> OsResult<TcbIdx> {
        let Some(i) = self.tcb_free else {
            return Err(OsError::NoMoreTcb);
        };
        self.tcb_free = self.tcbs[i as usize].next;

        {
            let tcb = &mut self.tcbs[i as usize];
            tcb.stk_ptr = stk_ptr;
            tcb.stk_base = stk_base;
            tcb.stk_size = stk_size;
            tcb.name = name;
            tcb.id = id;
            tcb.opt = opt;
            tcb.ext_ptr = ext;
            tcb.prio = prio;
            tcb.y = prio >> 3;
            tcb.bit_y = 1 << tcb.y;
            tcb.x = prio & 0x07;
            tcb.bit_x = 1 << tcb.x;
            tcb.stat = stat::RDY;
            tcb.dly = 0;
            tcb.event = None;
            tcb.msg = ptr::null_mut();
        }

        hooks::tcb_init(prio);
        hooks::task_create(prio);

        self.prio_tbl[prio as usize] = Some(i);

        let head = self.tcb_list;
        {
            let tcb = &mut self.tcbs[i as usize];
            tcb.prev = None;
            tcb.next = head;
        }
        if let Some(h) = head {
            self.tcbs[h as usize].prev = Some(i);
        }
        self.tcb_list = Some(i);

        let (y, bit_y, bit_x) = {
            let tcb = &self.tcbs[i as usize];
            (tcb.y, tcb.bit_y, tcb.bit_x)
        };
        self.rdy.set(y, bit_y, bit_x);

        Ok(i)
    }

    /// Raw pointer to a pooled TCB, for the port layer
    #[inline]
    pub(crate) fn tcb_ptr(&mut self, i: TcbIdx) -> *mut OsTcb {
        &raw mut self.tcbs[i as usize]
    }
}

impl Default for OsState {
    fn default() -> Self {
        Self::new()
    }
}

/// Global kernel state instance
pub(crate) static OS: CsCell<OsState> = CsCell::new(OsState::new());

// ============ CPU / context switch interface ============

/// The raw-pointer pair the context-switch code works with. `tcb_cur`
/// must stay at offset 0; the PendSV handler addresses it directly.
#[repr(C)]
pub struct CpuState {
    /// Running task's TCB; the switch saves the outgoing stack pointer here
    pub tcb_cur: *mut OsTcb,
    /// TCB to switch to
    pub tcb_high_rdy: *mut OsTcb,
}

impl CpuState {
    pub const fn new() -> Self {
        Self {
            tcb_cur: ptr::null_mut(),
            tcb_high_rdy: ptr::null_mut(),
        }
    }
}

/// Global CPU switch state, shared with the port assembly
#[no_mangle]
#[used]
pub static mut CPU_STATE: CpuState = CpuState::new();

// ============ Idle and statistics tasks ============

static mut IDLE_STK: [OsStkElement; CFG_TASK_IDLE_STK_SIZE] = [0; CFG_TASK_IDLE_STK_SIZE];
static mut STAT_STK: [OsStkElement; CFG_TASK_STAT_STK_SIZE] = [0; CFG_TASK_STAT_STK_SIZE];

/// Idle task: counts loop iterations for the statistics task and gives the
/// application a power-down hook point.
fn os_task_idle(_: *mut ()) -> ! {
    loop {
        critical_section(|cs| {
            let st = OS.get(cs);
            st.idle_ctr = st.idle_ctr.wrapping_add(1);
        });
        hooks::idle();
    }
}

/// Statistics task: once calibrated, snapshots the idle counter every
/// second and derives CPU usage from the ratio against the calibration
/// maximum.
fn os_task_stat(_: *mut ()) -> ! {
    while !critical_section(|cs| OS.get(cs).stat_rdy) {
        crate::time::os_time_dly(2 * CFG_TICKS_PER_SEC);
    }

    let mut max = critical_section(|cs| OS.get(cs).idle_ctr_max) / 100;
    loop {
        let run = critical_section(|cs| {
            let st = OS.get(cs);
            let run = st.idle_ctr;
            st.idle_ctr_run = run;
            st.idle_ctr = 0;
            run
        });

        if max > 0 {
            let usage = 100i32 - (run / max) as i32;
            critical_section(|cs| {
                OS.get(cs).cpu_usage = if usage >= 0 { usage as u8 } else { 0 };
            });
        } else {
            critical_section(|cs| OS.get(cs).cpu_usage = 0);
            max = critical_section(|cs| OS.get(cs).idle_ctr_max) / 100;
        }

        hooks::stat();
        crate::time::os_time_dly(CFG_TICKS_PER_SEC);
    }
}

/// Calibrate the statistics task.
///
/// Call from the first application task, after multitasking has started
/// and before relying on [`os_cpu_usage`]. Measures how far the idle
/// counter gets in one second with nothing else to run.
pub fn os_stat_init() {
    crate::time::os_time_dly(2);
    critical_section(|cs| OS.get(cs).idle_ctr = 0);
    crate::time::os_time_dly(CFG_TICKS_PER_SEC);
    critical_section(|cs| {
        let st = OS.get(cs);
        st.idle_ctr_max = st.idle_ctr;
        st.stat_rdy = true;
    });
}

// ============ Public API ============

/// Initialize the kernel.
///
/// Must be called before any other kernel service. Resets all pools,
/// threads the free lists and creates the idle task (and the statistics
/// task when enabled).
pub fn os_init() {
    hooks::init_begin();

    KERNEL.reset();

    critical_section(|cs| {
        let st = OS.get(cs);
        st.init();

        let (idle_base, sp) = unsafe {
            let base = (&raw mut IDLE_STK).cast::<OsStkElement>();
            let sp = crate::port::os_task_stk_init(
                os_task_idle,
                ptr::null_mut(),
                base,
                CFG_TASK_IDLE_STK_SIZE,
                0,
            );
            (base, sp)
        };
        st.tcb_init(
            "idle",
            CFG_PRIO_IDLE,
            sp,
            idle_base,
            CFG_TASK_IDLE_STK_SIZE,
            TASK_IDLE_ID,
            ptr::null_mut(),
            0,
        )
        .expect("idle task creation failed");

        if CFG_TASK_STAT_EN {
            let (stat_base, sp) = unsafe {
                let base = (&raw mut STAT_STK).cast::<OsStkElement>();
                let sp = crate::port::os_task_stk_init(
                    os_task_stat,
                    ptr::null_mut(),
                    base,
                    CFG_TASK_STAT_STK_SIZE,
                    0,
                );
                (base, sp)
            };
            st.tcb_init(
                "stat",
                CFG_PRIO_STAT,
                sp,
                stat_base,
                CFG_TASK_STAT_STK_SIZE,
                TASK_STAT_ID,
                ptr::null_mut(),
                0,
            )
            .expect("stat task creation failed");
        }
    });

    KERNEL.set_initialized(true);
    crate::debug!("kernel initialized");

    hooks::init_end();
}

/// Start multitasking.
///
/// Selects the highest-priority created task and hands control to the
/// port's start routine. Does not return once multitasking is running.
pub fn os_start() {
    if !KERNEL.is_initialized() || KERNEL.is_running() {
        return;
    }

    critical_section(|cs| {
        let st = OS.get(cs);
        let prio = st.rdy.highest();
        st.prio_cur = prio;
        st.prio_high_rdy = prio;
        st.tcb_cur = st.prio_tbl[prio as usize];
        st.tcb_high_rdy = st.tcb_cur;

        if let Some(i) = st.tcb_high_rdy {
            unsafe {
                CPU_STATE.tcb_cur = ptr::null_mut();
                CPU_STATE.tcb_high_rdy = st.tcb_ptr(i);
            }
        }
    });

    crate::port::os_cpu_systick_init(CFG_CPU_CLOCK_HZ / CFG_TICKS_PER_SEC);

    unsafe { crate::port::os_start_high_rdy() };
}

/// Notify the kernel of ISR entry.
///
/// Call at the top of every ISR that uses kernel services, paired with
/// [`os_int_exit`]. Nesting saturates at 255 levels.
pub fn os_int_enter() {
    KERNEL.int_enter();
}

/// Notify the kernel of ISR exit.
///
/// When the last nested ISR completes and the scheduler is not locked,
/// performs the interrupt-level reschedule.
pub fn os_int_exit() {
    if !KERNEL.is_running() {
        return;
    }

    critical_section(|cs| {
        if KERNEL.int_nesting() > 0 {
            KERNEL.int_exit_dec();
        }
        if KERNEL.int_nesting() == 0 && KERNEL.lock_nesting() == 0 {
            let st = OS.get(cs);
            if st.sched_core() {
                if let Some(i) = st.tcb_high_rdy {
                    unsafe {
                        CPU_STATE.tcb_high_rdy = st.tcb_ptr(i);
                    }
                    crate::port::os_int_ctx_sw();
                }
            }
        }
    });
}

/// Prevent rescheduling until the matching [`os_sched_unlock`].
///
/// Interrupts stay enabled; wake-ups are recorded and take effect when
/// the lock count returns to zero.
pub fn os_sched_lock() {
    if !KERNEL.is_running() {
        return;
    }
    critical_section(|_cs| KERNEL.lock_inc());
}

/// Re-allow rescheduling; reschedules when the count reaches zero
/// outside an ISR.
pub fn os_sched_unlock() {
    if !KERNEL.is_running() {
        return;
    }
    let resched = critical_section(|_cs| {
        if KERNEL.lock_nesting() == 0 {
            return false;
        }
        KERNEL.lock_dec();
        KERNEL.lock_nesting() == 0 && KERNEL.int_nesting() == 0
    });
    if resched {
        crate::sched::os_sched();
    }
}

/// Check whether multitasking has started
#[inline]
pub fn os_running() -> bool {
    KERNEL.is_running()
}

/// Current CPU usage in percent, computed by the statistics task
pub fn os_cpu_usage() -> u8 {
    critical_section(|cs| OS.get(cs).cpu_usage)
}

/// Number of context switches since start
pub fn os_ctx_sw_count() -> u32 {
    critical_section(|cs| OS.get(cs).ctx_sw_ctr)
}

/// Kernel version as major * 100 + minor
#[inline]
pub fn os_version() -> u16 {
    OS_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcb_pool_exhaustion() {
        let mut st = OsState::new();
        st.init();

        for p in 0..CFG_TCB_COUNT {
            st.tcb_init("t", p as OsPrio, ptr::null_mut(), ptr::null_mut(), 0, 0, ptr::null_mut(), 0)
                .unwrap();
        }
        let err = st
            .tcb_init("x", CFG_TCB_COUNT as OsPrio, ptr::null_mut(), ptr::null_mut(), 0, 0, ptr::null_mut(), 0)
            .unwrap_err();
        assert_eq!(err, OsError::NoMoreTcb);
    }

    #[test]
    fn test_tcb_init_registers_everywhere() {
        let mut st = OsState::new();
        st.init();

        let i = st
            .tcb_init("a", 10, ptr::null_mut(), ptr::null_mut(), 0, 7, ptr::null_mut(), 0)
            .unwrap();

        assert_eq!(st.prio_tbl[10], Some(i));
        assert!(st.rdy.contains(10));
        assert_eq!(st.tcb_list, Some(i));

        let tcb = &st.tcbs[i as usize];
        assert_eq!(tcb.prio, 10);
        assert_eq!(tcb.y, 1);
        assert_eq!(tcb.bit_y, 0x02);
        assert_eq!(tcb.x, 2);
        assert_eq!(tcb.bit_x, 0x04);
        assert!(tcb.is_ready());
        assert_eq!(tcb.id, 7);
    }

    #[test]
    fn test_int_nesting_saturates_and_floors() {
        KERNEL.reset();
        KERNEL.set_running(true);

        for _ in 0..300 {
            KERNEL.int_enter();
        }
        assert_eq!(KERNEL.int_nesting(), 255);

        for _ in 0..300 {
            KERNEL.int_exit_dec();
        }
        assert_eq!(KERNEL.int_nesting(), 0);

        KERNEL.reset();
    }

    #[test]
    fn test_all_tasks_list_links() {
        let mut st = OsState::new();
        st.init();

        let a = st.tcb_init("a", 5, ptr::null_mut(), ptr::null_mut(), 0, 0, ptr::null_mut(), 0).unwrap();
        let b = st.tcb_init("b", 6, ptr::null_mut(), ptr::null_mut(), 0, 0, ptr::null_mut(), 0).unwrap();

        // Newest task sits at the list head
        assert_eq!(st.tcb_list, Some(b));
        assert_eq!(st.tcbs[b as usize].next, Some(a));
        assert_eq!(st.tcbs[a as usize].prev, Some(b));
        assert_eq!(st.tcbs[a as usize].next, None);
    }
}
