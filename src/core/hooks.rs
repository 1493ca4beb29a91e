//! User hook registration
//!
//! The kernel calls out to the application at a fixed set of points.
//! Hooks are plain function pointers registered before [`os_init`]
//! (`crate::kernel::os_init`); unset hooks are skipped. Hooks run in the
//! context noted on each field and must not block or re-enter kernel
//! services.

use crate::core::cs_cell::CsCell;
use crate::critical::critical_section;
use crate::types::OsPrio;

/// Hook table
#[derive(Clone, Copy, Default)]
pub struct OsHooks {
    /// Start of kernel initialization
    pub init_begin: Option<fn()>,
    /// End of kernel initialization
    pub init_end: Option<fn()>,
    /// A TCB was populated (critical section held)
    pub tcb_init: Option<fn(OsPrio)>,
    /// A task was created (critical section held)
    pub task_create: Option<fn(OsPrio)>,
    /// A context switch is being performed (interrupts disabled)
    pub task_sw: Option<fn()>,
    /// Start of every tick (may run in ISR context)
    pub tick: Option<fn()>,
    /// Every idle loop iteration
    pub idle: Option<fn()>,
    /// Every statistics task period
    pub stat: Option<fn()>,
}

impl OsHooks {
    pub const fn new() -> Self {
        OsHooks {
            init_begin: None,
            init_end: None,
            tcb_init: None,
            task_create: None,
            task_sw: None,
            tick: None,
            idle: None,
            stat: None,
        }
    }
}

static HOOKS: CsCell<OsHooks> = CsCell::new(OsHooks::new());

/// Install the hook table. Replaces any previously registered hooks.
pub fn os_hooks_set(hooks: OsHooks) {
    critical_section(|cs| *HOOKS.get(cs) = hooks);
}

macro_rules! fire {
    ($field:ident) => {
        if let Some(f) = critical_section(|cs| HOOKS.get(cs).$field) {
            f();
        }
    };
    ($field:ident, $arg:expr) => {
        if let Some(f) = critical_section(|cs| HOOKS.get(cs).$field) {
            f($arg);
        }
    };
}

pub(crate) fn init_begin() {
    fire!(init_begin);
}

pub(crate) fn init_end() {
    fire!(init_end);
}

pub(crate) fn tcb_init(prio: OsPrio) {
    fire!(tcb_init, prio);
}

pub(crate) fn task_create(prio: OsPrio) {
    fire!(task_create, prio);
}

#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
pub(crate) fn task_sw() {
    fire!(task_sw);
}

pub(crate) fn tick() {
    fire!(tick);
}

pub(crate) fn idle() {
    fire!(idle);
}

pub(crate) fn stat() {
    fire!(stat);
}
