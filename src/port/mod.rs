//! Port layer - CPU-specific implementations
//!
//! The kernel core calls these to build initial stack frames, trigger
//! context switches and start multitasking. On ARM the PendSV exception
//! does the register work; on other targets stubs keep the core testable
//! on a host.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

// Stub implementations for non-ARM targets (for testing)
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use crate::task::OsTaskFn;
    use crate::types::{OsOpt, OsStkElement};

    pub unsafe fn os_start_high_rdy() {
        panic!("os_start_high_rdy not available on this platform");
    }

    /// Task-level context switch; the kernel bookkeeping has already
    /// committed, so the host stub has nothing to do.
    pub fn os_ctx_sw() {}

    /// Interrupt-level context switch; no-op on the host.
    pub fn os_int_ctx_sw() {}

    pub unsafe fn os_task_stk_init(
        _task: OsTaskFn,
        _arg: *mut (),
        stk_base: *mut OsStkElement,
        stk_size: usize,
        _opt: OsOpt,
    ) -> *mut OsStkElement {
        if stk_base.is_null() {
            return stk_base;
        }
        unsafe { stk_base.add(stk_size.saturating_sub(1)) }
    }

    pub fn os_cpu_systick_init(_reload: u32) {}
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;
