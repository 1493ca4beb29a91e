//! Priority-based preemptive real-time kernel
//!
//! A real-time kernel core providing:
//! - O(1) bitmap scheduling over unique static priorities
//! - Counting semaphores and message queues over a shared wait-list protocol
//! - Tick-based delays and pend timeouts
//! - Fixed-block memory partitions
//! - Context switching for ARM Cortex-M

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod port;
pub mod sync;

#[cfg(feature = "mem")]
pub mod mem;

// ============ Re-exports ============

pub use crate::core::config;
pub use crate::core::config::*;
pub use crate::core::critical;
pub use crate::core::cs_cell;
pub use crate::core::error;
pub use crate::core::error::{OsError, OsResult};
pub use crate::core::hooks;
pub use crate::core::hooks::{os_hooks_set, OsHooks};
pub use crate::core::kernel;
pub use crate::core::kernel::{
    os_cpu_usage, os_ctx_sw_count, os_init, os_int_enter, os_int_exit, os_running,
    os_sched_lock, os_sched_unlock, os_start, os_stat_init, os_version,
};
pub use crate::core::prio;
pub use crate::core::prio::PrioBitmap;
pub use crate::core::sched;
pub use crate::core::task;
pub use crate::core::task::{
    os_task_create, os_task_create_ext, os_task_resume, os_task_suspend, OsTaskFn, OsTcb,
};
pub use crate::core::time;
pub use crate::core::time::{
    os_time_dly, os_time_dly_hmsm, os_time_dly_resume, os_time_get, os_time_set, os_time_tick,
};
pub use crate::core::types;
pub use crate::core::types::*;

#[cfg(any(feature = "sem", feature = "q"))]
pub use crate::core::event;
#[cfg(any(feature = "sem", feature = "q"))]
pub use crate::core::event::OsEventHandle;

#[cfg(feature = "sem")]
pub use crate::sync::sem::{
    os_sem_accept, os_sem_create, os_sem_del, os_sem_pend, os_sem_post, os_sem_query, OsSemInfo,
};

#[cfg(feature = "q")]
pub use crate::sync::queue::{
    os_q_accept, os_q_create, os_q_del, os_q_flush, os_q_pend, os_q_post, os_q_post_front,
    os_q_post_opt, os_q_query, OsQInfo,
};

#[cfg(feature = "mem")]
pub use crate::mem::{os_mem_create, os_mem_get, os_mem_put, os_mem_query, OsMemHandle, OsMemInfo};
