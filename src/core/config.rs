//! Compile-time configuration
//!
//! These constants control the resource limits and feature behavior of the
//! kernel. They are fixed at build time; no dynamic allocation occurs.

use crate::types::OsPrio;

/// Lowest (numerically largest) usable priority. Priority 0 is the highest.
pub const CFG_LOWEST_PRIO: usize = 63;

/// Number of priority levels
pub const CFG_PRIO_COUNT: usize = CFG_LOWEST_PRIO + 1;

/// Number of groups in the two-level priority bitmap (8 priorities per group)
pub const CFG_PRIO_GRP_COUNT: usize = CFG_PRIO_COUNT / 8;

/// Maximum number of application tasks
pub const CFG_MAX_TASKS: usize = 16;

/// Number of kernel-internal tasks (idle + statistics)
pub const CFG_N_SYS_TASKS: usize = 2;

/// Total number of task control blocks in the pool
pub const CFG_TCB_COUNT: usize = CFG_MAX_TASKS + CFG_N_SYS_TASKS;

/// Maximum number of event control blocks (semaphores + queues)
pub const CFG_MAX_EVENTS: usize = 16;

/// Maximum number of queue control blocks
pub const CFG_MAX_QS: usize = 8;

/// Maximum number of fixed-block memory partitions
pub const CFG_MAX_MEM_PART: usize = 8;

/// System tick rate in Hz
pub const CFG_TICKS_PER_SEC: u32 = 1000;

/// CPU core clock, used to program the SysTick reload value
pub const CFG_CPU_CLOCK_HZ: u32 = 16_000_000;

/// Minimum task stack size in stack elements
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Idle task stack size in stack elements
pub const CFG_TASK_IDLE_STK_SIZE: usize = 128;

/// Statistics task stack size in stack elements
pub const CFG_TASK_STAT_STK_SIZE: usize = 128;

/// Enable the CPU-usage statistics task
pub const CFG_TASK_STAT_EN: bool = true;

/// Enable argument checking on service entry
pub const CFG_ARG_CHK_EN: bool = true;

/// Idle task priority (always the lowest)
pub const CFG_PRIO_IDLE: OsPrio = CFG_LOWEST_PRIO as OsPrio;

/// Statistics task priority (one above idle)
pub const CFG_PRIO_STAT: OsPrio = (CFG_LOWEST_PRIO - 1) as OsPrio;

/// Kernel version, major * 100 + minor
pub const OS_VERSION: u16 = 100;
