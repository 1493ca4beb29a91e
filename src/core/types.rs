//! Core type definitions
//!
//! Compact aliases and bit constants shared by the whole kernel.

/// Task priority (0 = highest priority)
pub type OsPrio = u8;

/// Tick counter type
pub type OsTick = u32;

/// Semaphore counter type (0..=65535)
pub type OsSemCtr = u16;

/// Interrupt / scheduler-lock nesting counter
pub type OsNestingCtr = u8;

/// Option flags for API calls
pub type OsOpt = u8;

/// Task status bitmask (see [`stat`])
pub type OsStatus = u8;

/// Message pointer carried by queues and the TCB hand-off slot
pub type OsMsg = *mut ();

/// Stack element type
pub type OsStkElement = u32;

/// Index into the TCB pool
pub type TcbIdx = u8;

/// Index into the event control block pool
pub type EcbIdx = u8;

/// Index into the queue control block pool
pub type QIdx = u8;

/// Index into the memory partition pool
pub type MemIdx = u8;

/// Pseudo-priority meaning "the calling task" in suspend/resume calls
pub const PRIO_SELF: OsPrio = 0xFF;

/// Task status bits. Ready is all bits clear; each waiting state and the
/// suspended state contribute one bit and combine freely.
pub mod stat {
    use super::OsStatus;

    pub const RDY: OsStatus = 0x00;
    pub const SEM: OsStatus = 0x01;
    pub const MBOX: OsStatus = 0x02;
    pub const Q: OsStatus = 0x04;
    pub const SUSPEND: OsStatus = 0x08;
    pub const MUTEX: OsStatus = 0x10;
    pub const FLAG: OsStatus = 0x20;
}

/// Option flags for delete and post services
pub mod opt {
    use super::OsOpt;

    // Delete options
    pub const DEL_NO_PEND: OsOpt = 0x00;
    pub const DEL_ALWAYS: OsOpt = 0x01;

    // Queue post options
    pub const POST_OPT_NONE: OsOpt = 0x00;
    pub const POST_OPT_BROADCAST: OsOpt = 0x01;
    pub const POST_OPT_FRONT: OsOpt = 0x02;
}
