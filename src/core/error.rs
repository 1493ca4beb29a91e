//! Error types
//!
//! Uses Rust's Result pattern instead of C-style error out-parameters. The
//! discriminants are stable and part of the ABI toward application code;
//! success corresponds to code 0 and is represented by `Ok`.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsError {
    /// Event control block has the wrong type for this service
    EventType = 1,
    /// Cannot pend from an ISR
    PendIsr = 2,
    /// Attempted to post a null message pointer
    PostNullPtr = 3,
    /// Invalid event handle
    EventNull = 4,
    /// Cannot post from an ISR
    PostIsr = 5,
    /// Cannot query from an ISR
    QueryIsr = 6,
    /// Invalid option specified
    InvalidOpt = 7,
    /// Tasks are waiting on the object
    TaskWaiting = 8,
    /// No free event control blocks
    NoMoreEcb = 9,
    /// Operation timed out
    Timeout = 10,
    /// No task exists at the given priority
    TaskNotExist = 11,
    /// No free queue control blocks
    NoMoreQcb = 12,

    /// Queue is full
    QFull = 30,

    /// Priority already in use
    PrioExist = 40,
    /// Priority error
    PrioErr = 41,
    /// Invalid priority
    PrioInvalid = 42,
    /// Invalid stack
    StkInvalid = 45,
    /// Stack is below the configured minimum size
    StkSizeInvalid = 46,

    /// Semaphore count overflow
    SemOvf = 50,

    /// No more free task control blocks
    NoMoreTcb = 70,

    /// Task is not delayed
    TimeNotDly = 80,
    /// Invalid minutes argument
    TimeInvalidMinutes = 81,
    /// Invalid seconds argument
    TimeInvalidSeconds = 82,
    /// Invalid milliseconds argument
    TimeInvalidMilli = 83,
    /// Zero delay specified
    TimeZeroDly = 84,

    /// No task to suspend at the given priority
    TaskSuspendPrio = 90,
    /// Cannot suspend the idle task
    TaskSuspendIdle = 91,

    /// No task to resume at the given priority
    TaskResumePrio = 100,
    /// Task is not suspended
    TaskNotSuspended = 101,

    /// No free memory partition control blocks
    MemInvalidPart = 110,
    /// Partition must hold at least two blocks
    MemInvalidBlks = 111,
    /// Block size cannot hold a free-list link
    MemInvalidSize = 112,
    /// No free memory blocks in the partition
    MemNoFreeBlks = 113,
    /// All blocks already returned to the partition
    MemFull = 114,
    /// Invalid block pointer
    MemInvalidPblk = 115,
    /// Invalid partition handle
    MemInvalidPmem = 116,
    /// Invalid query destination
    MemInvalidPdata = 117,
    /// Invalid partition address
    MemInvalidAddr = 118,

    /// Cannot delete an object from an ISR
    DelIsr = 140,
    /// Cannot create an object from an ISR
    CreateIsr = 141,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    /// Stable numeric code of this error
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}
