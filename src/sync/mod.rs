//! Synchronization primitives
//!
//! Counting semaphores and message queues over the shared event wait-list
//! protocol.

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "q")]
pub mod queue;
