//! Event control blocks and the wait-list protocol
//!
//! An ECB is one synchronization object: a counting semaphore or a message
//! queue, plus a bitmap of the priorities blocked on it. The three protocol
//! operations here are shared by every event kind; they are parameterized
//! on the status bit of the kind, not type-dispatched.

use core::ptr;

use crate::config::CFG_MAX_EVENTS;
use crate::kernel::OsState;
use crate::prio::PrioBitmap;
use crate::types::{stat, EcbIdx, OsMsg, OsPrio, OsStatus, TcbIdx};

#[cfg(feature = "q")]
use crate::types::QIdx;

/// What an event control block currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcbKind {
    /// On the free list
    Unused { next_free: Option<EcbIdx> },
    /// Counting semaphore
    Sem { count: crate::types::OsSemCtr },
    /// Message queue, owning a queue control block
    #[cfg(feature = "q")]
    Q { q: QIdx },
}

/// Event control block
pub struct OsEcb {
    pub(crate) kind: EcbKind,
    /// Priorities of the tasks blocked on this event
    pub(crate) wait: PrioBitmap,
}

impl OsEcb {
    pub const fn new() -> Self {
        OsEcb {
            kind: EcbKind::Unused { next_free: None },
            wait: PrioBitmap::new(),
        }
    }
}

/// Opaque handle to a pooled event control block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsEventHandle(pub(crate) EcbIdx);

impl OsEventHandle {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Check that the handle designates a slot in the pool
    #[inline]
    pub(crate) fn in_range(self) -> bool {
        (self.0 as usize) < CFG_MAX_EVENTS
    }
}

impl OsState {
    /// Allocate an ECB from the free list and give it a kind.
    pub(crate) fn ecb_alloc(&mut self, kind: EcbKind) -> Option<EcbIdx> {
        let i = self.ecb_free?;
        self.ecb_free = match self.ecbs[i as usize].kind {
            EcbKind::Unused { next_free } => next_free,
            _ => None,
        };
        self.ecbs[i as usize].kind = kind;
        self.ecbs[i as usize].wait = PrioBitmap::new();
        Some(i)
    }

    /// Return an ECB to the free list.
    pub(crate) fn ecb_release(&mut self, e: EcbIdx) {
        self.ecbs[e as usize].kind = EcbKind::Unused {
            next_free: self.ecb_free,
        };
        self.ecb_free = Some(e);
    }

    /// Enroll the given task as a waiter on event `e`.
    ///
    /// Clears the task from the ready set and sets its bit in the event's
    /// wait list. The caller has already set the status bit for the event
    /// kind and loaded the timeout into the delay field.
    pub(crate) fn event_task_wait(&mut self, cur: TcbIdx, e: EcbIdx) {
        let tcb = &mut self.tcbs[cur as usize];
        tcb.event = Some(e);
        let (y, bit_y, bit_x) = (tcb.y, tcb.bit_y, tcb.bit_x);

        self.rdy.clear(y, bit_y, bit_x);
        self.ecbs[e as usize].wait.set(y, bit_y, bit_x);
    }

    /// Wake the highest-priority waiter on event `e`.
    ///
    /// Removes it from the wait list, delivers `msg` into its pending slot,
    /// clears the `mask` status bit, and inserts it into the ready set when
    /// no other status bit (e.g. suspension) remains. Returns the waiter's
    /// priority. The wait list must not be empty.
    pub(crate) fn event_task_rdy(&mut self, e: EcbIdx, msg: OsMsg, mask: OsStatus) -> OsPrio {
        let prio = {
            let wait = &mut self.ecbs[e as usize].wait;
            let prio = wait.highest();
            wait.remove(prio);
            prio
        };

        if let Some(t) = self.prio_tbl[prio as usize] {
            let tcb = &mut self.tcbs[t as usize];
            tcb.dly = 0;
            tcb.event = None;
            tcb.msg = msg;
            tcb.stat &= !mask;
            let (ready, y, bit_y, bit_x) = (tcb.is_ready(), tcb.y, tcb.bit_y, tcb.bit_x);
            if ready {
                self.rdy.set(y, bit_y, bit_x);
            }
        }

        prio
    }

    /// Clean up after the given task's wait on `e` timed out.
    ///
    /// The tick engine has already made the task ready; this removes its
    /// stale wait-list bit and resets its status.
    pub(crate) fn event_timeout(&mut self, cur: TcbIdx, e: EcbIdx) {
        let (y, bit_y, bit_x) = {
            let tcb = &self.tcbs[cur as usize];
            (tcb.y, tcb.bit_y, tcb.bit_x)
        };
        self.ecbs[e as usize].wait.clear(y, bit_y, bit_x);

        let tcb = &mut self.tcbs[cur as usize];
        tcb.stat = stat::RDY;
        tcb.event = None;
        tcb.msg = ptr::null_mut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::OsState;
    use crate::types::stat;

    fn fresh_state_with(prios: &[OsPrio]) -> OsState {
        let mut st = OsState::new();
        st.init();
        for &p in prios {
            st.tcb_init("t", p, core::ptr::null_mut(), core::ptr::null_mut(), 0, 0, core::ptr::null_mut(), 0)
                .unwrap();
        }
        st
    }

    #[test]
    fn test_wait_moves_task_between_bitmaps() {
        let mut st = fresh_state_with(&[10]);
        let t = st.prio_tbl[10].unwrap();
        let e = st.ecb_alloc(EcbKind::Sem { count: 0 }).unwrap();

        assert!(st.rdy.contains(10));
        st.tcbs[t as usize].stat |= stat::SEM;
        st.event_task_wait(t, e);

        assert!(!st.rdy.contains(10));
        assert!(st.ecbs[e as usize].wait.contains(10));
        assert_eq!(st.tcbs[t as usize].event, Some(e));
    }

    #[test]
    fn test_rdy_wakes_highest_priority_waiter() {
        let mut st = fresh_state_with(&[9, 4, 7]);
        let e = st.ecb_alloc(EcbKind::Sem { count: 0 }).unwrap();

        for p in [9u8, 4, 7] {
            let t = st.prio_tbl[p as usize].unwrap();
            st.tcbs[t as usize].stat |= stat::SEM;
            st.event_task_wait(t, e);
        }

        let prio = st.event_task_rdy(e, core::ptr::null_mut(), stat::SEM);
        assert_eq!(prio, 4);
        assert!(st.rdy.contains(4));
        assert!(!st.ecbs[e as usize].wait.contains(4));
        assert!(st.ecbs[e as usize].wait.contains(7));
        assert!(st.ecbs[e as usize].wait.contains(9));

        let t4 = st.prio_tbl[4].unwrap();
        assert!(st.tcbs[t4 as usize].is_ready());
        assert_eq!(st.tcbs[t4 as usize].event, None);
    }

    #[test]
    fn test_rdy_holds_back_suspended_waiter() {
        let mut st = fresh_state_with(&[6]);
        let t = st.prio_tbl[6].unwrap();
        let e = st.ecb_alloc(EcbKind::Sem { count: 0 }).unwrap();

        st.tcbs[t as usize].stat |= stat::SEM | stat::SUSPEND;
        st.event_task_wait(t, e);
        st.event_task_rdy(e, core::ptr::null_mut(), stat::SEM);

        // Woken but still suspended: not in the ready set
        assert!(!st.rdy.contains(6));
        assert_eq!(st.tcbs[t as usize].stat, stat::SUSPEND);
    }

    #[test]
    fn test_timeout_cleanup() {
        let mut st = fresh_state_with(&[12]);
        let t = st.prio_tbl[12].unwrap();
        let e = st.ecb_alloc(EcbKind::Sem { count: 0 }).unwrap();

        st.tcbs[t as usize].stat |= stat::SEM;
        st.event_task_wait(t, e);

        st.event_timeout(t, e);
        assert!(!st.ecbs[e as usize].wait.contains(12));
        assert!(st.tcbs[t as usize].is_ready());
        assert_eq!(st.tcbs[t as usize].event, None);
    }

    #[test]
    fn test_ecb_pool_exhaustion_and_reuse() {
        let mut st = fresh_state_with(&[]);

        let mut last = 0;
        let mut allocated = 0;
        while let Some(i) = st.ecb_alloc(EcbKind::Sem { count: 0 }) {
            last = i;
            allocated += 1;
        }
        assert_eq!(allocated, CFG_MAX_EVENTS);

        st.ecb_release(last);
        let again = st.ecb_alloc(EcbKind::Sem { count: 1 }).unwrap();
        assert_eq!(again, last);
    }
}
