//! Scheduler
//!
//! Task-level scheduling point. The ISR-exit reschedule lives in
//! [`os_int_exit`](crate::kernel::os_int_exit); the two paths share the
//! decision logic below but trigger different port primitives, because
//! only the ISR path already has the interrupted context on the stack.

use crate::critical::critical_section;
use crate::kernel::{self, OsState, CPU_STATE};

impl OsState {
    /// Decide whether a context switch is due and commit the bookkeeping.
    ///
    /// Picks the highest-priority ready task; when it differs from the
    /// current one, records it as both high-ready and current, counts the
    /// switch and returns true. The caller publishes the switch target to
    /// [`CPU_STATE`] and triggers the port primitive; the register-level
    /// save/restore happens there.
    pub(crate) fn sched_core(&mut self) -> bool {
        let prio = self.rdy.highest();
        if prio == self.prio_cur {
            return false;
        }
        let Some(high) = self.prio_tbl[prio as usize] else {
            return false;
        };

        self.prio_high_rdy = prio;
        self.tcb_high_rdy = Some(high);
        self.ctx_sw_ctr = self.ctx_sw_ctr.wrapping_add(1);
        self.prio_cur = prio;
        self.tcb_cur = Some(high);
        true
    }
}

/// Task-level scheduling point.
///
/// Called by every service that may have changed task readiness. Does
/// nothing inside an ISR (the ISR-exit path reschedules instead) or while
/// the scheduler is locked.
pub fn os_sched() {
    if !kernel::KERNEL.is_running() {
        return;
    }

    critical_section(|cs| {
        if kernel::KERNEL.int_nesting() != 0 || kernel::KERNEL.lock_nesting() != 0 {
            return;
        }
        let st = kernel::OS.get(cs);
        if st.sched_core() {
            if let Some(i) = st.tcb_high_rdy {
                unsafe {
                    CPU_STATE.tcb_high_rdy = st.tcb_ptr(i);
                }
                crate::port::os_ctx_sw();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CFG_PRIO_IDLE;
    use crate::types::OsPrio;
    use core::ptr;

    fn state_with(prios: &[OsPrio]) -> OsState {
        let mut st = OsState::new();
        st.init();
        for &p in prios {
            st.tcb_init("t", p, ptr::null_mut(), ptr::null_mut(), 0, 0, ptr::null_mut(), 0)
                .unwrap();
        }
        st
    }

    fn start(st: &mut OsState) {
        let prio = st.rdy.highest();
        st.prio_cur = prio;
        st.prio_high_rdy = prio;
        st.tcb_cur = st.prio_tbl[prio as usize];
        st.tcb_high_rdy = st.tcb_cur;
    }

    #[test]
    fn test_no_switch_when_current_is_highest() {
        let mut st = state_with(&[CFG_PRIO_IDLE, 5]);
        start(&mut st);

        assert_eq!(st.prio_cur, 5);
        assert!(!st.sched_core());
        assert_eq!(st.ctx_sw_ctr, 0);
    }

    #[test]
    fn test_switch_to_newly_readied_higher_prio() {
        let mut st = state_with(&[CFG_PRIO_IDLE, 20]);
        start(&mut st);
        assert_eq!(st.prio_cur, 20);

        st.tcb_init("hi", 5, ptr::null_mut(), ptr::null_mut(), 0, 0, ptr::null_mut(), 0)
            .unwrap();

        assert!(st.sched_core());
        assert_eq!(st.prio_cur, 5);
        assert_eq!(st.tcb_cur, st.prio_tbl[5]);
        assert_eq!(st.ctx_sw_ctr, 1);
    }

    #[test]
    fn test_blocking_current_falls_back_to_next_ready() {
        let mut st = state_with(&[CFG_PRIO_IDLE, 8, 30]);
        start(&mut st);
        assert_eq!(st.prio_cur, 8);

        // Simulate the running task leaving the ready set
        let t = st.prio_tbl[8].unwrap();
        let (y, by, bx) = {
            let tcb = &st.tcbs[t as usize];
            (tcb.y, tcb.bit_y, tcb.bit_x)
        };
        st.rdy.clear(y, by, bx);

        assert!(st.sched_core());
        assert_eq!(st.prio_cur, 30);
    }
}
