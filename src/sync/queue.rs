//! Message queues
//!
//! A queue is an event control block bound to a queue control block: a
//! bounded ring of pointer-sized messages over caller-supplied storage.
//! A post that finds a waiter hands the message straight into the
//! waiter's TCB and never enqueues, so a non-empty ring implies an empty
//! wait list.

use core::ptr;

use crate::config::CFG_PRIO_GRP_COUNT;
use crate::critical::critical_section;
use crate::core::event::{EcbKind, OsEventHandle};
use crate::error::{OsError, OsResult};
use crate::kernel::{self, OsState};
use crate::sched;
use crate::types::{opt, stat, EcbIdx, OsMsg, OsOpt, OsTick, QIdx, TcbIdx};

/// Queue control block
///
/// `in_idx` is the next write slot, `out_idx` the next read slot; both
/// wrap from `size` back to 0. The ring storage belongs to the caller.
pub struct OsQcb {
    pub(crate) start: *mut OsMsg,
    pub(crate) size: u16,
    pub(crate) in_idx: u16,
    pub(crate) out_idx: u16,
    pub(crate) entries: u16,
    pub(crate) next_free: Option<QIdx>,
}

unsafe impl Send for OsQcb {}
unsafe impl Sync for OsQcb {}

impl OsQcb {
    pub const fn new() -> Self {
        OsQcb {
            start: ptr::null_mut(),
            size: 0,
            in_idx: 0,
            out_idx: 0,
            entries: 0,
            next_free: None,
        }
    }

    fn bind(&mut self, start: *mut OsMsg, size: u16) {
        self.start = start;
        self.size = size;
        self.in_idx = 0;
        self.out_idx = 0;
        self.entries = 0;
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.entries >= self.size
    }

    /// Append at the back of the ring. The caller has checked for space.
    fn push_back(&mut self, msg: OsMsg) {
        // SAFETY: start/size describe storage the queue was bound to and
        // in_idx < size; mutation happens inside a critical section.
        unsafe { self.start.add(self.in_idx as usize).write(msg) };
        self.in_idx += 1;
        if self.in_idx == self.size {
            self.in_idx = 0;
        }
        self.entries += 1;
    }

    /// Insert at the front of the ring, so the next pop yields `msg`.
    fn push_front(&mut self, msg: OsMsg) {
        if self.out_idx == 0 {
            self.out_idx = self.size;
        }
        self.out_idx -= 1;
        // SAFETY: as in push_back; out_idx was just wrapped into range.
        unsafe { self.start.add(self.out_idx as usize).write(msg) };
        self.entries += 1;
    }

    /// Remove the oldest message. The caller has checked `entries > 0`.
    fn pop_front(&mut self) -> OsMsg {
        // SAFETY: as in push_back; out_idx < size and the slot was written.
        let msg = unsafe { self.start.add(self.out_idx as usize).read() };
        self.out_idx += 1;
        if self.out_idx == self.size {
            self.out_idx = 0;
        }
        self.entries -= 1;
        msg
    }

    /// Peek at the oldest message without removing it.
    fn front(&self) -> OsMsg {
        if self.entries == 0 {
            return ptr::null_mut();
        }
        // SAFETY: as in pop_front.
        unsafe { self.start.add(self.out_idx as usize).read() }
    }

    fn flush(&mut self) {
        self.in_idx = 0;
        self.out_idx = 0;
        self.entries = 0;
    }
}

/// Snapshot of a queue, produced by [`os_q_query`]
#[derive(Debug, Clone, Copy)]
pub struct OsQInfo {
    /// Next message to be delivered, or null when empty
    pub msg: OsMsg,
    pub entries: u16,
    pub size: u16,
    pub wait_grp: u8,
    pub wait_tbl: [u8; CFG_PRIO_GRP_COUNT],
}

/// Outcome of the first half of a pend
pub(crate) enum QPend {
    /// The ring held a message
    Msg(OsMsg),
    /// The caller was enrolled as a waiter and must block
    Blocked(TcbIdx),
}

fn q_index(st: &OsState, h: OsEventHandle) -> OsResult<(usize, usize)> {
    if !h.in_range() {
        return Err(OsError::EventNull);
    }
    match st.ecbs[h.index()].kind {
        EcbKind::Q { q } => Ok((h.index(), q as usize)),
        _ => Err(OsError::EventType),
    }
}

impl OsState {
    pub(crate) fn q_create_core(&mut self, start: *mut OsMsg, size: u16) -> OsResult<EcbIdx> {
        let Some(qi) = self.q_free else {
            return Err(OsError::NoMoreQcb);
        };

        let Some(e) = self.ecb_alloc(EcbKind::Q { q: qi }) else {
            return Err(OsError::NoMoreEcb);
        };

        self.q_free = self.queues[qi as usize].next_free;
        self.queues[qi as usize].next_free = None;
        self.queues[qi as usize].bind(start, size);
        Ok(e)
    }

    pub(crate) fn q_pend_start(&mut self, e: usize, q: usize, timeout: OsTick) -> OsResult<QPend> {
        if self.queues[q].entries > 0 {
            return Ok(QPend::Msg(self.queues[q].pop_front()));
        }

        let me = self.tcb_cur.ok_or(OsError::TaskNotExist)?;
        {
            let tcb = &mut self.tcbs[me as usize];
            tcb.stat |= stat::Q;
            tcb.dly = timeout;
        }
        self.event_task_wait(me, e as EcbIdx);
        Ok(QPend::Blocked(me))
    }

    pub(crate) fn q_pend_resolve(&mut self, me: TcbIdx, e: usize) -> OsResult<OsMsg> {
        let msg = self.tcbs[me as usize].msg;
        if !msg.is_null() {
            // A poster handed the message over directly
            let tcb = &mut self.tcbs[me as usize];
            tcb.msg = ptr::null_mut();
            tcb.stat = stat::RDY;
            tcb.event = None;
            return Ok(msg);
        }
        self.event_timeout(me, e as EcbIdx);
        Err(OsError::Timeout)
    }

    /// Shared post body. Waiters win over the ring; broadcast serves every
    /// waiter in priority order. Returns whether a reschedule is due.
    pub(crate) fn q_post_core(
        &mut self,
        e: usize,
        q: usize,
        msg: OsMsg,
        post_opt: OsOpt,
    ) -> OsResult<bool> {
        if !self.ecbs[e].wait.is_empty() {
            if post_opt & opt::POST_OPT_BROADCAST != 0 {
                while !self.ecbs[e].wait.is_empty() {
                    self.event_task_rdy(e as EcbIdx, msg, stat::Q);
                }
            } else {
                self.event_task_rdy(e as EcbIdx, msg, stat::Q);
            }
            return Ok(true);
        }

        if self.queues[q].is_full() {
            return Err(OsError::QFull);
        }
        if post_opt & opt::POST_OPT_FRONT != 0 {
            self.queues[q].push_front(msg);
        } else {
            self.queues[q].push_back(msg);
        }
        Ok(false)
    }

    pub(crate) fn q_del_core(&mut self, e: usize, q: usize, del_opt: OsOpt) -> OsResult<bool> {
        let waiting = !self.ecbs[e].wait.is_empty();
        match del_opt {
            opt::DEL_NO_PEND => {
                if waiting {
                    return Err(OsError::TaskWaiting);
                }
            }
            opt::DEL_ALWAYS => {
                while !self.ecbs[e].wait.is_empty() {
                    self.event_task_rdy(e as EcbIdx, ptr::null_mut(), stat::Q);
                }
            }
            _ => return Err(OsError::InvalidOpt),
        }

        self.queues[q].bind(ptr::null_mut(), 0);
        self.queues[q].next_free = self.q_free;
        self.q_free = Some(q as QIdx);
        self.ecb_release(e as EcbIdx);
        Ok(waiting)
    }
}

/// Create a message queue over caller-supplied storage.
///
/// The storage array's length is the queue capacity and must not exceed
/// `u16::MAX` slots.
pub fn os_q_create(storage: &'static mut [OsMsg]) -> OsResult<OsEventHandle> {
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(OsError::CreateIsr);
    }
    if storage.is_empty() || storage.len() > u16::MAX as usize {
        return Err(OsError::InvalidOpt);
    }

    let start = storage.as_mut_ptr();
    let size = storage.len() as u16;

    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let e = st.q_create_core(start, size)?;
        crate::trace!("queue created, slot {}, size {}", e, size);
        Ok(OsEventHandle(e))
    })
}

/// Pop the oldest message without blocking; `None` when the queue is empty.
pub fn os_q_accept(h: OsEventHandle) -> OsResult<Option<OsMsg>> {
    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let (_, q) = q_index(st, h)?;
        if st.queues[q].entries > 0 {
            Ok(Some(st.queues[q].pop_front()))
        } else {
            Ok(None)
        }
    })
}

/// Wait for a message.
///
/// `timeout` bounds the wait in ticks; 0 waits forever. A message posted
/// while waiting arrives through the TCB hand-off slot, bypassing the
/// ring entirely.
pub fn os_q_pend(h: OsEventHandle, timeout: OsTick) -> OsResult<OsMsg> {
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(OsError::PendIsr);
    }

    let flow = critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let (e, q) = q_index(st, h)?;
        st.q_pend_start(e, q, timeout)
    })?;

    let me = match flow {
        QPend::Msg(msg) => return Ok(msg),
        QPend::Blocked(me) => me,
    };

    sched::os_sched();

    critical_section(|cs| kernel::OS.get(cs).q_pend_resolve(me, h.index()))
}

fn post_with(h: OsEventHandle, msg: OsMsg, post_opt: OsOpt) -> OsResult<()> {
    if msg.is_null() {
        return Err(OsError::PostNullPtr);
    }

    let resched = critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let (e, q) = q_index(st, h)?;
        st.q_post_core(e, q, msg, post_opt)
    })?;

    if resched {
        sched::os_sched();
    }
    Ok(())
}

/// Post a message at the back of the queue (FIFO). ISR-safe.
pub fn os_q_post(h: OsEventHandle, msg: OsMsg) -> OsResult<()> {
    post_with(h, msg, opt::POST_OPT_NONE)
}

/// Post a priority message at the front of the queue (LIFO). ISR-safe.
pub fn os_q_post_front(h: OsEventHandle, msg: OsMsg) -> OsResult<()> {
    post_with(h, msg, opt::POST_OPT_FRONT)
}

/// Post with options: [`opt::POST_OPT_FRONT`] selects LIFO,
/// [`opt::POST_OPT_BROADCAST`] delivers to every current waiter.
pub fn os_q_post_opt(h: OsEventHandle, msg: OsMsg, post_opt: OsOpt) -> OsResult<()> {
    post_with(h, msg, post_opt)
}

/// Discard all queued messages. The stored pointers are not touched.
pub fn os_q_flush(h: OsEventHandle) -> OsResult<()> {
    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let (_, q) = q_index(st, h)?;
        st.queues[q].flush();
        Ok(())
    })
}

/// Delete the queue.
///
/// [`opt::DEL_NO_PEND`] fails with `TaskWaiting` while tasks pend;
/// [`opt::DEL_ALWAYS`] readies every waiter first, each resuming with a
/// timeout. Returns the queue and event control blocks to their pools.
pub fn os_q_del(h: OsEventHandle, del_opt: OsOpt) -> OsResult<()> {
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(OsError::DelIsr);
    }

    let resched = critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let (e, q) = q_index(st, h)?;
        st.q_del_core(e, q, del_opt)
    })?;

    if resched {
        sched::os_sched();
    }
    Ok(())
}

/// Snapshot the queue state and wait list.
pub fn os_q_query(h: OsEventHandle) -> OsResult<OsQInfo> {
    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let (e, q) = q_index(st, h)?;
        let (wait_grp, wait_tbl) = st.ecbs[e].wait.snapshot();
        Ok(OsQInfo {
            msg: st.queues[q].front(),
            entries: st.queues[q].entries,
            size: st.queues[q].size,
            wait_grp,
            wait_tbl,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CFG_PRIO_IDLE;
    use crate::types::OsPrio;

    fn state_with(prios: &[OsPrio]) -> OsState {
        let mut st = OsState::new();
        st.init();
        st.tcb_init("idle", CFG_PRIO_IDLE, ptr::null_mut(), ptr::null_mut(), 0, 0, ptr::null_mut(), 0)
            .unwrap();
        for &p in prios {
            st.tcb_init("t", p, ptr::null_mut(), ptr::null_mut(), 0, 0, ptr::null_mut(), 0)
                .unwrap();
        }
        let prio = st.rdy.highest();
        st.prio_cur = prio;
        st.tcb_cur = st.prio_tbl[prio as usize];
        st
    }

    fn msg(n: usize) -> OsMsg {
        n as OsMsg
    }

    #[test]
    fn test_fifo_order() {
        let mut st = state_with(&[10]);
        let mut slots = [ptr::null_mut(); 4];
        let (e, q) = {
            let e = st.q_create_core(slots.as_mut_ptr(), 4).unwrap() as usize;
            match st.ecbs[e].kind {
                EcbKind::Q { q } => (e, q as usize),
                _ => unreachable!(),
            }
        };

        for n in 1..=4 {
            st.q_post_core(e, q, msg(n), opt::POST_OPT_NONE).unwrap();
        }
        assert_eq!(
            st.q_post_core(e, q, msg(5), opt::POST_OPT_NONE),
            Err(OsError::QFull)
        );

        for n in 1..=4 {
            assert_eq!(st.queues[q].pop_front(), msg(n));
        }
        assert_eq!(st.queues[q].entries, 0);
    }

    #[test]
    fn test_lifo_order() {
        let mut st = state_with(&[10]);
        let mut slots = [ptr::null_mut(); 4];
        let e = st.q_create_core(slots.as_mut_ptr(), 4).unwrap() as usize;
        let q = match st.ecbs[e].kind {
            EcbKind::Q { q } => q as usize,
            _ => unreachable!(),
        };

        for n in 1..=3 {
            st.q_post_core(e, q, msg(n), opt::POST_OPT_FRONT).unwrap();
        }
        assert_eq!(st.queues[q].pop_front(), msg(3));
        assert_eq!(st.queues[q].pop_front(), msg(2));
        assert_eq!(st.queues[q].pop_front(), msg(1));
    }

    #[test]
    fn test_mixed_front_and_back_posts() {
        let mut st = state_with(&[10]);
        let mut slots = [ptr::null_mut(); 4];
        let e = st.q_create_core(slots.as_mut_ptr(), 4).unwrap() as usize;
        let q = match st.ecbs[e].kind {
            EcbKind::Q { q } => q as usize,
            _ => unreachable!(),
        };

        st.q_post_core(e, q, msg(0xA), opt::POST_OPT_NONE).unwrap();
        st.q_post_core(e, q, msg(0xB), opt::POST_OPT_FRONT).unwrap();
        st.q_post_core(e, q, msg(0xC), opt::POST_OPT_NONE).unwrap();

        assert_eq!(st.queues[q].pop_front(), msg(0xB));
        assert_eq!(st.queues[q].pop_front(), msg(0xA));
        assert_eq!(st.queues[q].pop_front(), msg(0xC));
    }

    #[test]
    fn test_post_hands_off_to_waiter_without_enqueueing() {
        let mut st = state_with(&[7, 20]);
        let mut slots = [ptr::null_mut(); 4];
        let e = st.q_create_core(slots.as_mut_ptr(), 4).unwrap() as usize;
        let q = match st.ecbs[e].kind {
            EcbKind::Q { q } => q as usize,
            _ => unreachable!(),
        };

        // T7 pends on the empty queue
        let QPend::Blocked(w) = st.q_pend_start(e, q, 0).unwrap() else {
            panic!("should block");
        };
        st.sched_core();

        // T20 posts: direct hand-off, ring untouched
        assert_eq!(st.q_post_core(e, q, msg(0x11), opt::POST_OPT_NONE), Ok(true));
        assert_eq!(st.queues[q].entries, 0);
        assert!(st.ecbs[e].wait.is_empty());

        assert_eq!(st.q_pend_resolve(w, e), Ok(msg(0x11)));

        // Subsequent posts with no waiter enqueue normally
        st.q_post_core(e, q, msg(0x22), opt::POST_OPT_NONE).unwrap();
        st.q_post_core(e, q, msg(0x33), opt::POST_OPT_NONE).unwrap();
        assert_eq!(st.queues[q].entries, 2);
        assert_eq!(st.queues[q].pop_front(), msg(0x22));
        assert_eq!(st.queues[q].pop_front(), msg(0x33));
    }

    #[test]
    fn test_broadcast_wakes_all_in_priority_order() {
        let mut st = state_with(&[4, 7, 9]);
        let mut slots = [ptr::null_mut(); 4];
        let e = st.q_create_core(slots.as_mut_ptr(), 4).unwrap() as usize;
        let q = match st.ecbs[e].kind {
            EcbKind::Q { q } => q as usize,
            _ => unreachable!(),
        };

        let mut waiters = [0; 3];
        for (n, _) in [4u8, 7, 9].iter().enumerate() {
            let QPend::Blocked(w) = st.q_pend_start(e, q, 0).unwrap() else {
                panic!("should block");
            };
            waiters[n] = w;
            st.sched_core();
        }
        assert_eq!(st.prio_cur, CFG_PRIO_IDLE);

        st.q_post_core(e, q, msg(0x77), opt::POST_OPT_BROADCAST).unwrap();
        assert!(st.ecbs[e].wait.is_empty());
        for p in [4u8, 7, 9] {
            assert!(st.rdy.contains(p));
        }

        // Scheduler picks the highest-priority waiter first
        st.sched_core();
        assert_eq!(st.prio_cur, 4);

        // Every waiter received the same message pointer
        for w in waiters {
            assert_eq!(st.q_pend_resolve(w, e), Ok(msg(0x77)));
        }
    }

    #[test]
    fn test_pend_timeout_leaves_ring_untouched() {
        let mut st = state_with(&[10]);
        let mut slots = [ptr::null_mut(); 2];
        let e = st.q_create_core(slots.as_mut_ptr(), 2).unwrap() as usize;
        let q = match st.ecbs[e].kind {
            EcbKind::Q { q } => q as usize,
            _ => unreachable!(),
        };

        let QPend::Blocked(me) = st.q_pend_start(e, q, 2).unwrap() else {
            panic!("should block");
        };
        for _ in 0..2 {
            let mut cursor = st.tcb_list;
            while let Some(i) = cursor {
                cursor = st.tick_one(i);
            }
        }
        assert_eq!(st.q_pend_resolve(me, e), Err(OsError::Timeout));
        assert_eq!(st.queues[q].entries, 0);
        assert!(st.ecbs[e].wait.is_empty());
    }

    #[test]
    fn test_flush_resets_ring() {
        let mut st = state_with(&[10]);
        let mut slots = [ptr::null_mut(); 4];
        let e = st.q_create_core(slots.as_mut_ptr(), 4).unwrap() as usize;
        let q = match st.ecbs[e].kind {
            EcbKind::Q { q } => q as usize,
            _ => unreachable!(),
        };

        st.q_post_core(e, q, msg(1), opt::POST_OPT_NONE).unwrap();
        st.q_post_core(e, q, msg(2), opt::POST_OPT_NONE).unwrap();
        st.queues[q].flush();
        assert_eq!(st.queues[q].entries, 0);

        st.q_post_core(e, q, msg(3), opt::POST_OPT_NONE).unwrap();
        assert_eq!(st.queues[q].pop_front(), msg(3));
    }

    #[test]
    fn test_del_returns_qcb_and_ecb_to_pools() {
        let mut st = state_with(&[10]);
        let mut slots = [ptr::null_mut(); 2];
        let e = st.q_create_core(slots.as_mut_ptr(), 2).unwrap() as usize;
        let q = match st.ecbs[e].kind {
            EcbKind::Q { q } => q,
            _ => unreachable!(),
        };

        st.q_del_core(e, q as usize, opt::DEL_NO_PEND).unwrap();
        assert!(matches!(st.ecbs[e].kind, EcbKind::Unused { .. }));
        assert_eq!(st.q_free, Some(q));
    }
}
