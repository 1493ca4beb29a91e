//! Counting semaphores
//!
//! A semaphore is an event control block whose kind carries the count.
//! The resource is available while the count is positive; a pend on an
//! empty semaphore enrolls the caller in the ECB wait list and blocks.

use core::ptr;

use crate::config::CFG_PRIO_GRP_COUNT;
use crate::critical::critical_section;
use crate::core::event::{EcbKind, OsEventHandle};
use crate::error::{OsError, OsResult};
use crate::kernel::{self, OsState};
use crate::sched;
use crate::types::{opt, stat, EcbIdx, OsOpt, OsSemCtr, OsTick, TcbIdx};

/// Snapshot of a semaphore, produced by [`os_sem_query`]
#[derive(Debug, Clone, Copy)]
pub struct OsSemInfo {
    pub count: OsSemCtr,
    pub wait_grp: u8,
    pub wait_tbl: [u8; CFG_PRIO_GRP_COUNT],
}

/// Outcome of the first half of a pend
pub(crate) enum SemPend {
    /// The count was positive; the caller holds the resource
    Acquired,
    /// The caller was enrolled as a waiter and must block
    Blocked(TcbIdx),
}

fn sem_index(st: &OsState, h: OsEventHandle) -> OsResult<usize> {
    if !h.in_range() {
        return Err(OsError::EventNull);
    }
    match st.ecbs[h.index()].kind {
        EcbKind::Sem { .. } => Ok(h.index()),
        _ => Err(OsError::EventType),
    }
}

impl OsState {
    pub(crate) fn sem_pend_start(&mut self, e: usize, timeout: OsTick) -> OsResult<SemPend> {
        if let EcbKind::Sem { ref mut count } = self.ecbs[e].kind {
            if *count > 0 {
                *count -= 1;
                return Ok(SemPend::Acquired);
            }
        } else {
            return Err(OsError::EventType);
        }

        let me = self.tcb_cur.ok_or(OsError::TaskNotExist)?;
        {
            let tcb = &mut self.tcbs[me as usize];
            tcb.stat |= stat::SEM;
            tcb.dly = timeout;
        }
        self.event_task_wait(me, e as EcbIdx);
        Ok(SemPend::Blocked(me))
    }

    pub(crate) fn sem_pend_resolve(&mut self, me: TcbIdx, e: usize) -> OsResult<()> {
        if self.tcbs[me as usize].stat & stat::SEM != 0 {
            // Still marked waiting: the wake came from the tick engine
            self.event_timeout(me, e as EcbIdx);
            return Err(OsError::Timeout);
        }
        self.tcbs[me as usize].event = None;
        Ok(())
    }

    pub(crate) fn sem_post_core(&mut self, e: usize) -> OsResult<bool> {
        if !self.ecbs[e].wait.is_empty() {
            self.event_task_rdy(e as EcbIdx, ptr::null_mut(), stat::SEM);
            return Ok(true);
        }
        if let EcbKind::Sem { ref mut count } = self.ecbs[e].kind {
            if *count == OsSemCtr::MAX {
                return Err(OsError::SemOvf);
            }
            *count += 1;
            Ok(false)
        } else {
            Err(OsError::EventType)
        }
    }

    pub(crate) fn sem_del_core(&mut self, e: usize, del_opt: OsOpt) -> OsResult<bool> {
        let waiting = !self.ecbs[e].wait.is_empty();
        match del_opt {
            opt::DEL_NO_PEND => {
                if waiting {
                    return Err(OsError::TaskWaiting);
                }
                self.ecb_release(e as EcbIdx);
                Ok(false)
            }
            opt::DEL_ALWAYS => {
                while !self.ecbs[e].wait.is_empty() {
                    self.event_task_rdy(e as EcbIdx, ptr::null_mut(), stat::SEM);
                }
                self.ecb_release(e as EcbIdx);
                Ok(waiting)
            }
            _ => Err(OsError::InvalidOpt),
        }
    }
}

/// Create a semaphore with the given initial count.
pub fn os_sem_create(count: OsSemCtr) -> OsResult<OsEventHandle> {
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(OsError::CreateIsr);
    }

    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let i = st
            .ecb_alloc(EcbKind::Sem { count })
            .ok_or(OsError::NoMoreEcb)?;
        crate::trace!("sem created, slot {}", i);
        Ok(OsEventHandle(i))
    })
}

/// Take the semaphore without blocking.
///
/// Returns the count found; when positive, one unit was consumed. A zero
/// return means the resource was unavailable.
pub fn os_sem_accept(h: OsEventHandle) -> OsResult<OsSemCtr> {
    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let e = sem_index(st, h)?;
        if let EcbKind::Sem { ref mut count } = st.ecbs[e].kind {
            let before = *count;
            if *count > 0 {
                *count -= 1;
            }
            Ok(before)
        } else {
            Err(OsError::EventType)
        }
    })
}

/// Wait on the semaphore.
///
/// `timeout` bounds the wait in ticks; 0 waits forever. Returns
/// `Err(Timeout)` when the wait expired and `Err(PendIsr)` from an ISR.
pub fn os_sem_pend(h: OsEventHandle, timeout: OsTick) -> OsResult<()> {
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(OsError::PendIsr);
    }

    let flow = critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let e = sem_index(st, h)?;
        st.sem_pend_start(e, timeout)
    })?;

    let me = match flow {
        SemPend::Acquired => return Ok(()),
        SemPend::Blocked(me) => me,
    };

    sched::os_sched();

    critical_section(|cs| kernel::OS.get(cs).sem_pend_resolve(me, h.index()))
}

/// Signal the semaphore.
///
/// Wakes the highest-priority waiter if any, otherwise increments the
/// count. ISR-safe: the reschedule is deferred to the ISR-exit path.
pub fn os_sem_post(h: OsEventHandle) -> OsResult<()> {
    let resched = critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let e = sem_index(st, h)?;
        st.sem_post_core(e)
    })?;

    if resched {
        sched::os_sched();
    }
    Ok(())
}

/// Delete the semaphore.
///
/// [`opt::DEL_NO_PEND`] fails with `TaskWaiting` while tasks pend;
/// [`opt::DEL_ALWAYS`] readies every waiter first.
pub fn os_sem_del(h: OsEventHandle, del_opt: OsOpt) -> OsResult<()> {
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(OsError::DelIsr);
    }

    let resched = critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let e = sem_index(st, h)?;
        st.sem_del_core(e, del_opt)
    })?;

    if resched {
        sched::os_sched();
    }
    Ok(())
}

/// Snapshot the semaphore count and wait list.
pub fn os_sem_query(h: OsEventHandle) -> OsResult<OsSemInfo> {
    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let e = sem_index(st, h)?;
        let count = match st.ecbs[e].kind {
            EcbKind::Sem { count } => count,
            _ => return Err(OsError::EventType),
        };
        let (wait_grp, wait_tbl) = st.ecbs[e].wait.snapshot();
        Ok(OsSemInfo {
            count,
            wait_grp,
            wait_tbl,
        })
    })
}
