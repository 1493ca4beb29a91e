//! Task management
//!
//! Task creation draws a TCB from the kernel pool and builds the initial
//! stack frame through the port layer. Priorities are unique: one task per
//! priority, lower number wins.

mod tcb;

pub use tcb::OsTcb;

use core::ptr;

use crate::config::{CFG_ARG_CHK_EN, CFG_LOWEST_PRIO, CFG_PRIO_IDLE, CFG_STK_SIZE_MIN};
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel::{self, OsState};
use crate::sched;
use crate::types::{stat, OsOpt, OsPrio, OsStkElement, TcbIdx, PRIO_SELF};

/// Task entry point function type
pub type OsTaskFn = fn(*mut ()) -> !;

/// Create a task.
///
/// The stack is a caller-supplied static array; the kernel builds a fake
/// interrupt frame at its top so the first context switch can "return"
/// into the task.
///
/// # Example
/// ```ignore
/// static mut WORKER_STK: [OsStkElement; 256] = [0; 256];
///
/// fn worker(_: *mut ()) -> ! {
///     loop { /* ... */ }
/// }
///
/// os_task_create("worker", worker, core::ptr::null_mut(),
///                unsafe { &mut *(&raw mut WORKER_STK) }, 12)?;
/// ```
pub fn os_task_create(
    name: &'static str,
    task: OsTaskFn,
    arg: *mut (),
    stack: &'static mut [OsStkElement],
    prio: OsPrio,
) -> OsResult<()> {
    os_task_create_ext(name, task, arg, stack, prio, 0, ptr::null_mut(), 0)
}

/// Create a task with id, extension pointer and options.
#[allow(clippy::too_many_arguments)]
pub fn os_task_create_ext(
    name: &'static str,
    task: OsTaskFn,
    arg: *mut (),
    stack: &'static mut [OsStkElement],
    prio: OsPrio,
    id: u16,
    ext: *mut (),
    opt: OsOpt,
) -> OsResult<()> {
    if CFG_ARG_CHK_EN {
        if prio as usize > CFG_LOWEST_PRIO {
            return Err(OsError::PrioInvalid);
        }
        if stack.len() < CFG_STK_SIZE_MIN {
            return Err(OsError::StkSizeInvalid);
        }
    }
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(OsError::CreateIsr);
    }

    let base = stack.as_mut_ptr();
    let len = stack.len();

    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        if st.prio_tbl[prio as usize].is_some() {
            return Err(OsError::PrioExist);
        }

        let sp = unsafe { crate::port::os_task_stk_init(task, arg, base, len, opt) };
        st.tcb_init(name, prio, sp, base, len, id, ext, opt)?;
        Ok(())
    })?;

    crate::trace!("task created, prio {}", prio);

    if kernel::KERNEL.is_running() {
        sched::os_sched();
    }
    Ok(())
}

impl OsState {
    /// Resolve a priority argument to a TCB, honoring [`PRIO_SELF`].
    fn resolve_prio(&self, prio: OsPrio) -> Option<(TcbIdx, bool)> {
        if prio == PRIO_SELF {
            let i = self.tcb_cur?;
            Some((i, true))
        } else {
            let i = self.prio_tbl[prio as usize]?;
            Some((i, self.tcb_cur == Some(i)))
        }
    }

    pub(crate) fn task_suspend_core(&mut self, prio: OsPrio) -> OsResult<bool> {
        let Some((i, is_self)) = self.resolve_prio(prio) else {
            return Err(OsError::TaskSuspendPrio);
        };

        let (y, bit_y, bit_x) = {
            let tcb = &mut self.tcbs[i as usize];
            tcb.stat |= stat::SUSPEND;
            (tcb.y, tcb.bit_y, tcb.bit_x)
        };
        // Harmless if the task was not in the ready set
        self.rdy.clear(y, bit_y, bit_x);

        Ok(is_self)
    }

    pub(crate) fn task_resume_core(&mut self, prio: OsPrio) -> OsResult<bool> {
        let Some(i) = self.prio_tbl[prio as usize] else {
            return Err(OsError::TaskResumePrio);
        };
        if self.tcbs[i as usize].stat & stat::SUSPEND == 0 {
            return Err(OsError::TaskNotSuspended);
        }

        let tcb = &mut self.tcbs[i as usize];
        tcb.stat &= !stat::SUSPEND;
        let runnable = tcb.is_ready() && tcb.dly == 0;
        let (y, bit_y, bit_x) = (tcb.y, tcb.bit_y, tcb.bit_x);
        if runnable {
            self.rdy.set(y, bit_y, bit_x);
        }
        Ok(runnable)
    }
}

/// Suspend a task, or the calling task with [`PRIO_SELF`].
///
/// Suspension composes with delays and event waits; the task will not run
/// again until [`os_task_resume`] clears it.
pub fn os_task_suspend(prio: OsPrio) -> OsResult<()> {
    if CFG_ARG_CHK_EN && prio != PRIO_SELF && prio as usize > CFG_LOWEST_PRIO {
        return Err(OsError::PrioInvalid);
    }
    if prio == CFG_PRIO_IDLE {
        return Err(OsError::TaskSuspendIdle);
    }

    let is_self = critical_section(|cs| kernel::OS.get(cs).task_suspend_core(prio))?;

    if is_self {
        sched::os_sched();
    }
    Ok(())
}

/// Resume a suspended task.
pub fn os_task_resume(prio: OsPrio) -> OsResult<()> {
    if CFG_ARG_CHK_EN && prio as usize > CFG_LOWEST_PRIO {
        return Err(OsError::PrioInvalid);
    }

    let runnable = critical_section(|cs| kernel::OS.get(cs).task_resume_core(prio))?;

    if runnable {
        sched::os_sched();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_suspend_removes_from_ready_set() {
        let mut st = state_with(&[10]);
        assert!(st.rdy.contains(10));

        assert_eq!(st.task_suspend_core(10), Ok(false));
        assert!(!st.rdy.contains(10));
        let i = st.prio_tbl[10].unwrap();
        assert!(st.tcbs[i as usize].is_suspended());
    }

    #[test]
    fn test_resume_requires_suspension() {
        let mut st = state_with(&[10]);
        assert_eq!(st.task_resume_core(10), Err(OsError::TaskNotSuspended));
        assert_eq!(st.task_resume_core(11), Err(OsError::TaskResumePrio));
    }

    #[test]
    fn test_resume_readies_only_undelayed_task() {
        let mut st = state_with(&[10]);
        let i = st.prio_tbl[10].unwrap();

        st.task_suspend_core(10).unwrap();
        st.tcbs[i as usize].dly = 4;

        // Still delayed: resume clears the suspension but not readiness
        assert_eq!(st.task_resume_core(10), Ok(false));
        assert!(!st.rdy.contains(10));

        st.tcbs[i as usize].dly = 0;
        st.task_suspend_core(10).unwrap();
        assert_eq!(st.task_resume_core(10), Ok(true));
        assert!(st.rdy.contains(10));
    }

    #[test]
    fn test_suspend_self_reports_reschedule() {
        let mut st = state_with(&[10]);
        st.prio_cur = 10;
        st.tcb_cur = st.prio_tbl[10];

        assert_eq!(st.task_suspend_core(PRIO_SELF), Ok(true));
        assert!(!st.rdy.contains(10));
    }
}
