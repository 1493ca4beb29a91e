//! Time management
//!
//! The tick engine and the delay services. A platform timer (SysTick on
//! Cortex-M) drives [`os_time_tick`] once per tick; the engine walks the
//! all-tasks list and counts down every nonzero delay, readying tasks as
//! their delays and pend timeouts expire.

use crate::config::{CFG_PRIO_IDLE, CFG_TICKS_PER_SEC};
use crate::critical::critical_section;
use crate::core::hooks;
use crate::error::{OsError, OsResult};
use crate::kernel::{self, OsState};
use crate::sched;
use crate::types::{stat, OsPrio, OsTick, TcbIdx};

impl OsState {
    /// Process one TCB of the tick walk.
    ///
    /// Decrements a nonzero delay; on expiry, readies the task unless it
    /// is suspended, in which case the delay parks at 1 so the wake is
    /// re-examined once the suspension is lifted. A timed-out event waiter
    /// is readied here but left in the event's wait list; it removes
    /// itself when it next runs. Returns the next TCB to visit, or `None`
    /// when the idle task ends the walk.
    pub(crate) fn tick_one(&mut self, i: TcbIdx) -> Option<TcbIdx> {
        let tcb = &mut self.tcbs[i as usize];
        if tcb.prio == CFG_PRIO_IDLE {
            return None;
        }
        let next = tcb.next;

        if tcb.dly > 0 {
            tcb.dly -= 1;
            if tcb.dly == 0 {
                if tcb.stat & stat::SUSPEND == 0 {
                    let (y, bit_y, bit_x) = (tcb.y, tcb.bit_y, tcb.bit_x);
                    self.rdy.set(y, bit_y, bit_x);
                } else {
                    tcb.dly = 1;
                }
            }
        }

        next
    }
}

/// Process one system tick.
///
/// Normally called from the tick ISR between [`os_int_enter`]
/// (`crate::kernel::os_int_enter`) and `os_int_exit`, but may also be
/// called from a high-priority task. The walk re-opens the critical
/// section for every TCB to bound the interrupt-off time.
pub fn os_time_tick() {
    hooks::tick();

    kernel::KERNEL.time_inc();

    if !kernel::KERNEL.is_running() {
        return;
    }

    let mut cursor = critical_section(|cs| kernel::OS.get(cs).tcb_list);
    while let Some(i) = cursor {
        cursor = critical_section(|cs| kernel::OS.get(cs).tick_one(i));
    }
}

/// Delay the calling task for `ticks` system ticks.
///
/// A zero tick count, or a call from an ISR, does nothing.
pub fn os_time_dly(ticks: OsTick) {
    if ticks == 0 || kernel::KERNEL.int_nesting() > 0 || !kernel::KERNEL.is_running() {
        return;
    }

    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        if let Some(i) = st.tcb_cur {
            let (y, bit_y, bit_x) = {
                let tcb = &st.tcbs[i as usize];
                (tcb.y, tcb.bit_y, tcb.bit_x)
            };
            st.rdy.clear(y, bit_y, bit_x);
            st.tcbs[i as usize].dly = ticks;
        }
    });

    sched::os_sched();
}

/// Delay the calling task for hours, minutes, seconds and milliseconds.
pub fn os_time_dly_hmsm(hours: u8, minutes: u8, seconds: u8, milli: u16) -> OsResult<()> {
    if minutes > 59 {
        return Err(OsError::TimeInvalidMinutes);
    }
    if seconds > 59 {
        return Err(OsError::TimeInvalidSeconds);
    }
    if milli > 999 {
        return Err(OsError::TimeInvalidMilli);
    }
    if hours == 0 && minutes == 0 && seconds == 0 && milli == 0 {
        return Err(OsError::TimeZeroDly);
    }

    let seconds_total =
        (hours as u32) * 3600 + (minutes as u32) * 60 + (seconds as u32);
    let ticks = seconds_total * CFG_TICKS_PER_SEC + (milli as u32) * CFG_TICKS_PER_SEC / 1000;

    os_time_dly(ticks);
    Ok(())
}

/// Cut short another task's delay.
///
/// The task becomes ready immediately unless it is suspended. A task that
/// was pending with a timeout resumes and observes the timeout.
pub fn os_time_dly_resume(prio: OsPrio) -> OsResult<()> {
    if prio as usize > crate::config::CFG_LOWEST_PRIO {
        return Err(OsError::PrioInvalid);
    }

    let resched = critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let Some(i) = st.prio_tbl[prio as usize] else {
            return Err(OsError::TaskNotExist);
        };
        if st.tcbs[i as usize].dly == 0 {
            return Err(OsError::TimeNotDly);
        }
        st.tcbs[i as usize].dly = 0;

        if st.tcbs[i as usize].stat & stat::SUSPEND == 0 {
            let (y, bit_y, bit_x) = {
                let tcb = &st.tcbs[i as usize];
                (tcb.y, tcb.bit_y, tcb.bit_x)
            };
            st.rdy.set(y, bit_y, bit_x);
            Ok(true)
        } else {
            Ok(false)
        }
    })?;

    if resched {
        sched::os_sched();
    }
    Ok(())
}

/// Current value of the 32-bit tick counter
#[inline]
pub fn os_time_get() -> OsTick {
    kernel::KERNEL.time_get()
}

/// Set the 32-bit tick counter
#[inline]
pub fn os_time_set(ticks: OsTick) {
    kernel::KERNEL.time_set(ticks);
}

/// SysTick interrupt handler
#[cfg(target_arch = "arm")]
#[no_mangle]
pub extern "C" fn SysTick() {
    kernel::os_int_enter();
    os_time_tick();
    kernel::os_int_exit();
}
