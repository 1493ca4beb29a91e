//! Cortex-M port
//!
//! Context switching via the PendSV exception: both the task-level and
//! the interrupt-level switch pend PendSV, which runs at the lowest
//! exception priority once every other ISR has unwound.

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;

use crate::core::hooks;
use crate::kernel::{KERNEL, CPU_STATE};
use crate::task::OsTaskFn;
use crate::types::{OsOpt, OsStkElement};

/// Interrupt stack for MSP
#[no_mangle]
static mut INTERRUPT_STACK: [u64; 256] = [0; 256];

/// Initialize the SysTick timer to fire once per kernel tick.
pub fn os_cpu_systick_init(reload: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(reload - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Start the highest-priority ready task. Never returns control to the
/// caller: the first PendSV loads that task's context.
#[no_mangle]
pub unsafe extern "C" fn os_start_high_rdy() {
    unsafe {
        let mut scb = cortex_m::Peripherals::steal().SCB;

        // PendSV and SysTick at the lowest exception priority
        scb.set_priority(SystemHandler::PendSV, 0xF0);
        scb.set_priority(SystemHandler::SysTick, 0xF0);

        // Dedicate the MSP to exception handling
        let msp_top = (&raw const INTERRUPT_STACK) as u32
            + core::mem::size_of::<[u64; 256]>() as u32;

        asm!("msr msp, {0}", in(reg) msp_top);
        asm!("msr psp, {0}", in(reg) 0);

        // First switch has no outgoing context to save
        CPU_STATE.tcb_cur = core::ptr::null_mut();

        hooks::task_sw();
        KERNEL.set_running(true);

        cortex_m::interrupt::enable();
        cortex_m::peripheral::SCB::set_pendsv();
    }
}

/// Trigger a context switch from task level
#[inline(always)]
pub fn os_ctx_sw() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Trigger a context switch from interrupt level. The interrupted context
/// is already on the process stack, so this is also just a PendSV pend;
/// the switch happens after the ISR unwinds.
#[inline(always)]
pub fn os_int_ctx_sw() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Context frame as laid down by PendSV on the process stack
#[repr(C, align(4))]
struct CtxFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

const CTX_FRAME_WORDS: usize = 17;

/// Build the initial fake-interrupt frame so the first switch into the
/// task "returns" into its entry function.
pub unsafe fn os_task_stk_init(
    task: OsTaskFn,
    arg: *mut (),
    stk_base: *mut OsStkElement,
    stk_size: usize,
    _opt: OsOpt,
) -> *mut OsStkElement {
    unsafe {
        let stk_top = stk_base.add(stk_size);
        let stk_aligned = ((stk_top as usize) & !7) as *mut u32;

        let frame = stk_aligned.sub(CTX_FRAME_WORDS) as *mut CtxFrame;

        (*frame) = CtxFrame {
            r4: 0x0404_0404,
            r5: 0x0505_0505,
            r6: 0x0606_0606,
            r7: 0x0707_0707,
            r8: 0x0808_0808,
            r9: 0x0909_0909,
            r10: 0x1010_1010,
            r11: 0x1111_1111,
            exc_return: 0xFFFF_FFFD,
            r0: arg as u32,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: os_task_return as *const () as u32,
            pc: (task as usize as u32) | 1,
            xpsr: 0x0100_0000,
        };

        // One word below the frame, matching PendSV's "add r0, r0, #4"
        (frame as *mut u32).sub(1) as *mut OsStkElement
    }
}

/// Called from PendSV to swap the TCB pointers. Saves the outgoing stack
/// pointer, advances `tcb_cur` to the switch target and returns the new
/// stack pointer.
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_switch_context(cur_sp: *mut u32) -> *mut u32 {
    unsafe {
        let cur = CPU_STATE.tcb_cur;
        if !cur.is_null() {
            (*cur).stk_ptr = cur_sp;
        }

        hooks::task_sw();

        CPU_STATE.tcb_cur = CPU_STATE.tcb_high_rdy;

        let new = CPU_STATE.tcb_cur;
        if new.is_null() {
            core::ptr::null_mut()
        } else {
            (*new).stk_ptr
        }
    }
}

/// PendSV exception handler - performs the full context switch
///
/// 1. Save R4-R11, LR to the current task's PSP (skipped for the first task)
/// 2. Call [`pendsv_switch_context`] to swap TCB pointers
/// 3. Restore R4-R11, LR from the new task's stack
/// 4. Exception return
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "dsb",
        "isb",

        "mrs r0, psp",

        "ldr r1, ={cpu_state}",
        "ldr r1, [r1]",
        "cbz r1, 1f",

        "stmdb r0!, {{r4-r11, lr}}",

        "sub r0, r0, #4",

        "1:",
        "bl pendsv_switch_context",

        "cbz r0, 2f",
        "add r0, r0, #4",
        "ldmia r0!, {{r4-r11, lr}}",

        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",

        "bx lr",

        cpu_state = sym CPU_STATE,
    );
}

/// Landing pad for a task entry function that returns
#[no_mangle]
fn os_task_return() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
