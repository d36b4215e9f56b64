//! C6 — AArch64 generic timer, tied to the GICv2 physical-timer PPI.
//! Grounded on `doublegate-VeridianOS/kernel/src/arch/aarch64/timer.rs`
//! (CNTFRQ_EL0/CNTP_TVAL_EL0/CNTP_CTL_EL0 programming), mirroring the
//! x86-64 LAPIC timer's periodic-reload contract so C8 sees the same
//! `ticks`/`on_tick` shape regardless of architecture.

use core::arch::asm;
use core::sync::atomic::{AtomicU64, Ordering};

use super::gic;

/// Target tick period, matching `arch::x86_64::timer::DEFAULT_INTERVAL_MS`.
const DEFAULT_INTERVAL_MS: u64 = 10;

static TICKS: AtomicU64 = AtomicU64::new(0);
static RELOAD: AtomicU64 = AtomicU64::new(0);

fn read_cntfrq() -> u64 {
    let freq: u64;
    // SAFETY: CNTFRQ_EL0 is readable from EL1, no side effects.
    unsafe { asm!("mrs {0}, cntfrq_el0", out(reg) freq) };
    freq
}

fn write_cntp_tval(ticks: u64) {
    // SAFETY: CNTP_TVAL_EL0 is writable from EL1, reprograms the
    // one-shot countdown only.
    unsafe { asm!("msr cntp_tval_el0, {0}", in(reg) ticks) };
}

fn write_cntp_ctl(value: u64) {
    // SAFETY: CNTP_CTL_EL0 is writable from EL1.
    unsafe { asm!("msr cntp_ctl_el0, {0}", in(reg) value) };
}

pub fn init() {
    let freq = read_cntfrq();
    let reload = freq / 1000 * DEFAULT_INTERVAL_MS;
    RELOAD.store(reload.max(1), Ordering::Relaxed);

    gic::enable_irq(gic::TIMER_PPI).expect("GIC must be initialized before the timer");

    write_cntp_tval(reload.max(1));
    write_cntp_ctl(1); // ENABLE=1, IMASK=0
}

/// Called from the IRQ vector on every physical-timer PPI. Reprograms the
/// next one-shot deadline (the generic timer has no periodic mode),
/// advances the shared tick counter, and hands off to the scheduler.
pub fn on_tick() {
    write_cntp_tval(RELOAD.load(Ordering::Relaxed));
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::scheduler::on_tick();
}

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

pub fn sleep_ms(ms: u64) {
    let target = ticks() + ms / DEFAULT_INTERVAL_MS.max(1) + 1;
    while ticks() < target {
        core::hint::spin_loop();
    }
}
