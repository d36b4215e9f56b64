//! C6 — x86-64 timer source: the LAPIC timer, calibrated against the
//! legacy PIT (channel 0) once at boot, then reprogrammed in periodic
//! mode for the interval spec.md §4.5 specifies (`interval_ms`, default
//! 10).

use core::sync::atomic::{AtomicU64, Ordering};

use x86_64::instructions::port::Port;

use super::apic;

static TICKS: AtomicU64 = AtomicU64::new(0);

pub const DEFAULT_INTERVAL_MS: u32 = 10;

/// PIT runs at ~1.193182 MHz; a one-shot count of 11932 is ~10 ms.
const PIT_FREQUENCY_HZ: u32 = 1_193_182;

/// Calibrate by letting the LAPIC timer free-run (divide-by-16, masked)
/// across one PIT one-shot of `calibration_ms`, then derive the
/// initial-count that yields `interval_ms` in periodic mode.
fn calibrate(calibration_ms: u32) -> u32 {
    const LAPIC_DIVIDE_16: u32 = 0b0011;
    let _ = apic::setup_timer(super::idt::TIMER_VECTOR, LAPIC_DIVIDE_16, u32::MAX);

    let pit_count = (PIT_FREQUENCY_HZ as u64 * calibration_ms as u64 / 1000) as u16;
    // SAFETY: standard PIT channel-0 one-shot programming sequence,
    // executed once during single-threaded timer bring-up.
    unsafe {
        let mut cmd: Port<u8> = Port::new(0x43);
        let mut data: Port<u8> = Port::new(0x40);
        cmd.write(0b0011_0000u8); // channel 0, lo/hi byte, mode 0 (one-shot)
        data.write((pit_count & 0xFF) as u8);
        data.write((pit_count >> 8) as u8);

        // Busy-wait for the PIT to count down to 0: poll the readback
        // status (mode 0 clears its output bit on terminal count).
        let mut status_cmd: Port<u8> = Port::new(0x43);
        loop {
            status_cmd.write(0xE2u8); // read-back, channel 0, status
            let status: u8 = data.read();
            if status & 0x80 != 0 {
                break;
            }
        }
    }

    let elapsed = u32::MAX - apic::current_timer_count();
    apic::stop_timer();
    ((elapsed as u64) * DEFAULT_INTERVAL_MS as u64 / calibration_ms as u64) as u32
}

pub fn init() {
    let initial_count = calibrate(10).max(1);
    const LAPIC_DIVIDE_16: u32 = 0b0011;
    let _ = apic::setup_timer(super::idt::TIMER_VECTOR, LAPIC_DIVIDE_16, initial_count);
}

/// Called from the timer IRQ handler: advances the monotone tick counter
/// and invokes the scheduler's preemption hook, per spec.md §4.5/§4.7.
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::scheduler::on_tick();
}

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Busy-wait on `ticks()` while interrupts are enabled, per spec.md §4.5
/// ("the core does not require a timer-wheel").
pub fn sleep_ms(n: u64) {
    let target = ticks() + n.div_ceil(DEFAULT_INTERVAL_MS as u64);
    while ticks() < target {
        core::hint::spin_loop();
    }
}
