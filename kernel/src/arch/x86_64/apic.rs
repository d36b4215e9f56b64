//! C5/C6 — Local APIC + I/O APIC interrupt controller and LAPIC timer
//! source, grounded on
//! `doublegate-VeridianOS/kernel/src/arch/x86_64/apic.rs` (register
//! offset constants, `RedirectionEntry` bitfield, mask-everything-then-
//! enable sequence), simplified from the teacher's higher-half
//! `phys_to_virt` translation to this kernel's identity mapping (MMIO
//! phys address == virt address once `mm::vmm::map_mmio` runs).

use spin::Mutex;
use x86_64::instructions::port::Port;

use crate::{
    error::{KernelError, KernelResult},
    mm::{vmm, PhysAddr, VirtAddr},
};

const LAPIC_ID: usize = 0x020;
const LAPIC_EOI: usize = 0x0B0;
const LAPIC_SVR: usize = 0x0F0;
const LAPIC_LVT_TIMER: usize = 0x320;
const LAPIC_LVT_LINT0: usize = 0x350;
const LAPIC_LVT_LINT1: usize = 0x360;
const LAPIC_LVT_ERROR: usize = 0x370;
const LAPIC_TIMER_INIT: usize = 0x380;
const LAPIC_TIMER_CUR: usize = 0x390;
const LAPIC_TIMER_DIV: usize = 0x3E0;

const IOAPIC_REGSEL: usize = 0x00;
const IOAPIC_REGWIN: usize = 0x10;
const IOAPIC_REDTBL_BASE: u32 = 0x10;

const IA32_APIC_BASE_MSR: u32 = 0x1B;

struct Apic {
    lapic_base: usize,
    ioapic_base: usize,
}

impl Apic {
    fn lapic_read(&self, offset: usize) -> u32 {
        // SAFETY: `lapic_base` is identity-mapped uncached MMIO installed
        // by `map_mmio` below before this is ever called.
        unsafe { core::ptr::read_volatile((self.lapic_base + offset) as *const u32) }
    }

    fn lapic_write(&self, offset: usize, value: u32) {
        // SAFETY: see `lapic_read`.
        unsafe { core::ptr::write_volatile((self.lapic_base + offset) as *mut u32, value) }
    }

    fn ioapic_write(&self, reg: u32, value: u32) {
        // SAFETY: `ioapic_base` is identity-mapped uncached MMIO.
        unsafe {
            core::ptr::write_volatile((self.ioapic_base + IOAPIC_REGSEL) as *mut u32, reg);
            core::ptr::write_volatile((self.ioapic_base + IOAPIC_REGWIN) as *mut u32, value);
        }
    }
}

static APIC: Mutex<Option<Apic>> = Mutex::new(None);

/// Disable the legacy 8259 PIC by masking every IRQ line, per spec.md
/// §4.4 ("IOAPIC remap of legacy PIC, which is first disabled").
fn disable_legacy_pic() {
    // SAFETY: 0x21/0xA1 are the standard master/slave 8259 data ports;
    // this runs once, during single-threaded C5 bring-up.
    unsafe {
        let mut master: Port<u8> = Port::new(0x21);
        let mut slave: Port<u8> = Port::new(0xA1);
        master.write(0xFFu8);
        slave.write(0xFFu8);
    }
}

pub fn init() {
    disable_legacy_pic();

    // SAFETY: reading a documented model-specific register.
    let apic_base_msr = unsafe { x86_64::registers::model_specific::Msr::new(IA32_APIC_BASE_MSR).read() };
    let lapic_phys = apic_base_msr & 0xFFFF_F000;

    // QEMU's default IOAPIC MMIO base; identity-mapped alongside the
    // LAPIC by the same `map_mmio` call a real platform would derive
    // from ACPI MADT (ACPI table parsing is out of this core's scope).
    const IOAPIC_PHYS: u64 = 0xFEC0_0000;

    vmm::map_mmio(VirtAddr::new(lapic_phys), PhysAddr::new(lapic_phys), 0x1000);
    vmm::map_mmio(VirtAddr::new(IOAPIC_PHYS), PhysAddr::new(IOAPIC_PHYS), 0x1000);

    let apic = Apic {
        lapic_base: lapic_phys as usize,
        ioapic_base: IOAPIC_PHYS as usize,
    };

    // Mask every IOAPIC redirection entry before routing anything.
    for irq in 0..24u32 {
        let low = IOAPIC_REDTBL_BASE + irq * 2;
        apic.ioapic_write(low, 1 << 16); // masked
    }

    apic.lapic_write(LAPIC_LVT_LINT0, 1 << 16);
    apic.lapic_write(LAPIC_LVT_LINT1, 1 << 16);
    apic.lapic_write(LAPIC_LVT_ERROR, 1 << 16);

    // Software-enable the LAPIC with spurious vector 0xFF.
    apic.lapic_write(LAPIC_SVR, 0x100 | 0xFF);

    *APIC.lock() = Some(apic);
}

pub fn send_eoi() {
    if let Some(apic) = APIC.lock().as_ref() {
        apic.lapic_write(LAPIC_EOI, 0);
    }
}

pub fn read_id() -> u32 {
    APIC.lock().as_ref().map_or(0, |a| a.lapic_read(LAPIC_ID) >> 24)
}

/// Program the LAPIC timer for periodic ticks. `divide` is one of the
/// architecture's encoded divide values (1 == divide-by-1 == 0b1011);
/// `initial_count` is chosen by `arch::x86_64::timer::init` to yield
/// spec.md §4.5's default 10 ms interval.
pub fn setup_timer(vector: u8, divide: u32, initial_count: u32) -> KernelResult<()> {
    let guard = APIC.lock();
    let apic = guard.as_ref().ok_or(KernelError::UnsupportedFeature {
        feature: "apic_not_initialized",
    })?;
    apic.lapic_write(LAPIC_TIMER_DIV, divide);
    // Periodic mode (bit 17) | vector.
    apic.lapic_write(LAPIC_LVT_TIMER, (1 << 17) | vector as u32);
    apic.lapic_write(LAPIC_TIMER_INIT, initial_count);
    Ok(())
}

pub fn stop_timer() {
    if let Some(apic) = APIC.lock().as_ref() {
        apic.lapic_write(LAPIC_TIMER_INIT, 0);
    }
}

pub fn current_timer_count() -> u32 {
    APIC.lock().as_ref().map_or(0, |a| a.lapic_read(LAPIC_TIMER_CUR))
}
