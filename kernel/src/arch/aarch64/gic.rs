//! C5 — AArch64 GICv2 driver for the QEMU `virt` machine. Grounded on
//! `doublegate-VeridianOS/kernel/src/arch/aarch64/gic.rs` (distributor/
//! CPU-interface register layout, SGI/PPI/SPI id ranges, mask-everything-
//! then-enable sequence), trimmed of the teacher's `GlobalState`
//! indirection (this kernel is single-CPU and initializes the GIC no
//! earlier than the rest of C1, so a plain `spin::Mutex` suffices).

use spin::Mutex;

use crate::{
    error::{KernelError, KernelResult},
    mm::{vmm, PhysAddr, VirtAddr},
};

const GICD_BASE: usize = 0x0800_0000;
const GICC_BASE: usize = 0x0801_0000;

const GICD_CTLR: usize = 0x000;
const GICD_ISENABLER: usize = 0x100;
const GICD_IPRIORITYR: usize = 0x400;
const GICD_ITARGETSR: usize = 0x800;
const GICD_ICFGR: usize = 0xC00;

const GICC_CTLR: usize = 0x000;
const GICC_PMR: usize = 0x004;
const GICC_IAR: usize = 0x00C;
const GICC_EOIR: usize = 0x010;

const GIC_SPURIOUS_IRQ: u32 = 1023;
const DEFAULT_PRIORITY: u8 = 0xA0;

/// Physical timer PPI on QEMU `virt` (C6's interrupt source).
pub const TIMER_PPI: u32 = 30;

struct Gic;

impl Gic {
    fn gicd_write(&self, offset: usize, value: u32) {
        // SAFETY: GICD_BASE is identity-mapped uncached MMIO by `init`.
        unsafe { core::ptr::write_volatile((GICD_BASE + offset) as *mut u32, value) }
    }

    fn gicd_read(&self, offset: usize) -> u32 {
        // SAFETY: see `gicd_write`.
        unsafe { core::ptr::read_volatile((GICD_BASE + offset) as *const u32) }
    }

    fn gicc_write(&self, offset: usize, value: u32) {
        // SAFETY: GICC_BASE is identity-mapped uncached MMIO by `init`.
        unsafe { core::ptr::write_volatile((GICC_BASE + offset) as *mut u32, value) }
    }

    fn gicc_read(&self, offset: usize) -> u32 {
        // SAFETY: see `gicc_write`.
        unsafe { core::ptr::read_volatile((GICC_BASE + offset) as *const u32) }
    }
}

static GIC: Mutex<Option<Gic>> = Mutex::new(None);

pub fn init() {
    vmm::map_mmio(VirtAddr::new(GICD_BASE as u64), PhysAddr::new(GICD_BASE as u64), 0x1000);
    vmm::map_mmio(VirtAddr::new(GICC_BASE as u64), PhysAddr::new(GICC_BASE as u64), 0x1000);

    let gic = Gic;
    gic.gicd_write(GICD_CTLR, 0); // disable distributor while configuring

    // Mask every SPI, flat priority, target CPU0.
    for reg in (0..(1020 / 4)).step_by(1) {
        gic.gicd_write(GICD_IPRIORITYR + reg * 4, u32::from_le_bytes([DEFAULT_PRIORITY; 4]));
        gic.gicd_write(GICD_ITARGETSR + reg * 4, 0x0101_0101);
    }

    gic.gicd_write(GICD_CTLR, 1); // enable distributor

    gic.gicc_write(GICC_PMR, 0xFF); // accept all priorities
    gic.gicc_write(GICC_CTLR, 1); // enable CPU interface

    *GIC.lock() = Some(gic);
}

/// Enable a single interrupt id in the distributor (SGI/PPI/SPI id
/// space).
pub fn enable_irq(irq: u32) -> KernelResult<()> {
    let guard = GIC.lock();
    let gic = guard.as_ref().ok_or(KernelError::UnsupportedFeature {
        feature: "gic_not_initialized",
    })?;
    let reg = (irq / 32) as usize;
    let bit = irq % 32;
    gic.gicd_write(GICD_ISENABLER + reg * 4, 1 << bit);
    // Level-triggered for PPIs/SPIs by default (clearing the edge bits).
    if irq >= 16 {
        let cfg_reg = (irq / 16) as usize;
        let shift = (irq % 16) * 2;
        let cur = gic.gicd_read(GICD_ICFGR + cfg_reg * 4);
        gic.gicd_write(GICD_ICFGR + cfg_reg * 4, cur & !(0b11 << shift));
    }
    Ok(())
}

/// Acknowledge the highest-priority pending interrupt. Returns `None` on
/// the spurious id (no interrupt actually pending).
pub fn ack() -> Option<u32> {
    let guard = GIC.lock();
    let gic = guard.as_ref()?;
    let iar = gic.gicc_read(GICC_IAR);
    let irq = iar & 0x3FF;
    if irq == GIC_SPURIOUS_IRQ {
        None
    } else {
        Some(irq)
    }
}

/// Signal end-of-interrupt for `irq`, per spec.md §4.4's "EOIR on GIC"
/// handler contract.
pub fn send_eoi(irq: u32) {
    if let Some(gic) = GIC.lock().as_ref() {
        gic.gicc_write(GICC_EOIR, irq);
    }
}
