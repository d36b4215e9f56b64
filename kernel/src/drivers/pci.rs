//! PCI configuration-space access, needed to find the NVMe controller's
//! BAR0 before C10 can talk to it. Grounded on
//! `doublegate-VeridianOS/kernel/src/drivers/pci.rs`'s config-space
//! read/write pair, x86-64-only here since this kernel's AArch64 target
//! (QEMU `virt`) is not given a PCIe ECAM window by `BootInfo` and so
//! only the x86-64 NVMe path is exercised in practice.

use x86_64::instructions::port::Port;

const CONFIG_ADDRESS: u16 = 0xCF8;
const CONFIG_DATA: u16 = 0xCFC;

const CLASS_MASS_STORAGE: u8 = 0x01;
const SUBCLASS_NVM: u8 = 0x08;
const PROG_IF_NVME: u8 = 0x02;

fn config_address(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    1u32 << 31
        | (bus as u32) << 16
        | (device as u32) << 11
        | (function as u32) << 8
        | (offset as u32 & 0xFC)
}

fn read_config_u32(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    // SAFETY: 0xCF8/0xCFC are the architectural PCI configuration ports;
    // this sequence (write address, read data) is the standard
    // mechanism-#1 access pattern.
    unsafe {
        let mut addr_port: Port<u32> = Port::new(CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(CONFIG_DATA);
        addr_port.write(config_address(bus, device, function, offset));
        data_port.read()
    }
}

fn write_config_u32(bus: u8, device: u8, function: u8, offset: u8, value: u32) {
    // SAFETY: see `read_config_u32`.
    unsafe {
        let mut addr_port: Port<u32> = Port::new(CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(CONFIG_DATA);
        addr_port.write(config_address(bus, device, function, offset));
        data_port.write(value);
    }
}

pub struct PciDevice {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciDevice {
    /// Read BAR0, handling the 64-bit-BAR case (bit 2 of the low dword
    /// set) by combining it with BAR1.
    pub fn bar0(&self) -> u64 {
        let low = read_config_u32(self.bus, self.device, self.function, 0x10);
        if low & 0b0110 == 0b0100 {
            let high = read_config_u32(self.bus, self.device, self.function, 0x14);
            ((high as u64) << 32) | (low & !0xF) as u64
        } else {
            (low & !0xF) as u64
        }
    }

    /// Set the bus-master and memory-space enable bits in the command
    /// register, required before the device can perform DMA.
    pub fn enable_bus_mastering(&self) {
        let offset = 0x04;
        let cmd = read_config_u32(self.bus, self.device, self.function, offset);
        write_config_u32(self.bus, self.device, self.function, offset, cmd | 0b110);
    }
}

/// Brute-force scan of bus 0 (sufficient for QEMU's flat topology) for
/// the first NVMe controller (class 01h, subclass 08h, prog-if 02h).
pub fn find_nvme_controller() -> Option<PciDevice> {
    for device in 0..32u8 {
        let vendor_dword = read_config_u32(0, device, 0, 0x00);
        if vendor_dword & 0xFFFF == 0xFFFF {
            continue;
        }
        let class_dword = read_config_u32(0, device, 0, 0x08);
        let class = ((class_dword >> 24) & 0xFF) as u8;
        let subclass = ((class_dword >> 16) & 0xFF) as u8;
        let prog_if = ((class_dword >> 8) & 0xFF) as u8;
        if class == CLASS_MASS_STORAGE && subclass == SUBCLASS_NVM && prog_if == PROG_IF_NVME {
            return Some(PciDevice {
                bus: 0,
                device,
                function: 0,
            });
        }
    }
    None
}
