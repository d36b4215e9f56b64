//! Generic serial console used for early boot output and `log` records.

use core::fmt;

#[cfg(target_arch = "aarch64")]
pub struct Pl011Uart {
    base_addr: usize,
}

#[cfg(target_arch = "aarch64")]
impl Pl011Uart {
    pub const fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }
}

#[cfg(target_arch = "aarch64")]
impl fmt::Write for Pl011Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        const UARTDR: usize = 0x000;
        const UARTFR: usize = 0x018;
        const UARTFR_TXFF: u32 = 1 << 5;

        for byte in s.bytes() {
            // SAFETY: base_addr is the fixed QEMU `virt` PL011 MMIO window,
            // identity-mapped uncached by `mm::vmm::init_identity`.
            unsafe {
                while core::ptr::read_volatile((self.base_addr + UARTFR) as *const u32)
                    & UARTFR_TXFF
                    != 0
                {
                    core::hint::spin_loop();
                }
                core::ptr::write_volatile((self.base_addr + UARTDR) as *mut u8, byte);
            }
        }
        Ok(())
    }
}

#[cfg(target_arch = "aarch64")]
const PL011_BASE: usize = 0x0900_0000;

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}

/// Write a single raw byte to the console, used by the `put_char`/
/// `write` syscalls' `FileDescriptor::Console` backend. Bypasses the
/// `fmt::Write`/`format_args!` path so non-ASCII bytes are not
/// reinterpreted as UTF-8.
pub fn write_byte(byte: u8) {
    #[cfg(target_arch = "x86_64")]
    {
        use x86_64::instructions::interrupts;
        interrupts::without_interrupts(|| {
            // SAFETY: see `_serial_print`.
            let mut port = unsafe { uart_16550::SerialPort::new(0x3F8) };
            port.init();
            port.send(byte);
        });
    }

    #[cfg(target_arch = "aarch64")]
    {
        const UARTDR: usize = 0x000;
        const UARTFR: usize = 0x018;
        const UARTFR_TXFF: u32 = 1 << 5;
        // SAFETY: see `Pl011Uart::write_str`.
        unsafe {
            while core::ptr::read_volatile((PL011_BASE + UARTFR) as *const u32) & UARTFR_TXFF != 0 {
                core::hint::spin_loop();
            }
            core::ptr::write_volatile((PL011_BASE + UARTDR) as *mut u8, byte);
        }
    }
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    use fmt::Write;

    #[cfg(target_arch = "x86_64")]
    {
        use x86_64::instructions::interrupts;

        interrupts::without_interrupts(|| {
            // SAFETY: 0x3F8 is the standard COM1 I/O port; exclusive use is
            // guaranteed by routing every caller through this function with
            // interrupts disabled.
            let mut port = unsafe { uart_16550::SerialPort::new(0x3F8) };
            port.init();
            let _ = port.write_fmt(args);
        });
    }

    #[cfg(target_arch = "aarch64")]
    {
        let mut uart = Pl011Uart::new(PL011_BASE);
        let _ = uart.write_fmt(args);
    }
}
