//! Shared infrastructure for `kernel/tests/*.rs` integration tests,
//! gated behind `feature = "testing"` per SPEC_FULL.md's ambient test
//! tooling section. Grounded on `doublegate-VeridianOS/kernel/src/
//! main.rs`'s `exit_qemu`/`QemuExitCode` pair (the `isa-debug-exit`
//! device at port 0xf4), lifted out of `main.rs` so both the kernel
//! binary's own `#[cfg(test)]` modules and the `tests/` integration
//! binaries can reach it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// On x86-64, writes `code` to the `isa-debug-exit` port QEMU was
/// started with (`-device isa-debug-exit,iobase=0xf4,iosize=0x04`); on
/// AArch64, uses the PSCI `SYSTEM_OFF` call QEMU's `virt` machine
/// exposes instead, since there is no `isa-debug-exit` analogue there.
/// Either way, this never returns.
#[cfg(feature = "qemu-exit")]
pub fn exit_qemu(code: QemuExitCode) -> ! {
    #[cfg(target_arch = "x86_64")]
    {
        use x86_64::instructions::port::Port;
        // SAFETY: 0xf4 is the fixed `isa-debug-exit` I/O port this test
        // harness's QEMU invocation is configured with.
        unsafe {
            let mut port: Port<u32> = Port::new(0xf4);
            port.write(code as u32);
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        let _ = code;
        // SAFETY: PSCI SYSTEM_OFF (function id 0x84000008) via HVC,
        // the standard QEMU `virt` shutdown path.
        unsafe {
            core::arch::asm!("mov w0, #0x84000008", "hvc #0", out("w0") _);
        }
    }
    unreachable!("QEMU exits the VM before returning here");
}

/// Run each test, printing a `name... [ok]` line per test, then exit
/// QEMU with success. A panicking test aborts the whole binary (this
/// kernel's panic handler halts), which integration-test harnesses
/// outside this workspace interpret as a failed run.
pub fn test_runner(tests: &[&dyn Fn()]) {
    crate::serial_println!("running {} tests", tests.len());
    for test in tests {
        test();
    }
    #[cfg(feature = "qemu-exit")]
    exit_qemu(QemuExitCode::Success);
}
