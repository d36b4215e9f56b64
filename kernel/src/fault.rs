//! The kernel-fatal path (spec.md §6 "Exit codes / kernel panic", §9
//! "Exceptions / panics"). A single `fn kernel_fatal(..) -> !` that
//! disables interrupts, paints the framebuffer red, logs full context to
//! the serial console, and halts forever. No reboot is attempted.
//!
//! Actual glyph/text rendering onto the framebuffer is a non-goal (font
//! rendering, spec.md §1); the banner's structured context always reaches
//! the serial console, and the framebuffer gets a solid red fill as the
//! visual signal a real console/graphics collaborator would render text
//! over.

use crate::{arch, boot_info::BootInfo, serial_println};

/// CPU context captured at the point of a fatal exception.
pub struct ExceptionContext {
    pub name: &'static str,
    pub rip: u64,
    pub error_code: u64,
}

static mut PANIC_FRAMEBUFFER: Option<(u64, u32, u32, u32, u32)> = None;

/// Record the framebuffer geometry from `BootInfo` so the fatal path can
/// paint it without threading `BootInfo` through every call site.
pub fn set_framebuffer(boot_info: &BootInfo) {
    // SAFETY: called once, single-threaded, during C1 bring-up.
    unsafe {
        PANIC_FRAMEBUFFER = Some((
            boot_info.framebuffer_base,
            boot_info.framebuffer_size,
            boot_info.pitch,
            boot_info.height,
            boot_info.pixel_format,
        ));
    }
}

/// The kernel-fatal path: disables IRQs, paints the framebuffer
/// red-on-black, writes the context to serial, and halts. Never returns.
pub fn kernel_fatal(ctx: &ExceptionContext) -> ! {
    arch::disable_interrupts();

    serial_println!(
        "EXCEPTION: {}\nRIP={:#018x}  ERR={:#018x}",
        ctx.name,
        ctx.rip,
        ctx.error_code
    );

    paint_red();

    arch::halt()
}

fn paint_red() {
    // SAFETY: `PANIC_FRAMEBUFFER` is written once before any fault can
    // occur and read-only thereafter; we are past the point where any
    // other CPU state matters (interrupts are already disabled).
    let fb = unsafe { PANIC_FRAMEBUFFER };
    if let Some((base, size, _pitch, _height, pixel_format)) = fb {
        let red: u32 = if pixel_format == 0 {
            0x00FF_0000
        } else {
            0x0000_00FF
        };
        let pixels = (size / 4) as usize;
        // SAFETY: base..+size is the framebuffer region, identity-mapped
        // uncached MMIO by `mm::vmm::init_identity`.
        let fb_ptr = base as *mut u32;
        for i in 0..pixels {
            unsafe { core::ptr::write_volatile(fb_ptr.add(i), red) };
        }
    }
}
