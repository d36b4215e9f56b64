//! C5 — x86-64 IDT setup and exception/IRQ handlers.
//!
//! Grounded on `doublegate-VeridianOS/kernel/src/arch/x86_64/idt.rs`
//! (`lazy_static!` IDT, `extern "x86-interrupt"` handlers, double-fault
//! IST), expanded per spec.md §4.4 to cover the full named exception set
//! (`#PF #GP #UD #DF #DE #NMI #BP`) and to route user-mode faults to task
//! termination instead of an unconditional panic (Open Question #2,
//! DESIGN.md).

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::{arch::x86_64::gdt, fault, sched};
use super::timer;

/// Vectors 32-47 carry hardware IRQs once the legacy PIC is masked and
/// the LAPIC/IOAPIC take over remapping, per spec.md §4.4.
pub const TIMER_VECTOR: u8 = 32;
pub const USB_VECTOR: u8 = 33;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(generic_exception_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        // SAFETY: IST index 0 was reserved for exactly this handler by
        // `gdt::init`; a double fault must run on a known-good stack.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt[TIMER_VECTOR as usize].set_handler_fn(timer_interrupt_handler);
        idt[USB_VECTOR as usize].set_handler_fn(usb_interrupt_handler);
        idt
    };
}

pub fn init() {
    IDT.load();
}

/// A fault is "in user mode" iff the saved CS has RPL 3. Per Open
/// Question #2 (DESIGN.md), user-mode faults terminate only the faulting
/// task; kernel-mode faults are always fatal.
fn is_user_mode(frame: &InterruptStackFrame) -> bool {
    (frame.code_segment.0 & 0x3) == 3
}

fn handle_fault(name: &'static str, frame: &InterruptStackFrame, error_code: u64) {
    if is_user_mode(frame) {
        log::warn!("user fault {name} at rip={:#x}, terminating task", frame.instruction_pointer.as_u64());
        sched::scheduler::terminate_current_and_reschedule();
    } else {
        fault::kernel_fatal(&fault::ExceptionContext {
            name,
            rip: frame.instruction_pointer.as_u64(),
            error_code,
        });
    }
}

extern "x86-interrupt" fn divide_error_handler(frame: InterruptStackFrame) {
    handle_fault("#DE", &frame, 0);
}

extern "x86-interrupt" fn generic_exception_handler(frame: InterruptStackFrame) {
    handle_fault("#DB", &frame, 0);
}

extern "x86-interrupt" fn nmi_handler(frame: InterruptStackFrame) {
    handle_fault("#NMI", &frame, 0);
}

extern "x86-interrupt" fn breakpoint_handler(frame: InterruptStackFrame) {
    log::info!("breakpoint at {:#x}", frame.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn invalid_opcode_handler(frame: InterruptStackFrame) {
    handle_fault("#UD", &frame, 0);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    frame: InterruptStackFrame,
    error_code: u64,
) {
    handle_fault("#GP", &frame, error_code);
}

extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    handle_fault("#PF", &frame, error_code.bits());
}

extern "x86-interrupt" fn double_fault_handler(
    frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    fault::kernel_fatal(&fault::ExceptionContext {
        name: "#DF",
        rip: frame.instruction_pointer.as_u64(),
        error_code,
    });
}

extern "x86-interrupt" fn timer_interrupt_handler(_frame: InterruptStackFrame) {
    timer::on_tick();
    super::apic::send_eoi();
}

extern "x86-interrupt" fn usb_interrupt_handler(_frame: InterruptStackFrame) {
    // USB (xHCI) is an external collaborator (spec.md §1); the core only
    // needs to acknowledge the controller-reserved vector so it does not
    // appear to be spuriously firing.
    super::apic::send_eoi();
}
