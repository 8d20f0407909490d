/// Interrupt Descriptor Table (IDT) and interrupt handlers.
///
/// The IDT tells the CPU which function to call for each interrupt:
///   - 0-31: CPU exceptions (divide by zero, page fault, double fault, etc.)
///   - 32-47: Hardware interrupts (remapped from PIC: timer, etc.)
///   - 0x80: software reschedule trap, see `task::context::trigger_reschedule`.
///
/// The PIC 8259 manages hardware interrupts. We remap IRQs 0-7 from
/// IDT entries 8-15 to 32-47 to avoid colliding with CPU exceptions.

use crate::gdt;
use crate::hlt_loop;
use core::sync::atomic::{AtomicU64, Ordering};
use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::VirtAddr;

pub static TICK_COUNT: AtomicU64 = AtomicU64::new(0);

// 8254 PIT constants
const PIT_OSCILLATOR_HZ: u32 = 1_193_182;

/// Timer tick rate. Bounded at build time: too low and sleep/time-slice
/// granularity becomes unusable, too high and the divisor underflows the
/// PIT's 16-bit channel register.
pub const TIMER_FREQ: u32 = 100;
const _: () = assert!(TIMER_FREQ >= 19 && TIMER_FREQ <= 1000);

const PIT_COMMAND_PORT: u16 = 0x43;
const PIT_CHANNEL0_PORT: u16 = 0x40;

/// Configure the 8254 PIT to fire at `TIMER_FREQ` Hz.
pub fn init_pit() {
    let divisor: u16 = (PIT_OSCILLATOR_HZ / TIMER_FREQ) as u16;
    unsafe {
        Port::new(PIT_COMMAND_PORT).write(0x36u8);
        Port::new(PIT_CHANNEL0_PORT).write((divisor & 0xFF) as u8);
        Port::new(PIT_CHANNEL0_PORT).write((divisor >> 8) as u8);
    }
}

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// Vector for the software reschedule trap (`int 0x80`). Chosen well clear
/// of both the CPU exception range and the PIC's remapped 32-47 range.
pub const RESCHEDULE_VECTOR: u8 = 0x80;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
}

// --- IDT setup ---

static IDT: spin::Once<InterruptDescriptorTable> = spin::Once::new();

pub fn init_idt() {
    let idt = IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.page_fault.set_handler_fn(page_fault_handler);
        unsafe {
            idt[InterruptIndex::Timer as u8]
                .set_handler_addr(VirtAddr::new(crate::task::context::timer_isr_addr()));
            idt[RESCHEDULE_VECTOR]
                .set_handler_addr(VirtAddr::new(crate::task::context::reschedule_isr_addr()));
        }
        idt
    });
    idt.load();
}

// --- CPU Exception Handlers ---

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    crate::serial_println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    crate::serial_println!("EXCEPTION: PAGE FAULT");
    crate::serial_println!("Accessed Address: {:?}", Cr2::read());
    crate::serial_println!("Error Code: {:?}", error_code);
    crate::serial_println!("{:#?}", stack_frame);
    hlt_loop();
}

// --- Hardware Interrupt Handlers ---

/// Called from the raw timer ISR assembly stub. Receives the current
/// stack frame, returns the frame to resume (possibly a different
/// thread's, if the time slice expired).
#[no_mangle]
extern "C" fn timer_tick_handler(
    frame: *mut crate::task::context::InterruptFrame,
) -> *mut crate::task::context::InterruptFrame {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed);

    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Timer as u8);
    }

    if !crate::task::scheduler::is_enabled() {
        return frame;
    }

    let should_yield = crate::task::scheduler::thread_tick();
    crate::task::sleep::wake_expired();

    if should_yield {
        return crate::task::scheduler::expire_time_slice(frame);
    }

    frame
}
