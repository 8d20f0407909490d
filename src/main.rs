#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]

extern crate alloc;

use alloc::string::String;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;

#[allow(deprecated)]
pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config.kernel_stack_size = 512 * 1024; // 512 KiB (default 80 KiB is too small)
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    kernel::serial::init();
    kernel::serial_println!("Serial initialized");

    kernel::init();
    kernel::serial_println!("GDT, IDT, PICs initialized");

    let phys_mem_offset = x86_64::VirtAddr::new(
        boot_info
            .physical_memory_offset
            .into_option()
            .expect("physical_memory_offset not available"),
    );

    let mut mapper = unsafe { kernel::memory::init(phys_mem_offset) };
    let mut frame_allocator =
        unsafe { kernel::memory::BootInfoFrameAllocator::init(&boot_info.memory_regions) };

    kernel::allocator::init_heap(&mut mapper, &mut frame_allocator)
        .expect("heap initialization failed");
    kernel::serial_println!("Heap initialized");

    kernel::interrupts::init_pit();
    kernel::serial_println!("PIT configured at 100 Hz");

    kernel::task::thread::system_init();
    kernel::serial_println!("Thread table initialized");

    spawn_demo_threads();

    kernel::task::scheduler::system_start();
    kernel::serial_println!("Scheduler started, preemption enabled");

    kernel::hlt_loop();
}

/// Spawns a handful of threads that exercise strict-priority preemption
/// and tick-driven sleep, purely as a boot-time demonstration — the real
/// coverage lives in `tests/`.
fn spawn_demo_threads() {
    use kernel::task::thread;

    thread::create(String::from("low"), 20, low_priority_worker, 0)
        .expect("low priority demo thread must spawn");
    thread::create(String::from("high"), 50, high_priority_worker, 0)
        .expect("high priority demo thread must spawn");
}

fn low_priority_worker(_arg: u64) {
    kernel::serial_println!("low: running");
    kernel::task::sleep::sleep(5);
    kernel::serial_println!("low: woke up after sleeping");
}

fn high_priority_worker(_arg: u64) {
    kernel::serial_println!("high: running, yielding once");
    kernel::task::thread::yield_now();
    kernel::serial_println!("high: resumed");
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kernel::serial_println!("{}", info);
    kernel::hlt_loop()
}
