/// Integration test: verify the kernel boots, brings up the heap and
/// scheduler core, and that serial output works. There's no framebuffer
/// console in this kernel, so unlike the teacher's own version of this
/// test, everything here goes through the serial port.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;
use kernel::serial_println;

#[allow(deprecated)]
pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config.kernel_stack_size = 512 * 1024;
    config
};

entry_point!(main, config = &BOOTLOADER_CONFIG);

fn main(boot_info: &'static mut BootInfo) -> ! {
    kernel::serial::init();
    kernel::init();

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
    kernel::interrupts::init_pit();

    kernel::task::thread::system_init();

    test_main();
    kernel::hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kernel::test_panic_handler(info)
}

#[test_case]
fn test_serial_println_simple() {
    serial_println!("test_serial_println_simple output");
}

#[test_case]
fn test_serial_println_many() {
    for _ in 0..200 {
        serial_println!("test_serial_println_many output");
    }
}

#[test_case]
fn test_heap_allocates() {
    extern crate alloc;
    use alloc::vec::Vec;

    let mut v = Vec::new();
    for i in 0..1000u64 {
        v.push(i);
    }
    assert_eq!(v.iter().sum::<u64>(), (0..1000u64).sum());
}

#[test_case]
fn test_main_thread_has_default_priority() {
    assert_eq!(kernel::task::thread::get_priority(), kernel::task::thread::PRI_DEFAULT);
}
