/// Integration test: priority donation across a single lock, a chain of
/// nested locks, and selective removal when a thread holds more than one
/// lock at once.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::string::String;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;
use kernel::task::sync::{lock::Lock, semaphore::Semaphore};
use kernel::task::{scheduler, thread};

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

fn priority_of_named(name: &str) -> Option<u8> {
    let mut found = None;
    scheduler::for_each_thread(|info| {
        if info.name == name {
            found = Some(info.priority);
        }
    });
    found
}

// --- Scenario: single donation ---

static LOCK_SINGLE: Lock = Lock::new();
static SINGLE_DONE: Semaphore = Semaphore::new(0);

fn single_donation_worker(_arg: u64) {
    LOCK_SINGLE.acquire();
    LOCK_SINGLE.release();
    SINGLE_DONE.up();
}

#[test_case]
fn single_donation_raises_and_restores_holder_priority() {
    LOCK_SINGLE.acquire();
    assert_eq!(thread::get_priority(), thread::PRI_DEFAULT);

    // Creating H at a higher priority preempts us immediately; H blocks
    // trying to acquire the lock we hold and donates to us, then control
    // returns here since H is now BLOCKED and nothing else is READY.
    thread::create(String::from("single-H"), 40, single_donation_worker, 0)
        .expect("donor thread spawns");
    assert_eq!(thread::get_priority(), 40);

    // Releasing hands the lock to H, drops our donation, and — since H
    // now outranks us — preempts us until H finishes.
    LOCK_SINGLE.release();
    assert_eq!(thread::get_priority(), thread::PRI_DEFAULT);
}

// --- Scenario: nested donation through a chain of two locks ---

static LOCK_A: Lock = Lock::new();
static LOCK_B: Lock = Lock::new();
static GATE_L2_START: Semaphore = Semaphore::new(0);
static GATE_L3_START: Semaphore = Semaphore::new(0);
static GATE_RELEASE_A: Semaphore = Semaphore::new(0);

fn nested_l1_worker(_arg: u64) {
    LOCK_A.acquire();
    GATE_RELEASE_A.down();
    LOCK_A.release();
}

fn nested_l2_worker(_arg: u64) {
    GATE_L2_START.down();
    LOCK_B.acquire();
    LOCK_A.acquire(); // blocks behind L1, donates through the chain
    LOCK_A.release();
    LOCK_B.release();
}

fn nested_l3_worker(_arg: u64) {
    GATE_L3_START.down();
    LOCK_B.acquire(); // blocks behind L2, donates through to L1
    LOCK_B.release();
}

#[test_case]
fn nested_donation_propagates_through_lock_chain() {
    // L1 and L2 are created at main's own priority so neither preempts;
    // L3 at a higher priority will, but it immediately parks on its gate.
    thread::create(String::from("L1"), 31, nested_l1_worker, 0).expect("L1 spawns");
    thread::create(String::from("L2"), 32, nested_l2_worker, 0).expect("L2 spawns");
    thread::create(String::from("L3"), 33, nested_l3_worker, 0).expect("L3 spawns");

    // Let L1 run and take lock A, then park waiting for our go-ahead to
    // release it.
    thread::yield_now();
    assert_eq!(priority_of_named("L1"), Some(31));

    // L2 takes B, then blocks on A behind L1, donating 32 to L1.
    GATE_L2_START.up();
    assert_eq!(priority_of_named("L1"), Some(32));

    // L3 blocks on B behind L2, donating 33 to L2, which propagates to
    // L1 since L2 is itself blocked on A.
    GATE_L3_START.up();
    assert_eq!(priority_of_named("L2"), Some(33));
    assert_eq!(priority_of_named("L1"), Some(33));

    // Releasing A wakes L2, which immediately reacquires and releases
    // both locks and runs to completion, followed by L3 doing the same;
    // by the time control returns here every thread in the chain has
    // exited, so confirm the chain fully drained rather than probing a
    // thread that may no longer exist.
    GATE_RELEASE_A.up();
    assert!(LOCK_A.try_acquire(), "lock A must be free once the chain drains");
    LOCK_A.release();
}

// --- Scenario: multi-lock selective donor removal ---

static LOCK_MX: Lock = Lock::new();
static LOCK_MY: Lock = Lock::new();
static GATE_H1_START: Semaphore = Semaphore::new(0);
static GATE_H2_START: Semaphore = Semaphore::new(0);

fn selective_h1_worker(_arg: u64) {
    GATE_H1_START.down();
    LOCK_MX.acquire();
    LOCK_MX.release();
}

fn selective_h2_worker(_arg: u64) {
    GATE_H2_START.down();
    LOCK_MY.acquire();
    LOCK_MY.release();
}

#[test_case]
fn releasing_one_of_two_held_locks_drops_only_its_donor() {
    LOCK_MX.acquire();
    LOCK_MY.acquire();
    assert_eq!(thread::get_priority(), thread::PRI_DEFAULT);

    thread::create(String::from("H1"), 40, selective_h1_worker, 0).expect("H1 spawns");
    thread::create(String::from("H2"), 50, selective_h2_worker, 0).expect("H2 spawns");

    GATE_H1_START.up();
    assert_eq!(thread::get_priority(), 40);
    GATE_H2_START.up();
    assert_eq!(thread::get_priority(), 50);

    LOCK_MX.release();
    assert_eq!(thread::get_priority(), 50);

    LOCK_MY.release();
    assert_eq!(thread::get_priority(), thread::PRI_DEFAULT);
}
