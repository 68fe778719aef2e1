use aya_ebpf::{
    macros::map,
    maps::{Array, HashMap, PerCpuArray, PerfEventArray},
};
use bindsnoop_common::{
    stats, BindEvent, KernelLayout, MAX_MOUNT_NS, MAX_PENDING_CALLS, MAX_PORTS,
};

/// Thread id -> `struct socket *` of the bind call in flight on that thread.
#[map]
pub static SOCKETS: HashMap<u32, u64> = HashMap::with_max_entries(MAX_PENDING_CALLS, 0);

#[map]
pub static PORTS: HashMap<u16, u16> = HashMap::with_max_entries(MAX_PORTS, 0);

#[map]
pub static MOUNT_NS_SET: HashMap<u64, u32> = HashMap::with_max_entries(MAX_MOUNT_NS, 0);

#[map]
pub static KERNEL_LAYOUT: Array<KernelLayout> = Array::with_max_entries(1, 0);

#[map]
pub static BIND_EVENTS: PerfEventArray<BindEvent> = PerfEventArray::new(0);

#[map]
pub static STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(stats::LEN, 0);

// Rewritten by the loader before the programs are verified.
#[no_mangle]
static TARGET_PID: u32 = 0;
#[no_mangle]
static IGNORE_ERRORS: u8 = 1;
#[no_mangle]
static FILTER_BY_PORT: u8 = 0;
#[no_mangle]
static FILTER_BY_MNTNS: u8 = 0;

static UNAVAILABLE_LAYOUT: KernelLayout = KernelLayout::UNAVAILABLE;

#[inline(always)]
pub fn target_pid() -> u32 {
    unsafe { core::ptr::read_volatile(&TARGET_PID) }
}

#[inline(always)]
pub fn ignore_errors() -> bool {
    unsafe { core::ptr::read_volatile(&IGNORE_ERRORS) != 0 }
}

#[inline(always)]
pub fn filter_by_port() -> bool {
    unsafe { core::ptr::read_volatile(&FILTER_BY_PORT) != 0 }
}

#[inline(always)]
pub fn filter_by_mount_ns() -> bool {
    unsafe { core::ptr::read_volatile(&FILTER_BY_MNTNS) != 0 }
}

/// Layout pushed by the loader, or one that reads nothing if it is missing.
#[inline(always)]
pub fn kernel_layout() -> &'static KernelLayout {
    KERNEL_LAYOUT.get(0).unwrap_or(&UNAVAILABLE_LAYOUT)
}

#[inline(always)]
pub fn count(slot: u32) {
    if let Some(counter) = STATS.get_ptr_mut(slot) {
        unsafe { *counter += 1 };
    }
}
