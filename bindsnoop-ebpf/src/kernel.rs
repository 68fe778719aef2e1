//! BPF-backed implementations of the correlation traits.

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_task,
        bpf_get_current_uid_gid, bpf_ktime_get_boot_ns, bpf_ktime_get_ns,
        bpf_probe_read_kernel, bpf_probe_read_kernel_buf,
    },
    EbpfContext,
};
use bindsnoop_common::{
    layout, BindEvent, EventSink, KernelLayout, KernelMemory, NamespaceFilter, PendingCalls,
    PortFilter, TableFull, TaskContext, TASK_COMM_LEN,
};

use crate::maps::{self, BIND_EVENTS, MOUNT_NS_SET, PORTS, SOCKETS};

/// Reads through `bpf_probe_read_kernel`, so a bad offset faults softly.
pub struct ProbeReader;

impl KernelMemory for ProbeReader {
    #[inline(always)]
    fn read_u32(&self, addr: u64) -> Option<u32> {
        unsafe { bpf_probe_read_kernel(addr as *const u32) }.ok()
    }

    #[inline(always)]
    fn read_u64(&self, addr: u64) -> Option<u64> {
        unsafe { bpf_probe_read_kernel(addr as *const u64) }.ok()
    }

    #[inline(always)]
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> bool {
        unsafe { bpf_probe_read_kernel_buf(addr as *const u8, buf) }.is_ok()
    }
}

pub struct CurrentTask;

impl TaskContext for CurrentTask {
    #[inline(always)]
    fn pid_tgid(&self) -> u64 {
        bpf_get_current_pid_tgid()
    }

    #[inline(always)]
    fn uid_gid(&self) -> u64 {
        bpf_get_current_uid_gid()
    }

    #[inline(always)]
    fn command(&self) -> [u8; TASK_COMM_LEN] {
        bpf_get_current_comm().unwrap_or([0u8; TASK_COMM_LEN])
    }

    #[inline(always)]
    fn monotonic_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_ns() }
    }

    #[inline(always)]
    fn boot_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_boot_ns() }
    }
}

pub struct PendingSockets;

impl PendingCalls for PendingSockets {
    type Handle = u64;

    #[inline(always)]
    fn upsert(&self, tid: u32, handle: u64) -> Result<(), TableFull> {
        SOCKETS.insert(&tid, &handle, 0).map_err(|_| TableFull)
    }

    #[inline(always)]
    fn lookup(&self, tid: u32) -> Option<u64> {
        unsafe { SOCKETS.get(&tid) }.copied()
    }

    #[inline(always)]
    fn remove(&self, tid: u32) {
        let _ = SOCKETS.remove(&tid);
    }
}

pub struct PortSet;

impl PortFilter for PortSet {
    #[inline(always)]
    fn contains(&self, port: u16) -> bool {
        unsafe { PORTS.get(&port) }.is_some()
    }
}

/// Scopes tracing to the mount namespaces listed in `MOUNT_NS_SET`.
///
/// A task whose namespace cannot be resolved reports id 0 and is dropped
/// whenever the filter is on, unless 0 itself was listed.
pub struct MountNamespaces<'a> {
    pub layout: &'a KernelLayout,
}

impl NamespaceFilter for MountNamespaces<'_> {
    #[inline(always)]
    fn current_sandbox_id(&self) -> u64 {
        let task = unsafe { bpf_get_current_task() };
        layout::mount_ns_id(&ProbeReader, self.layout, task).unwrap_or(0)
    }

    #[inline(always)]
    fn should_discard(&self, id: u64) -> bool {
        maps::filter_by_mount_ns() && unsafe { MOUNT_NS_SET.get(&id) }.is_none()
    }
}

pub struct PerfSink<'a, C> {
    pub ctx: &'a C,
}

impl<C: EbpfContext> EventSink for PerfSink<'_, C> {
    #[inline(always)]
    fn push(&self, event: &BindEvent) {
        BIND_EVENTS.output(self.ctx, event, 0);
    }
}
