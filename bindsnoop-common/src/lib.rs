#![no_std]

#[cfg(test)]
extern crate std;

pub mod event;
pub mod layout;
pub mod tracer;

pub use event::{BindEvent, BindOptions, IpVersion, TASK_COMM_LEN};
pub use layout::{mount_ns_id, FieldSpec, KernelLayout, KernelMemory, LayoutSocketReader};
pub use tracer::{
    EntryOutcome, EventSink, ExitOutcome, NamespaceFilter, PendingCalls, PortFilter, SocketReader,
    TableFull, TaskContext, Tracer, TracerConfig,
};

/// Capacity of the pending-call table.
pub const MAX_PENDING_CALLS: u32 = 10240;
/// Capacity of the port allow-list.
pub const MAX_PORTS: u32 = 1024;
/// Capacity of the mount namespace allow-list.
pub const MAX_MOUNT_NS: u32 = 1024;

/// Map and global names shared by the probes and the loader.
pub mod maps {
    pub const PENDING_CALLS: &str = "SOCKETS";
    pub const PORTS: &str = "PORTS";
    pub const MOUNT_NS_SET: &str = "MOUNT_NS_SET";
    pub const KERNEL_LAYOUT: &str = "KERNEL_LAYOUT";
    pub const EVENTS: &str = "BIND_EVENTS";
    pub const STATS: &str = "STATS";

    pub const TARGET_PID: &str = "TARGET_PID";
    pub const IGNORE_ERRORS: &str = "IGNORE_ERRORS";
    pub const FILTER_BY_PORT: &str = "FILTER_BY_PORT";
    pub const FILTER_BY_MNTNS: &str = "FILTER_BY_MNTNS";
}

/// Slots of the per-CPU `STATS` array.
pub mod stats {
    pub const PENDING_TABLE_FULL: u32 = 0;
    pub const LEN: u32 = 1;
}

/// Probe program names and the kernel functions they attach to.
pub mod programs {
    pub const IPV4_ENTRY: &str = "bind_ipv4_entry";
    pub const IPV4_EXIT: &str = "bind_ipv4_exit";
    pub const IPV6_ENTRY: &str = "bind_ipv6_entry";
    pub const IPV6_EXIT: &str = "bind_ipv6_exit";

    pub const IPV4_TARGET: &str = "inet_bind";
    pub const IPV6_TARGET: &str = "inet6_bind";
}
