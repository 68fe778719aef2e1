use aya_ebpf::{
    helpers::bpf_get_current_pid_tgid,
    macros::{kprobe, kretprobe},
    programs::{ProbeContext, RetProbeContext},
};
use aya_log_ebpf::warn;
use bindsnoop_common::{
    stats, EntryOutcome, IpVersion, LayoutSocketReader, PendingCalls, Tracer, TracerConfig,
};

use crate::kernel::{CurrentTask, MountNamespaces, PendingSockets, PerfSink, PortSet, ProbeReader};
use crate::maps;

#[kprobe]
pub fn bind_ipv4_entry(ctx: ProbeContext) -> u32 {
    try_bind_entry(&ctx).unwrap_or(0)
}

#[kretprobe]
pub fn bind_ipv4_exit(ctx: RetProbeContext) -> u32 {
    try_bind_exit(&ctx, IpVersion::V4).unwrap_or(0)
}

#[kprobe]
pub fn bind_ipv6_entry(ctx: ProbeContext) -> u32 {
    try_bind_entry(&ctx).unwrap_or(0)
}

#[kretprobe]
pub fn bind_ipv6_exit(ctx: RetProbeContext) -> u32 {
    try_bind_exit(&ctx, IpVersion::V6).unwrap_or(0)
}

#[inline(always)]
fn config() -> TracerConfig {
    TracerConfig {
        target_pid: maps::target_pid(),
        ignore_errors: maps::ignore_errors(),
        filter_by_port: maps::filter_by_port(),
    }
}

#[inline(always)]
fn try_bind_entry(ctx: &ProbeContext) -> Result<u32, i64> {
    let socket: u64 = ctx.arg(0).ok_or(1i64)?;

    let layout = maps::kernel_layout();
    let reader = LayoutSocketReader::new(&ProbeReader, layout);
    let namespaces = MountNamespaces { layout };
    let sink = PerfSink { ctx };
    let tracer = Tracer::new(
        config(),
        &PendingSockets,
        &PortSet,
        &namespaces,
        &reader,
        &sink,
    );

    if tracer.on_entry(&CurrentTask, socket) == EntryOutcome::TableFull {
        maps::count(stats::PENDING_TABLE_FULL);
        warn!(ctx, "pending bind table full, dropping call from tid {}", current_tid());
    }
    Ok(0)
}

#[inline(always)]
fn try_bind_exit(ctx: &RetProbeContext, version: IpVersion) -> Result<u32, i64> {
    let Some(ret) = ctx.ret::<i32>() else {
        PendingSockets.remove(current_tid());
        return Ok(0);
    };

    let layout = maps::kernel_layout();
    let reader = LayoutSocketReader::new(&ProbeReader, layout);
    let namespaces = MountNamespaces { layout };
    let sink = PerfSink { ctx };
    let tracer = Tracer::new(
        config(),
        &PendingSockets,
        &PortSet,
        &namespaces,
        &reader,
        &sink,
    );

    tracer.on_exit(&CurrentTask, ret, version);
    Ok(0)
}

#[inline(always)]
fn current_tid() -> u32 {
    bpf_get_current_pid_tgid() as u32
}
