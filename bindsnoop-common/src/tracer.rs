//! Bind call correlation
//!
//! The entry probe records the socket of every in-flight bind call under the
//! calling thread id; the return probe picks it up again, filters, decodes
//! the socket and emits a [`BindEvent`]. The steps here are written against
//! small traits so the same code drives the kernel probes and the host-side
//! tests.
//!
//! Nothing in this module blocks, allocates or loops.

use crate::event::{BindEvent, BindOptions, IpVersion, TASK_COMM_LEN};

/// Immutable settings shared by both handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracerConfig {
    /// `0` traces every process.
    pub target_pid: u32,
    pub ignore_errors: bool,
    pub filter_by_port: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            target_pid: 0,
            ignore_errors: true,
            filter_by_port: false,
        }
    }
}

/// Returned by [`PendingCalls::upsert`] when the table has no room left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

/// In-flight calls keyed by thread id.
pub trait PendingCalls {
    type Handle: Copy;

    /// Insert or replace. Rejects new keys once the table is at capacity;
    /// existing entries are never evicted.
    fn upsert(&self, tid: u32, handle: Self::Handle) -> Result<(), TableFull>;
    fn lookup(&self, tid: u32) -> Option<Self::Handle>;
    /// No-op when `tid` is absent.
    fn remove(&self, tid: u32);
}

/// Port allow-list, populated before tracing starts.
pub trait PortFilter {
    fn contains(&self, port: u16) -> bool;
}

/// Container/sandbox scoping.
pub trait NamespaceFilter {
    fn current_sandbox_id(&self) -> u64;
    fn should_discard(&self, id: u64) -> bool;
}

/// Best-effort delivery of finished events. Must not block.
pub trait EventSink {
    fn push(&self, event: &BindEvent);
}

/// Identity and clocks of the thread a handler runs on.
pub trait TaskContext {
    fn pid_tgid(&self) -> u64;
    fn uid_gid(&self) -> u64;
    fn command(&self) -> [u8; TASK_COMM_LEN];
    fn monotonic_ns(&self) -> u64;
    fn boot_ns(&self) -> u64;
}

/// Field extraction from the socket of a bind call. Each read may fail on
/// its own; a failed read leaves only that field at zero.
pub trait SocketReader {
    /// Handle recorded at entry (`struct socket *`).
    type Socket: Copy;
    /// Resolved network-layer socket (`struct sock *`).
    type Sock: Copy;

    fn sock(&self, socket: Self::Socket) -> Option<Self::Sock>;
    /// Host byte order.
    fn source_port(&self, sk: Self::Sock) -> Option<u16>;
    fn source_addr_v4(&self, sk: Self::Sock) -> Option<[u8; 4]>;
    fn source_addr_v6(&self, sk: Self::Sock) -> Option<[u8; 16]>;
    fn bound_dev_if(&self, sk: Self::Sock) -> Option<u32>;
    fn protocol(&self, sk: Self::Sock) -> Option<u16>;
    fn options(&self, sk: Self::Sock) -> BindOptions;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Recorded,
    FilteredByPid,
    /// The pending-call table was full; the call will not be correlated.
    TableFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    NoPendingCall,
    DiscardedByNamespace,
    DiscardedFailedCall,
    DiscardedByPort,
    Emitted,
}

pub struct Tracer<'a, T, P, N, R, E> {
    config: TracerConfig,
    pending: &'a T,
    ports: &'a P,
    namespaces: &'a N,
    reader: &'a R,
    events: &'a E,
}

#[inline(always)]
fn split_pid_tgid(pid_tgid: u64) -> (u32, u32) {
    ((pid_tgid >> 32) as u32, pid_tgid as u32)
}

impl<'a, T, P, N, R, E> Tracer<'a, T, P, N, R, E>
where
    R: SocketReader,
    T: PendingCalls<Handle = R::Socket>,
    P: PortFilter,
    N: NamespaceFilter,
    E: EventSink,
{
    pub fn new(
        config: TracerConfig,
        pending: &'a T,
        ports: &'a P,
        namespaces: &'a N,
        reader: &'a R,
        events: &'a E,
    ) -> Self {
        Self {
            config,
            pending,
            ports,
            namespaces,
            reader,
            events,
        }
    }

    /// Function-entry handler.
    #[inline(always)]
    pub fn on_entry<C: TaskContext>(&self, task: &C, socket: R::Socket) -> EntryOutcome {
        let (pid, tid) = split_pid_tgid(task.pid_tgid());

        if self.config.target_pid != 0 && self.config.target_pid != pid {
            return EntryOutcome::FilteredByPid;
        }

        match self.pending.upsert(tid, socket) {
            Ok(()) => EntryOutcome::Recorded,
            Err(TableFull) => EntryOutcome::TableFull,
        }
    }

    /// Function-return handler for the entry point of `version`.
    ///
    /// Once a pending call is found it is removed again whatever the
    /// outcome.
    #[inline(always)]
    pub fn on_exit<C: TaskContext>(&self, task: &C, ret: i32, version: IpVersion) -> ExitOutcome {
        let (_, tid) = split_pid_tgid(task.pid_tgid());

        let Some(socket) = self.pending.lookup(tid) else {
            return ExitOutcome::NoPendingCall;
        };

        let outcome = self.complete(task, socket, ret, version);
        self.pending.remove(tid);
        outcome
    }

    #[inline(always)]
    fn complete<C: TaskContext>(
        &self,
        task: &C,
        socket: R::Socket,
        ret: i32,
        version: IpVersion,
    ) -> ExitOutcome {
        let mount_ns_id = self.namespaces.current_sandbox_id();
        if self.namespaces.should_discard(mount_ns_id) {
            return ExitOutcome::DiscardedByNamespace;
        }

        if self.config.ignore_errors && ret != 0 {
            return ExitOutcome::DiscardedFailedCall;
        }

        let sk = self.reader.sock(socket);
        let port = sk
            .and_then(|sk| self.reader.source_port(sk))
            .unwrap_or(0);
        if self.config.filter_by_port && !self.ports.contains(port) {
            return ExitOutcome::DiscardedByPort;
        }

        let (pid, _) = split_pid_tgid(task.pid_tgid());
        let uid_gid = task.uid_gid();

        let mut event = BindEvent::new();
        event.ts_us = task.monotonic_ns() / 1000;
        event.timestamp = task.boot_ns();
        event.pid = pid;
        event.uid = uid_gid as u32;
        event.gid = (uid_gid >> 32) as u32;
        event.task = task.command();
        event.ver = version as u8;
        event.port = port;
        event.ret = ret;
        event.mount_ns_id = mount_ns_id;

        if let Some(sk) = sk {
            match version {
                IpVersion::V4 => {
                    if let Some(addr) = self.reader.source_addr_v4(sk) {
                        event.addr[..4].copy_from_slice(&addr);
                    }
                }
                IpVersion::V6 => {
                    if let Some(addr) = self.reader.source_addr_v6(sk) {
                        event.addr = addr;
                    }
                }
            }
            event.bound_dev_if = self.reader.bound_dev_if(sk).unwrap_or(0);
            event.proto = self.reader.protocol(sk).unwrap_or(0);
            event.opts = self.reader.options(sk).0;
        }

        self.events.push(&event);
        ExitOutcome::Emitted
    }
}
