//! Kernel structure layout descriptor
//!
//! Offsets of the handful of kernel fields the probes read, kept in one
//! place so that a different kernel build only needs a different
//! [`KernelLayout`]. Every read is fallible; a field that cannot be read is
//! reported as absent and the caller substitutes zero.

use crate::event::BindOptions;
use crate::tracer::SocketReader;

/// Location of a single field relative to the start of its structure.
///
/// `bits == 0` marks the field as unavailable on this kernel build.
/// Scalars are read as a native-endian 32-bit word at `offset`, shifted
/// right by `shift` and masked to `bits`. Pointers use `bits == 64`,
/// addresses are copied verbatim (`bits == 32` or `bits == 128`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "user", serde(default))]
pub struct FieldSpec {
    pub offset: u32,
    pub shift: u8,
    pub bits: u8,
    /// Non-zero when the stored value is big-endian (e.g. `inet_sport`).
    pub network_order: u8,
    #[cfg_attr(feature = "user", serde(skip))]
    pub _pad: u8,
}

impl FieldSpec {
    pub const UNAVAILABLE: FieldSpec = FieldSpec {
        offset: 0,
        shift: 0,
        bits: 0,
        network_order: 0,
        _pad: 0,
    };

    pub const fn scalar(offset: u32, bits: u8) -> Self {
        Self::bitfield(offset, 0, bits)
    }

    pub const fn bitfield(offset: u32, shift: u8, bits: u8) -> Self {
        FieldSpec {
            offset,
            shift,
            bits,
            network_order: 0,
            _pad: 0,
        }
    }

    pub const fn network_order(offset: u32, bits: u8) -> Self {
        FieldSpec {
            offset,
            shift: 0,
            bits,
            network_order: 1,
            _pad: 0,
        }
    }

    pub const fn pointer(offset: u32) -> Self {
        Self::scalar(offset, 64)
    }

    pub const fn is_available(&self) -> bool {
        self.bits != 0
    }

    /// Isolates this field from a raw word read at `offset`.
    pub fn extract(&self, raw: u32) -> u32 {
        let shifted = raw.checked_shr(self.shift as u32).unwrap_or(0);
        let value = if self.bits >= 32 {
            shifted
        } else {
            shifted & ((1u32 << self.bits) - 1)
        };
        if self.network_order == 0 {
            return value;
        }
        match self.bits {
            16 => u16::from_be(value as u16) as u32,
            32 => u32::from_be(value),
            _ => value,
        }
    }

    fn address(&self, base: u64) -> Option<u64> {
        if base == 0 || !self.is_available() {
            return None;
        }
        base.checked_add(self.offset as u64)
    }
}

/// Field locations for one kernel ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "user", serde(default))]
pub struct KernelLayout {
    /// `struct socket::sk`
    pub socket_sk: FieldSpec,
    pub sport: FieldSpec,
    pub saddr_v4: FieldSpec,
    pub saddr_v6: FieldSpec,
    pub bound_dev_if: FieldSpec,
    pub protocol: FieldSpec,
    pub reuse: FieldSpec,
    pub reuseport: FieldSpec,
    pub freebind: FieldSpec,
    pub transparent: FieldSpec,
    pub bind_address_no_port: FieldSpec,
    /// `struct task_struct::nsproxy`
    pub task_nsproxy: FieldSpec,
    /// `struct nsproxy::mnt_ns`
    pub nsproxy_mnt_ns: FieldSpec,
    /// `struct mnt_namespace::ns.inum`
    pub mnt_ns_inum: FieldSpec,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for KernelLayout {}

impl KernelLayout {
    /// Every field unavailable; all extractions decode as zero.
    pub const UNAVAILABLE: KernelLayout = KernelLayout {
        socket_sk: FieldSpec::UNAVAILABLE,
        sport: FieldSpec::UNAVAILABLE,
        saddr_v4: FieldSpec::UNAVAILABLE,
        saddr_v6: FieldSpec::UNAVAILABLE,
        bound_dev_if: FieldSpec::UNAVAILABLE,
        protocol: FieldSpec::UNAVAILABLE,
        reuse: FieldSpec::UNAVAILABLE,
        reuseport: FieldSpec::UNAVAILABLE,
        freebind: FieldSpec::UNAVAILABLE,
        transparent: FieldSpec::UNAVAILABLE,
        bind_address_no_port: FieldSpec::UNAVAILABLE,
        task_nsproxy: FieldSpec::UNAVAILABLE,
        nsproxy_mnt_ns: FieldSpec::UNAVAILABLE,
        mnt_ns_inum: FieldSpec::UNAVAILABLE,
    };

    /// Fields of `struct sock_common` that have kept their place on 64-bit
    /// kernels with IPv6 enabled. Anything that lives in the body of
    /// `struct sock`, `struct inet_sock` or `struct task_struct` depends on
    /// the build configuration and has to be supplied explicitly.
    ///
    /// The port is taken from `skc_num`, which already holds host order and
    /// equals `ntohs(inet_sport)` once the bind has completed.
    pub const fn generic() -> Self {
        KernelLayout {
            socket_sk: FieldSpec::pointer(24),
            sport: FieldSpec::scalar(14, 16),
            saddr_v4: FieldSpec::scalar(4, 32),
            saddr_v6: FieldSpec::scalar(72, 128),
            bound_dev_if: FieldSpec::scalar(20, 32),
            protocol: FieldSpec::UNAVAILABLE,
            reuse: FieldSpec::bitfield(19, 0, 4),
            reuseport: FieldSpec::bitfield(19, 4, 1),
            freebind: FieldSpec::UNAVAILABLE,
            transparent: FieldSpec::UNAVAILABLE,
            bind_address_no_port: FieldSpec::UNAVAILABLE,
            task_nsproxy: FieldSpec::UNAVAILABLE,
            nsproxy_mnt_ns: FieldSpec::pointer(24),
            mnt_ns_inum: FieldSpec::scalar(16, 32),
        }
    }
}

impl KernelLayout {
    /// Whether every hop of task -> nsproxy -> mnt_ns -> inum is known.
    pub const fn resolves_mount_ns(&self) -> bool {
        self.task_nsproxy.is_available()
            && self.nsproxy_mnt_ns.is_available()
            && self.mnt_ns_inum.is_available()
    }
}

impl Default for KernelLayout {
    fn default() -> Self {
        Self::generic()
    }
}

/// Fallible reads of kernel memory.
pub trait KernelMemory {
    fn read_u32(&self, addr: u64) -> Option<u32>;
    fn read_u64(&self, addr: u64) -> Option<u64>;
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> bool;
}

fn read_scalar<M: KernelMemory>(memory: &M, base: u64, spec: &FieldSpec) -> Option<u32> {
    if spec.bits > 32 {
        return None;
    }
    let raw = memory.read_u32(spec.address(base)?)?;
    Some(spec.extract(raw))
}

fn read_pointer<M: KernelMemory>(memory: &M, base: u64, spec: &FieldSpec) -> Option<u64> {
    if spec.bits != 64 {
        return None;
    }
    match memory.read_u64(spec.address(base)?)? {
        0 => None,
        ptr => Some(ptr),
    }
}

fn read_flag<M: KernelMemory>(memory: &M, base: u64, spec: &FieldSpec) -> bool {
    read_scalar(memory, base, spec).is_some_and(|value| value != 0)
}

/// Mount namespace inode number of `task`.
pub fn mount_ns_id<M: KernelMemory>(memory: &M, layout: &KernelLayout, task: u64) -> Option<u64> {
    let nsproxy = read_pointer(memory, task, &layout.task_nsproxy)?;
    let mnt_ns = read_pointer(memory, nsproxy, &layout.nsproxy_mnt_ns)?;
    read_scalar(memory, mnt_ns, &layout.mnt_ns_inum).map(u64::from)
}

/// [`SocketReader`] driven by a [`KernelLayout`].
///
/// The call handle is the address of the `struct socket` passed to
/// `inet_bind`/`inet6_bind`; the resolved sock is the address of its
/// `struct sock`.
pub struct LayoutSocketReader<'a, M> {
    memory: &'a M,
    layout: &'a KernelLayout,
}

impl<'a, M: KernelMemory> LayoutSocketReader<'a, M> {
    pub fn new(memory: &'a M, layout: &'a KernelLayout) -> Self {
        Self { memory, layout }
    }
}

impl<M: KernelMemory> SocketReader for LayoutSocketReader<'_, M> {
    type Socket = u64;
    type Sock = u64;

    fn sock(&self, socket: u64) -> Option<u64> {
        read_pointer(self.memory, socket, &self.layout.socket_sk)
    }

    fn source_port(&self, sk: u64) -> Option<u16> {
        let spec = &self.layout.sport;
        if spec.bits > 16 {
            return None;
        }
        read_scalar(self.memory, sk, spec).map(|port| port as u16)
    }

    fn source_addr_v4(&self, sk: u64) -> Option<[u8; 4]> {
        let spec = &self.layout.saddr_v4;
        if spec.bits != 32 {
            return None;
        }
        let mut addr = [0u8; 4];
        self.memory
            .read_bytes(spec.address(sk)?, &mut addr)
            .then_some(addr)
    }

    fn source_addr_v6(&self, sk: u64) -> Option<[u8; 16]> {
        let spec = &self.layout.saddr_v6;
        if spec.bits != 128 {
            return None;
        }
        let mut addr = [0u8; 16];
        self.memory
            .read_bytes(spec.address(sk)?, &mut addr)
            .then_some(addr)
    }

    fn bound_dev_if(&self, sk: u64) -> Option<u32> {
        read_scalar(self.memory, sk, &self.layout.bound_dev_if)
    }

    fn protocol(&self, sk: u64) -> Option<u16> {
        read_scalar(self.memory, sk, &self.layout.protocol).map(|proto| proto as u16)
    }

    fn options(&self, sk: u64) -> BindOptions {
        let layout = self.layout;
        let mut options = BindOptions::empty();
        options.set(
            BindOptions::FREEBIND,
            read_flag(self.memory, sk, &layout.freebind),
        );
        options.set(
            BindOptions::TRANSPARENT,
            read_flag(self.memory, sk, &layout.transparent),
        );
        options.set(
            BindOptions::BIND_ADDRESS_NO_PORT,
            read_flag(self.memory, sk, &layout.bind_address_no_port),
        );
        options.set(
            BindOptions::REUSE_ADDRESS,
            read_flag(self.memory, sk, &layout.reuse),
        );
        options.set(
            BindOptions::REUSE_PORT,
            read_flag(self.memory, sk, &layout.reuseport),
        );
        options
    }
}
