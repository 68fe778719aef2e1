use core::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const TASK_COMM_LEN: usize = 16;

/// Address family of the bind entry point an event was captured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpVersion {
    V4 = 4,
    V6 = 6,
}

impl IpVersion {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            4 => Some(IpVersion::V4),
            6 => Some(IpVersion::V6),
            _ => None,
        }
    }
}

/// Socket options in effect when the bind completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct BindOptions(pub u8);

impl BindOptions {
    pub const FREEBIND: u8 = 1 << 0;
    pub const TRANSPARENT: u8 = 1 << 1;
    pub const BIND_ADDRESS_NO_PORT: u8 = 1 << 2;
    pub const REUSE_ADDRESS: u8 = 1 << 3;
    pub const REUSE_PORT: u8 = 1 << 4;

    pub const fn empty() -> Self {
        BindOptions(0)
    }

    pub fn set(&mut self, flag: u8, enabled: bool) {
        if enabled {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn freebind(&self) -> bool {
        self.contains(Self::FREEBIND)
    }

    pub fn transparent(&self) -> bool {
        self.contains(Self::TRANSPARENT)
    }

    pub fn bind_address_no_port(&self) -> bool {
        self.contains(Self::BIND_ADDRESS_NO_PORT)
    }

    pub fn reuse_address(&self) -> bool {
        self.contains(Self::REUSE_ADDRESS)
    }

    pub fn reuse_port(&self) -> bool {
        self.contains(Self::REUSE_PORT)
    }
}

/// Record emitted for every correlated bind call.
///
/// The layout is shared byte-for-byte with the consumer. Padding is spelled
/// out so the whole record is initialised before it is handed to the perf
/// buffer.
#[repr(C)]
#[derive(Clone, Copy)]
#[cfg_attr(feature = "user", derive(Debug))]
pub struct BindEvent {
    pub ts_us: u64,
    pub timestamp: u64,
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    pub task: [u8; TASK_COMM_LEN],
    pub ver: u8,
    pub _pad0: [u8; 3],
    pub addr: [u8; 16],
    pub port: u16,
    pub _pad1: [u8; 2],
    pub bound_dev_if: u32,
    pub ret: i32,
    pub proto: u16,
    pub _pad2: [u8; 2],
    pub mount_ns_id: u64,
    pub opts: u8,
    pub _pad3: [u8; 7],
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for BindEvent {}

impl BindEvent {
    pub const fn new() -> Self {
        Self {
            ts_us: 0,
            timestamp: 0,
            pid: 0,
            uid: 0,
            gid: 0,
            task: [0u8; TASK_COMM_LEN],
            ver: 0,
            _pad0: [0u8; 3],
            addr: [0u8; 16],
            port: 0,
            _pad1: [0u8; 2],
            bound_dev_if: 0,
            ret: 0,
            proto: 0,
            _pad2: [0u8; 2],
            mount_ns_id: 0,
            opts: 0,
            _pad3: [0u8; 7],
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    pub fn with_command(mut self, command: &[u8]) -> Self {
        let copy_len = command.len().min(self.task.len());
        self.task = [0u8; TASK_COMM_LEN];
        self.task[..copy_len].copy_from_slice(&command[..copy_len]);
        self
    }

    /// Stores `addr` and its version; IPv4 occupies the low four bytes only.
    pub fn with_addr(mut self, addr: IpAddr) -> Self {
        self.addr = [0u8; 16];
        match addr {
            IpAddr::V4(v4) => {
                self.ver = IpVersion::V4 as u8;
                self.addr[..4].copy_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                self.ver = IpVersion::V6 as u8;
                self.addr = v6.octets();
            }
        }
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_return_code(mut self, ret: i32) -> Self {
        self.ret = ret;
        self
    }

    pub fn with_protocol(mut self, proto: u16) -> Self {
        self.proto = proto;
        self
    }

    pub fn with_bound_dev_if(mut self, bound_dev_if: u32) -> Self {
        self.bound_dev_if = bound_dev_if;
        self
    }

    pub fn with_mount_ns_id(mut self, mount_ns_id: u64) -> Self {
        self.mount_ns_id = mount_ns_id;
        self
    }

    pub fn with_options(mut self, options: BindOptions) -> Self {
        self.opts = options.0;
        self
    }

    pub fn ip_version(&self) -> Option<IpVersion> {
        IpVersion::from_raw(self.ver)
    }

    pub fn options(&self) -> BindOptions {
        BindOptions(self.opts)
    }

    pub fn ip_addr(&self) -> Option<IpAddr> {
        match self.ip_version()? {
            IpVersion::V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.addr[..4]);
                Some(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            IpVersion::V6 => Some(IpAddr::V6(Ipv6Addr::from(self.addr))),
        }
    }

    pub fn command_as_str(&self) -> &str {
        let end = self
            .task
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.task.len());
        core::str::from_utf8(&self.task[..end]).unwrap_or("<invalid>")
    }
}

impl Default for BindEvent {
    fn default() -> Self {
        Self::new()
    }
}
