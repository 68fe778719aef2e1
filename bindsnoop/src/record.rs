//! Decoded view of a [`BindEvent`] for printing and serialisation.

use crate::extract_string;
use bindsnoop_common::{BindEvent, BindOptions};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::ffi::CStr;
use std::net::{IpAddr, Ipv4Addr};

const IPPROTO_TCP: u16 = 6;
const IPPROTO_UDP: u16 = 17;
const IPPROTO_SCTP: u16 = 132;

const OPTION_NAMES: [(u8, char, &str); 5] = [
    (BindOptions::FREEBIND, 'F', "freebind"),
    (BindOptions::TRANSPARENT, 'T', "transparent"),
    (BindOptions::BIND_ADDRESS_NO_PORT, 'N', "bind_address_no_port"),
    (BindOptions::REUSE_ADDRESS, 'R', "reuse_address"),
    (BindOptions::REUSE_PORT, 'r', "reuse_port"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindRecord {
    pub time: Option<DateTime<Utc>>,
    pub timestamp_us: u64,
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    pub command: String,
    pub ip_version: u8,
    pub address: IpAddr,
    pub port: u16,
    pub protocol: String,
    pub return_code: i32,
    pub bound_dev_if: u32,
    pub interface: Option<String>,
    pub mount_ns_id: u64,
    pub options: Vec<&'static str>,
    #[serde(skip)]
    pub raw_options: BindOptions,
}

impl BindRecord {
    /// `boot_epoch` is the wall-clock time of boot, used to place the
    /// event's boot-relative timestamp; see [`boot_epoch`].
    pub fn from_event(event: &BindEvent, boot_epoch: Option<DateTime<Utc>>) -> Self {
        let options = event.options();
        let nanos = i64::try_from(event.timestamp).ok();
        let time = boot_epoch
            .zip(nanos)
            .and_then(|(epoch, nanos)| epoch.checked_add_signed(TimeDelta::nanoseconds(nanos)));

        Self {
            time,
            timestamp_us: event.ts_us,
            pid: event.pid,
            uid: event.uid,
            gid: event.gid,
            command: extract_string(&event.task),
            ip_version: event.ver,
            address: event
                .ip_addr()
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: event.port,
            protocol: protocol_name(event.proto),
            return_code: event.ret,
            bound_dev_if: event.bound_dev_if,
            interface: interface_name(event.bound_dev_if),
            mount_ns_id: event.mount_ns_id,
            options: OPTION_NAMES
                .iter()
                .filter(|(flag, _, _)| options.contains(*flag))
                .map(|(_, _, name)| *name)
                .collect(),
            raw_options: options,
        }
    }

    /// Compact flag column, e.g. `F..R.`.
    pub fn options_short(&self) -> String {
        OPTION_NAMES
            .iter()
            .map(|(flag, short, _)| {
                if self.raw_options.contains(*flag) {
                    *short
                } else {
                    '.'
                }
            })
            .collect()
    }
}

pub fn protocol_name(proto: u16) -> String {
    match proto {
        IPPROTO_TCP => "TCP".to_string(),
        IPPROTO_UDP => "UDP".to_string(),
        IPPROTO_SCTP => "SCTP".to_string(),
        0 => "UNKN".to_string(),
        other => other.to_string(),
    }
}

/// Name of the interface a socket is bound to, if any.
pub fn interface_name(index: u32) -> Option<String> {
    if index == 0 {
        return None;
    }
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    let ret = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
    if ret.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

/// Wall-clock time at which `CLOCK_BOOTTIME` was zero.
pub fn boot_epoch() -> Option<DateTime<Utc>> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(libc::CLOCK_BOOTTIME, &mut ts) } != 0 {
        return None;
    }
    let since_boot = TimeDelta::try_seconds(ts.tv_sec as i64)?
        .checked_add(&TimeDelta::nanoseconds(ts.tv_nsec as i64))?;
    Utc::now().checked_sub_signed(since_boot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn sample_event() -> BindEvent {
        BindEvent::new()
            .with_pid(4242)
            .with_uid(1000)
            .with_gid(1000)
            .with_command(b"nginx")
            .with_addr(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))
            .with_port(80)
            .with_protocol(IPPROTO_TCP)
    }

    #[test]
    fn should_decode_ipv4_event() {
        let record = BindRecord::from_event(&sample_event(), None);

        assert_eq!(record.pid, 4242);
        assert_eq!(record.command, "nginx");
        assert_eq!(record.address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(record.protocol, "TCP");
        assert_eq!(record.interface, None);
        assert!(record.time.is_none());
    }

    #[test]
    fn should_decode_ipv6_address() {
        let event = sample_event().with_addr(IpAddr::V6(Ipv6Addr::LOCALHOST));

        let record = BindRecord::from_event(&event, None);

        assert_eq!(record.ip_version, 6);
        assert_eq!(record.address, IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn should_name_options() {
        let event = sample_event().with_options(BindOptions(
            BindOptions::FREEBIND | BindOptions::REUSE_PORT,
        ));

        let record = BindRecord::from_event(&event, None);

        assert_eq!(record.options, vec!["freebind", "reuse_port"]);
        assert_eq!(record.options_short(), "F...r");
    }

    #[test]
    fn should_place_event_on_wall_clock() {
        let epoch = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut event = sample_event();
        event.timestamp = 90_000_000_000;

        let record = BindRecord::from_event(&event, Some(epoch));

        assert_eq!(
            record.time.unwrap().to_rfc3339(),
            "2024-01-01T00:01:30+00:00"
        );
    }

    #[test]
    fn should_name_known_protocols() {
        assert_eq!(protocol_name(6), "TCP");
        assert_eq!(protocol_name(17), "UDP");
        assert_eq!(protocol_name(132), "SCTP");
        assert_eq!(protocol_name(0), "UNKN");
        assert_eq!(protocol_name(262), "262");
    }

    #[test]
    fn should_not_resolve_unbound_interface() {
        assert_eq!(interface_name(0), None);
    }

    #[test]
    fn should_compute_boot_epoch_in_the_past() {
        let epoch = boot_epoch().unwrap();

        assert!(epoch <= Utc::now());
    }
}
