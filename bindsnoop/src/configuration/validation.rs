//! Configuration validation logic

use super::Configuration;
use crate::errors::{BindsnoopError, Result};
use bindsnoop_common::{FieldSpec, MAX_MOUNT_NS, MAX_PORTS};

fn config_error(message: impl Into<String>) -> BindsnoopError {
    BindsnoopError::ConfigError {
        message: message.into(),
    }
}

impl Configuration {
    pub fn validate_probe_types(&self) -> Result<()> {
        if self.tracing.probes.is_empty() {
            return Err(config_error("At least one probe type must be specified"));
        }
        Ok(())
    }

    pub fn validate_port_filter(&self) -> Result<()> {
        let ports = &self.filters.ports;
        if ports.contains(&0) {
            return Err(config_error("Port 0 cannot be used as a port filter"));
        }
        if ports.len() > MAX_PORTS as usize {
            return Err(config_error(format!(
                "At most {MAX_PORTS} ports can be filtered, got {}",
                ports.len()
            )));
        }
        if self.filters.filter_by_port && ports.is_empty() {
            return Err(config_error(
                "Port filtering is enabled but no ports were given",
            ));
        }
        Ok(())
    }

    pub fn validate_mount_ns_filter(&self) -> Result<()> {
        if self.filters.mount_ns_ids.len() > MAX_MOUNT_NS as usize {
            return Err(config_error(format!(
                "At most {MAX_MOUNT_NS} mount namespaces can be filtered, got {}",
                self.filters.mount_ns_ids.len()
            )));
        }
        if self.filters_by_mount_ns() && !self.kernel_layout.resolves_mount_ns() {
            return Err(config_error(
                "Mount namespace filtering needs kernel_layout.task_nsproxy, \
                 nsproxy_mnt_ns and mnt_ns_inum; resolve them from BTF \
                 or set them in the configuration",
            ));
        }
        Ok(())
    }

    pub fn validate_kernel_layout(&self) -> Result<()> {
        let layout = &self.kernel_layout;
        let pointers = [
            ("socket_sk", &layout.socket_sk),
            ("task_nsproxy", &layout.task_nsproxy),
            ("nsproxy_mnt_ns", &layout.nsproxy_mnt_ns),
        ];
        let scalars = [
            ("sport", &layout.sport),
            ("bound_dev_if", &layout.bound_dev_if),
            ("protocol", &layout.protocol),
            ("reuse", &layout.reuse),
            ("reuseport", &layout.reuseport),
            ("freebind", &layout.freebind),
            ("transparent", &layout.transparent),
            ("bind_address_no_port", &layout.bind_address_no_port),
            ("mnt_ns_inum", &layout.mnt_ns_inum),
        ];

        for (name, spec) in pointers {
            if spec.is_available() && spec.bits != 64 {
                return Err(config_error(format!(
                    "kernel_layout.{name}: pointers must be 64 bits wide, got {}",
                    spec.bits
                )));
            }
        }
        for (name, spec) in scalars {
            check_scalar(name, spec)?;
        }
        if layout.sport.bits > 16 {
            return Err(config_error(format!(
                "kernel_layout.sport: ports are at most 16 bits wide, got {}",
                layout.sport.bits
            )));
        }
        check_address("saddr_v4", &layout.saddr_v4, 32)?;
        check_address("saddr_v6", &layout.saddr_v6, 128)?;
        Ok(())
    }
}

fn check_scalar(name: &str, spec: &FieldSpec) -> Result<()> {
    if spec.is_available() && spec.shift as u32 + spec.bits as u32 > 32 {
        return Err(config_error(format!(
            "kernel_layout.{name}: shift {} + bits {} exceeds a 32-bit word",
            spec.shift, spec.bits
        )));
    }
    Ok(())
}

fn check_address(name: &str, spec: &FieldSpec, bits: u8) -> Result<()> {
    if spec.is_available() && (spec.bits != bits || spec.shift != 0) {
        return Err(config_error(format!(
            "kernel_layout.{name}: addresses must be {bits} bits at shift 0"
        )));
    }
    Ok(())
}
