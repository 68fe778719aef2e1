//! Tracer configuration
//!
//! Settings come from a configuration file and the command line, are merged
//! by [`ConfigurationBuilder`] and validated once in `build()`. The result is
//! handed to the loader and never changes afterwards.
//!
//! ```rust
//! use bindsnoop::configuration::Configuration;
//!
//! let config = Configuration::builder()
//!     .from_cli_args(&["--ports", "80,443", "--probe", "ipv4"])
//!     .unwrap()
//!     .build()
//!     .unwrap();
//!
//! assert!(config.filters.filter_by_port);
//! assert_eq!(config.tracer_config().target_pid, 0);
//! ```

pub mod builder;
pub mod types;
pub mod validation;

pub use builder::ConfigurationBuilder;
pub use types::*;

use crate::errors::{ProbeType, Result};
use bindsnoop_common::{KernelLayout, TracerConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Configuration {
    pub tracing: Tracing,
    pub filters: Filters,
    pub output: Output,
    pub btf: Btf,
    /// Offsets of the kernel fields read by the probes. Fields left out of a
    /// configuration file keep their generic defaults until BTF resolution
    /// replaces them.
    pub kernel_layout: KernelLayout,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        self.validate_probe_types()?;
        self.validate_port_filter()?;
        self.validate_mount_ns_filter()?;
        self.validate_kernel_layout()?;
        Ok(())
    }

    /// Settings consumed by the in-kernel handlers.
    pub fn tracer_config(&self) -> TracerConfig {
        TracerConfig {
            target_pid: self.tracing.target_pid,
            ignore_errors: self.tracing.ignore_errors,
            filter_by_port: self.filters.filter_by_port,
        }
    }

    pub fn filters_by_mount_ns(&self) -> bool {
        !self.filters.mount_ns_ids.is_empty()
    }

    pub fn has_probe_type(&self, probe_type: ProbeType) -> bool {
        self.tracing.probes.contains(&probe_type)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.tracing.duration.map(Duration::from_secs)
    }

    pub fn is_verbose(&self) -> bool {
        self.output.verbose
    }
}
