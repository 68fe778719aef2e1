//! Configuration type definitions

use crate::errors::{BindsnoopError, ProbeType};
use crate::kernel_btf::VMLINUX_BTF_PATH;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tracing {
    /// `0` traces every process.
    pub target_pid: u32,
    pub ignore_errors: bool,
    pub probes: Vec<ProbeType>,
    /// Seconds; `None` runs until interrupted.
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Filters {
    pub filter_by_port: bool,
    pub ports: Vec<u16>,
    /// Mount namespace inode numbers; an empty list disables the filter.
    pub mount_ns_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Output {
    pub verbose: bool,
    pub format: OutputFormat,
}

/// Where kernel structure offsets come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Btf {
    /// Resolve `kernel_layout` from kernel type information at startup;
    /// resolved fields replace configured ones.
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for Btf {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(VMLINUX_BTF_PATH),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = BindsnoopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(BindsnoopError::ConfigError {
                message: format!("Unknown output format: {s} (expected table or json)"),
            }),
        }
    }
}

impl Default for Tracing {
    fn default() -> Self {
        Self {
            target_pid: 0,
            ignore_errors: true,
            probes: ProbeType::all(),
            duration: None,
        }
    }
}
