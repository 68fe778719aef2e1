//! Configuration Builder
//!
//! Merges a configuration file and command line flags into a
//! [`Configuration`]. Later sources override earlier ones field by field.

use super::{Configuration, OutputFormat};
use crate::errors::{BindsnoopError, ProbeType, Result};
use crate::kernel_btf::KernelBtf;
use crate::Args;
use clap::Parser;
use log::{debug, warn};
use std::fs;
use std::path::Path;

#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure from command line arguments, without the program name.
    pub fn from_cli_args(self, args: &[&str]) -> Result<Self> {
        let args = Args::try_parse_from(std::iter::once("bindsnoop").chain(args.iter().copied()))
            .map_err(|e| BindsnoopError::ConfigError {
                message: e.to_string(),
            })?;
        self.from_args(&args)
    }

    /// Apply parsed arguments. A `--config` file is loaded first so that
    /// flags on the command line take precedence over it.
    pub fn from_args(mut self, args: &Args) -> Result<Self> {
        if let Some(path) = &args.config {
            self = self.from_config_file(path)?;
        }

        let config = &mut self.config;
        if let Some(pid) = args.pid {
            config.tracing.target_pid = pid;
        }
        if !args.ports.is_empty() {
            config.filters.ports = args.ports.clone();
            config.filters.filter_by_port = true;
        }
        if args.include_failed {
            config.tracing.ignore_errors = false;
        }
        if !args.mntns.is_empty() {
            config.filters.mount_ns_ids = args.mntns.clone();
        }
        if let Some(probe) = &args.probe {
            config.tracing.probes = ProbeType::parse_selection(probe)?;
        }
        if let Some(duration) = args.duration {
            if duration == 0 {
                return Err(BindsnoopError::ConfigError {
                    message: "Duration must be at least one second".to_string(),
                });
            }
            config.tracing.duration = Some(duration);
        }
        if args.verbose {
            config.output.verbose = true;
        }
        if args.json {
            config.output.format = OutputFormat::Json;
        }
        if let Some(path) = &args.btf {
            config.btf.path = path.clone();
        }
        if args.no_btf {
            config.btf.enabled = false;
        }

        Ok(self)
    }

    /// Configure from a YAML, JSON or TOML file, chosen by extension.
    pub fn from_config_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| BindsnoopError::ConfigError {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => self.from_json_str(&content),
            Some("toml") => self.from_toml_str(&content),
            _ if content.trim_start().starts_with('{') => self.from_json_str(&content),
            _ => self.from_yaml_str(&content),
        }
    }

    pub fn from_yaml_str(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml).map_err(|e| BindsnoopError::ConfigError {
            message: format!("Failed to parse YAML config: {}", e),
        })?;
        Ok(self)
    }

    pub fn from_json_str(mut self, json: &str) -> Result<Self> {
        self.config = serde_json::from_str(json).map_err(|e| BindsnoopError::ConfigError {
            message: format!("Failed to parse JSON config: {}", e),
        })?;
        Ok(self)
    }

    pub fn from_toml_str(mut self, toml: &str) -> Result<Self> {
        self.config = toml::from_str(toml).map_err(|e| BindsnoopError::ConfigError {
            message: format!("Failed to parse TOML config: {}", e),
        })?;
        Ok(self)
    }

    /// Replace kernel layout fields with the offsets described by the
    /// kernel's BTF. Without readable BTF the configured layout is kept.
    pub fn resolve_kernel_layout(mut self) -> Self {
        let btf = &self.config.btf;
        if !btf.enabled {
            return self;
        }

        match KernelBtf::from_file(&btf.path) {
            Ok(kernel) => {
                let resolved = kernel.resolve_layout(&self.config.kernel_layout);
                if !resolved.missing.is_empty() {
                    warn!(
                        "Kernel BTF does not describe {}; using configured offsets",
                        resolved.missing.join(", ")
                    );
                }
                debug!("Kernel layout resolved from {}", btf.path.display());
                self.config.kernel_layout = resolved.layout;
            }
            Err(e) => warn!("{}; using configured kernel layout", e),
        }
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<Configuration> {
        self.config.validate()?;
        Ok(self.config)
    }
}
