//! Error types for bindsnoop

use bindsnoop_common::programs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BindsnoopError {
    #[error("eBPF program failed to attach: {program_name} - {source}")]
    EbpfAttachmentFailed {
        program_name: String,
        source: anyhow::Error,
    },

    #[error("eBPF program failed to load: {program_name} - {source}")]
    EbpfLoadFailed {
        program_name: String,
        source: anyhow::Error,
    },

    #[error("Invalid probe type: {probe_type}. Valid types: {valid_types:?}")]
    InvalidProbeType {
        probe_type: String,
        valid_types: Vec<String>,
    },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Probe already attached: {probe_type}")]
    ProbeAlreadyAttached { probe_type: ProbeType },

    #[error("Probe not found: {probe_type}")]
    ProbeNotFound { probe_type: ProbeType },

    #[error("eBPF map not found: {map_name}")]
    MapNotFound { map_name: String },

    #[error("eBPF map update failed: {map_name} - {source}")]
    MapUpdateFailed {
        map_name: String,
        source: anyhow::Error,
    },

    #[error("Kernel BTF error: {message}")]
    KernelBtf { message: String },

    #[error("Event parsing error: {message}")]
    EventParsing { message: String },

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A kprobe/kretprobe pair on one of the bind entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProbeType {
    #[serde(rename = "ipv4")]
    Ipv4Bind,
    #[serde(rename = "ipv6")]
    Ipv6Bind,
}

impl ProbeType {
    pub fn all() -> Vec<ProbeType> {
        vec![Self::Ipv4Bind, Self::Ipv6Bind]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Ipv4Bind => "ipv4",
            ProbeType::Ipv6Bind => "ipv6",
        }
    }

    /// Kernel function both programs of the pair attach to.
    pub fn target(&self) -> &'static str {
        match self {
            ProbeType::Ipv4Bind => programs::IPV4_TARGET,
            ProbeType::Ipv6Bind => programs::IPV6_TARGET,
        }
    }

    pub fn entry_program(&self) -> &'static str {
        match self {
            ProbeType::Ipv4Bind => programs::IPV4_ENTRY,
            ProbeType::Ipv6Bind => programs::IPV6_ENTRY,
        }
    }

    pub fn exit_program(&self) -> &'static str {
        match self {
            ProbeType::Ipv4Bind => programs::IPV4_EXIT,
            ProbeType::Ipv6Bind => programs::IPV6_EXIT,
        }
    }

    /// Parses a `--probe` value, where `all` selects both pairs.
    pub fn parse_selection(s: &str) -> Result<Vec<ProbeType>> {
        if s == "all" {
            return Ok(Self::all());
        }
        s.parse().map(|probe| vec![probe]).map_err(|_| {
            BindsnoopError::InvalidProbeType {
                probe_type: s.to_string(),
                valid_types: vec!["ipv4".to_string(), "ipv6".to_string(), "all".to_string()],
            }
        })
    }
}

impl std::fmt::Display for ProbeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProbeType {
    type Err = BindsnoopError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(ProbeType::Ipv4Bind),
            "ipv6" => Ok(ProbeType::Ipv6Bind),
            _ => Err(BindsnoopError::InvalidProbeType {
                probe_type: s.to_string(),
                valid_types: ProbeType::all()
                    .iter()
                    .map(|p| p.as_str().to_string())
                    .collect(),
            }),
        }
    }
}

pub type Result<T> = std::result::Result<T, BindsnoopError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    mod probe_type_tests {
        use super::*;

        #[test]
        fn should_convert_probe_type_to_string() {
            assert_eq!(ProbeType::Ipv4Bind.as_str(), "ipv4");
            assert_eq!(ProbeType::Ipv6Bind.as_str(), "ipv6");
        }

        #[test]
        fn should_parse_valid_probe_type_from_string() {
            assert_eq!("ipv4".parse::<ProbeType>().unwrap(), ProbeType::Ipv4Bind);
            assert_eq!("ipv6".parse::<ProbeType>().unwrap(), ProbeType::Ipv6Bind);
        }

        #[test]
        fn should_reject_invalid_probe_type_string() {
            let result = "tcp_connect".parse::<ProbeType>();

            assert_matches!(
                result,
                Err(BindsnoopError::InvalidProbeType { probe_type, valid_types })
                    if probe_type == "tcp_connect" && valid_types.len() == 2
            );
        }

        #[test]
        fn should_expand_all_selection() {
            assert_eq!(
                ProbeType::parse_selection("all").unwrap(),
                vec![ProbeType::Ipv4Bind, ProbeType::Ipv6Bind]
            );
            assert_eq!(
                ProbeType::parse_selection("ipv6").unwrap(),
                vec![ProbeType::Ipv6Bind]
            );
            assert_matches!(
                ProbeType::parse_selection("both"),
                Err(BindsnoopError::InvalidProbeType { valid_types, .. }) if valid_types.len() == 3
            );
        }

        #[test]
        fn should_pair_programs_with_bind_entry_points() {
            assert_eq!(ProbeType::Ipv4Bind.target(), "inet_bind");
            assert_eq!(ProbeType::Ipv6Bind.target(), "inet6_bind");
            assert_eq!(ProbeType::Ipv4Bind.entry_program(), "bind_ipv4_entry");
            assert_eq!(ProbeType::Ipv6Bind.exit_program(), "bind_ipv6_exit");
        }
    }
}
