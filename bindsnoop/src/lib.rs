use clap::Parser;
use std::path::PathBuf;

pub mod configuration;
pub mod ebpf_manager;
pub mod errors;
pub mod event_processing;
pub mod kernel_btf;
pub mod output;
pub mod record;

pub use output::EventFormatter;
pub use record::BindRecord;

#[derive(Debug, Clone, Default, Parser)]
#[clap(name = "bindsnoop", about = "Trace IPv4 and IPv6 bind() system calls")]
pub struct Args {
    #[clap(short, long, help = "Trace this process ID only")]
    pub pid: Option<u32>,

    #[clap(
        short = 'P',
        long,
        value_delimiter = ',',
        help = "Comma-separated list of local ports to trace"
    )]
    pub ports: Vec<u16>,

    #[clap(short = 'x', long, help = "Include failed bind calls")]
    pub include_failed: bool,

    #[clap(
        long,
        value_delimiter = ',',
        help = "Comma-separated list of mount namespace IDs to trace"
    )]
    pub mntns: Vec<u64>,

    #[clap(long, help = "Entry points to trace: ipv4, ipv6 or all")]
    pub probe: Option<String>,

    #[clap(short, long, help = "Duration to run the tracer in seconds")]
    pub duration: Option<u64>,

    #[clap(short, long, help = "Show UID, GID, device and mount namespace")]
    pub verbose: bool,

    #[clap(long, help = "Print one JSON object per event")]
    pub json: bool,

    #[clap(short, long, help = "Configuration file path (YAML, JSON or TOML)")]
    pub config: Option<PathBuf>,

    #[clap(long, help = "Kernel BTF used to resolve structure offsets")]
    pub btf: Option<PathBuf>,

    #[clap(long, help = "Use the configured kernel layout without reading BTF")]
    pub no_btf: bool,
}

pub fn extract_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}
