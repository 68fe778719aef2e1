//! eBPF Probe Management
//!
//! Loading the object, filling its maps and attaching the bind probes.

pub mod application;
pub mod bind_probe_manager;
pub mod probe_manager;

pub use application::{EbpfApplication, ProbeSummary};
pub use bind_probe_manager::BindProbeManager;
pub use probe_manager::ProbeManager;
