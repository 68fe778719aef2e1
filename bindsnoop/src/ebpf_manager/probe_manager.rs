//! Core ProbeManager trait definition

use crate::errors::{ProbeType, Result};
use aya::Ebpf;
use std::collections::HashSet;

/// Loading, attaching and detaching of the programs behind each
/// [`ProbeType`].
pub trait ProbeManager {
    /// Load the programs of `probe_type` and attach them to their kernel
    /// function. Fails if the probe is already attached.
    fn attach(&mut self, ebpf: &mut Ebpf, probe_type: ProbeType) -> Result<()>;

    /// Detach the links created by [`ProbeManager::attach`].
    fn detach(&mut self, ebpf: &mut Ebpf, probe_type: ProbeType) -> Result<()>;

    fn is_attached(&self, probe_type: ProbeType) -> bool;

    fn attached_probes(&self) -> &HashSet<ProbeType>;

    /// Names of the programs backing `probe_type`.
    fn program_names(&self, probe_type: ProbeType) -> Vec<&'static str>;
}
