//! Bind Probe Manager
//!
//! Attaches the entry kprobe and the return kretprobe of each bind entry
//! point. The return probe is attached first so that no call recorded by the
//! entry probe can return unobserved.

use super::probe_manager::ProbeManager;
use crate::errors::{BindsnoopError, ProbeType, Result};
use aya::{
    programs::{kprobe::KProbeLinkId, KProbe},
    Ebpf,
};
use log::info;
use std::collections::{HashMap, HashSet};

pub struct BindProbeManager {
    attached_probes: HashSet<ProbeType>,
    links: HashMap<ProbeType, Vec<(&'static str, KProbeLinkId)>>,
}

impl BindProbeManager {
    pub fn new() -> Self {
        Self {
            attached_probes: HashSet::new(),
            links: HashMap::new(),
        }
    }

    pub fn attach_multiple(&mut self, ebpf: &mut Ebpf, probe_types: &[ProbeType]) -> Result<()> {
        for &probe_type in probe_types {
            self.attach(ebpf, probe_type)?;
        }
        Ok(())
    }

    pub fn detach_all(&mut self, ebpf: &mut Ebpf) -> Result<()> {
        let mut probe_types: Vec<ProbeType> = self.attached_probes.iter().copied().collect();
        probe_types.sort();
        for probe_type in probe_types {
            self.detach(ebpf, probe_type)?;
        }
        Ok(())
    }

    fn program<'a>(ebpf: &'a mut Ebpf, program_name: &'static str) -> Result<&'a mut KProbe> {
        ebpf.program_mut(program_name)
            .ok_or_else(|| BindsnoopError::EbpfLoadFailed {
                program_name: program_name.to_string(),
                source: anyhow::anyhow!("Program not found in object file"),
            })?
            .try_into()
            .map_err(|e| BindsnoopError::EbpfLoadFailed {
                program_name: program_name.to_string(),
                source: anyhow::anyhow!("Failed to convert to KProbe: {:?}", e),
            })
    }

    fn load_and_attach(
        ebpf: &mut Ebpf,
        program_name: &'static str,
        target: &str,
    ) -> Result<KProbeLinkId> {
        let program = Self::program(ebpf, program_name)?;

        program.load().map_err(|e| BindsnoopError::EbpfLoadFailed {
            program_name: program_name.to_string(),
            source: anyhow::anyhow!("Load failed: {:?}", e),
        })?;

        let link_id =
            program
                .attach(target, 0)
                .map_err(|e| BindsnoopError::EbpfAttachmentFailed {
                    program_name: program_name.to_string(),
                    source: anyhow::anyhow!("Attach failed: {:?}", e),
                })?;

        info!("Attached {} to {}", program_name, target);
        Ok(link_id)
    }

    fn detach_link(ebpf: &mut Ebpf, program_name: &'static str, link_id: KProbeLinkId) -> Result<()> {
        Self::program(ebpf, program_name)?
            .detach(link_id)
            .map_err(|e| BindsnoopError::EbpfAttachmentFailed {
                program_name: program_name.to_string(),
                source: anyhow::anyhow!("Detach failed: {:?}", e),
            })
    }
}

impl ProbeManager for BindProbeManager {
    fn attach(&mut self, ebpf: &mut Ebpf, probe_type: ProbeType) -> Result<()> {
        if self.attached_probes.contains(&probe_type) {
            return Err(BindsnoopError::ProbeAlreadyAttached { probe_type });
        }

        let target = probe_type.target();
        let exit = probe_type.exit_program();
        let entry = probe_type.entry_program();

        let exit_link = Self::load_and_attach(ebpf, exit, target)?;
        let entry_link = match Self::load_and_attach(ebpf, entry, target) {
            Ok(link) => link,
            Err(e) => {
                let _ = Self::detach_link(ebpf, exit, exit_link);
                return Err(e);
            }
        };

        self.links
            .insert(probe_type, vec![(entry, entry_link), (exit, exit_link)]);
        self.attached_probes.insert(probe_type);
        Ok(())
    }

    fn detach(&mut self, ebpf: &mut Ebpf, probe_type: ProbeType) -> Result<()> {
        if !self.attached_probes.remove(&probe_type) {
            return Err(BindsnoopError::ProbeNotFound { probe_type });
        }

        for (program_name, link_id) in self.links.remove(&probe_type).unwrap_or_default() {
            Self::detach_link(ebpf, program_name, link_id)?;
        }

        info!("{} bind probes detached", probe_type);
        Ok(())
    }

    fn is_attached(&self, probe_type: ProbeType) -> bool {
        self.attached_probes.contains(&probe_type)
    }

    fn attached_probes(&self) -> &HashSet<ProbeType> {
        &self.attached_probes
    }

    fn program_names(&self, probe_type: ProbeType) -> Vec<&'static str> {
        vec![probe_type.entry_program(), probe_type.exit_program()]
    }
}

impl Default for BindProbeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_create_bind_probe_manager() {
        let manager = BindProbeManager::new();

        assert_eq!(manager.attached_probes().len(), 0);
        assert!(!manager.is_attached(ProbeType::Ipv4Bind));
        assert!(!manager.is_attached(ProbeType::Ipv6Bind));
    }

    #[test]
    fn should_return_correct_program_names() {
        let manager = BindProbeManager::new();

        assert_eq!(
            manager.program_names(ProbeType::Ipv4Bind),
            vec!["bind_ipv4_entry", "bind_ipv4_exit"]
        );
        assert_eq!(
            manager.program_names(ProbeType::Ipv6Bind),
            vec!["bind_ipv6_entry", "bind_ipv6_exit"]
        );
    }
}
