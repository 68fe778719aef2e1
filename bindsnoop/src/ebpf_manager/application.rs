//! eBPF Application Integration
//!
//! Ties a [`Configuration`] to the loaded object: program globals are set
//! before verification, filter maps and the kernel layout are written before
//! any probe is attached, and the drop counters are read back at shutdown.

use super::{BindProbeManager, ProbeManager};
use crate::configuration::Configuration;
use crate::errors::{BindsnoopError, ProbeType, Result};
use aya::{
    maps::{Array, HashMap, PerCpuArray},
    Ebpf, EbpfLoader,
};
use bindsnoop_common::{maps, stats, KernelLayout};
use log::{debug, info};

pub struct EbpfApplication {
    config: Configuration,
    probe_manager: BindProbeManager,
}

impl EbpfApplication {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            probe_manager: BindProbeManager::new(),
        }
    }

    /// Load the object with the configured program globals.
    pub fn load(&self, object: &[u8]) -> Result<Ebpf> {
        let tracer = self.config.tracer_config();
        let target_pid = tracer.target_pid;
        let ignore_errors = u8::from(tracer.ignore_errors);
        let filter_by_port = u8::from(tracer.filter_by_port);
        let filter_by_mntns = u8::from(self.config.filters_by_mount_ns());

        EbpfLoader::new()
            .set_global(maps::TARGET_PID, &target_pid, true)
            .set_global(maps::IGNORE_ERRORS, &ignore_errors, true)
            .set_global(maps::FILTER_BY_PORT, &filter_by_port, true)
            .set_global(maps::FILTER_BY_MNTNS, &filter_by_mntns, true)
            .load(object)
            .map_err(|e| BindsnoopError::EbpfLoadFailed {
                program_name: "bindsnoop".to_string(),
                source: anyhow::anyhow!("Object load failed: {:?}", e),
            })
    }

    /// Write the port and mount namespace allow-lists and the kernel layout.
    pub fn populate_maps(&self, ebpf: &mut Ebpf) -> Result<()> {
        let filters = &self.config.filters;

        let mut ports: HashMap<_, u16, u16> = HashMap::try_from(map_mut(ebpf, maps::PORTS)?)
            .map_err(|e| update_failed(maps::PORTS, e))?;
        for &port in &filters.ports {
            ports
                .insert(port, port, 0)
                .map_err(|e| update_failed(maps::PORTS, e))?;
        }
        debug!("Loaded {} ports into {}", filters.ports.len(), maps::PORTS);

        let mut namespaces: HashMap<_, u64, u32> =
            HashMap::try_from(map_mut(ebpf, maps::MOUNT_NS_SET)?)
                .map_err(|e| update_failed(maps::MOUNT_NS_SET, e))?;
        for &id in &filters.mount_ns_ids {
            namespaces
                .insert(id, 1, 0)
                .map_err(|e| update_failed(maps::MOUNT_NS_SET, e))?;
        }
        debug!(
            "Loaded {} mount namespaces into {}",
            filters.mount_ns_ids.len(),
            maps::MOUNT_NS_SET
        );

        let mut layout: Array<_, KernelLayout> =
            Array::try_from(map_mut(ebpf, maps::KERNEL_LAYOUT)?)
                .map_err(|e| update_failed(maps::KERNEL_LAYOUT, e))?;
        layout
            .set(0, self.config.kernel_layout, 0)
            .map_err(|e| update_failed(maps::KERNEL_LAYOUT, e))?;

        Ok(())
    }

    pub fn attach_configured_probes(&mut self, ebpf: &mut Ebpf) -> Result<()> {
        let probes = self.config.tracing.probes.clone();
        self.probe_manager.attach_multiple(ebpf, &probes)
    }

    pub fn detach_all_probes(&mut self, ebpf: &mut Ebpf) -> Result<()> {
        self.probe_manager.detach_all(ebpf)
    }

    pub fn is_probe_attached(&self, probe_type: ProbeType) -> bool {
        self.probe_manager.is_attached(probe_type)
    }

    pub fn get_probe_summary(&self) -> ProbeSummary {
        ProbeSummary {
            total_probe_types: self.config.tracing.probes.len(),
            attached_probe_types: self.probe_manager.attached_probes().len(),
            probe_types: self.config.tracing.probes.clone(),
        }
    }

    pub fn is_ready_for_monitoring(&self) -> bool {
        !self.config.tracing.probes.is_empty()
            && self
                .config
                .tracing
                .probes
                .iter()
                .all(|&probe_type| self.probe_manager.is_attached(probe_type))
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Programs that must be present in the object for the current
    /// configuration.
    pub fn required_program_names(&self) -> Vec<&'static str> {
        let mut programs = Vec::new();
        for &probe_type in &self.config.tracing.probes {
            programs.extend(self.probe_manager.program_names(probe_type));
        }
        programs.sort();
        programs.dedup();
        programs
    }

    /// Bind calls the entry probes could not record, summed over all CPUs.
    pub fn pending_table_drops(&self, ebpf: &Ebpf) -> Result<u64> {
        let map = ebpf.map(maps::STATS).ok_or_else(|| BindsnoopError::MapNotFound {
            map_name: maps::STATS.to_string(),
        })?;
        let counters: PerCpuArray<_, u64> =
            PerCpuArray::try_from(map).map_err(|e| update_failed(maps::STATS, e))?;
        let values = counters
            .get(&stats::PENDING_TABLE_FULL, 0)
            .map_err(|e| update_failed(maps::STATS, e))?;
        let total: u64 = values.iter().sum();
        if total > 0 {
            info!("{} bind calls were not traced: pending-call table full", total);
        }
        Ok(total)
    }
}

fn map_mut<'a>(ebpf: &'a mut Ebpf, name: &str) -> Result<&'a mut aya::maps::Map> {
    ebpf.map_mut(name).ok_or_else(|| BindsnoopError::MapNotFound {
        map_name: name.to_string(),
    })
}

fn update_failed(map_name: &str, e: aya::maps::MapError) -> BindsnoopError {
    BindsnoopError::MapUpdateFailed {
        map_name: map_name.to_string(),
        source: anyhow::anyhow!("{:?}", e),
    }
}

#[derive(Debug, PartialEq)]
pub struct ProbeSummary {
    pub total_probe_types: usize,
    pub attached_probe_types: usize,
    pub probe_types: Vec<ProbeType>,
}
