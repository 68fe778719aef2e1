//! Perf Buffer Management
//!
//! Perf buffers are per-CPU; every online CPU gets its own reader and its
//! own pool of receive buffers.

use aya::util::online_cpus;
use bindsnoop_common::BindEvent;
use bytes::BytesMut;
use log::warn;
use std::mem::size_of;

/// Pages per CPU for the perf ring.
pub const DEFAULT_PAGE_COUNT: usize = 64;
/// Receive buffers per CPU reader.
pub const DEFAULT_POOL_SIZE: usize = 16;

pub struct PerfBufferManager {
    cpus: Vec<u32>,
}

impl PerfBufferManager {
    pub fn new() -> anyhow::Result<Self> {
        let cpus = Self::detect_online_cpus()?;
        Ok(Self { cpus })
    }

    /// Get the list of online CPUs
    pub fn online_cpus(&self) -> &[u32] {
        &self.cpus
    }

    /// Buffers sized for one [`BindEvent`] record each.
    pub fn create_event_pool(&self, pool_size: usize) -> Vec<BytesMut> {
        self.create_buffer_pool(size_of::<BindEvent>(), pool_size)
    }

    pub fn create_buffer_pool(&self, buffer_size: usize, pool_size: usize) -> Vec<BytesMut> {
        (0..pool_size)
            .map(|_| BytesMut::with_capacity(buffer_size))
            .collect()
    }

    fn detect_online_cpus() -> anyhow::Result<Vec<u32>> {
        match online_cpus() {
            Ok(cpus) => {
                if cpus.is_empty() {
                    warn!("No online CPUs detected, defaulting to CPU 0");
                    Ok(vec![0])
                } else {
                    Ok(cpus)
                }
            }
            Err(e) => {
                warn!("Failed to detect online CPUs: {:?}, defaulting to CPU 0", e);
                Ok(vec![0])
            }
        }
    }
}

impl Default for PerfBufferManager {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self { cpus: vec![0] })
    }
}
