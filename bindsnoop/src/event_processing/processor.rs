//! Event Processor Implementation
//!
//! One tokio task per online CPU drains that CPU's perf buffer, decodes the
//! records and hands them to a bounded channel. Readers never wait on the
//! consumer: when the channel is full the event is dropped and counted.

use crate::event_processing::buffer_manager::{DEFAULT_PAGE_COUNT, DEFAULT_POOL_SIZE};
use crate::event_processing::{BindEventParser, PerfBufferManager};
use aya::maps::{AsyncPerfEventArray, MapData};
use bindsnoop_common::BindEvent;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Counters shared by all reader tasks.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    lost: AtomicU64,
}

impl ProcessorStats {
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Decoded but discarded because the consumer was behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Overwritten in the perf ring before userspace read them.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn record_lost(&self, count: usize) {
        self.lost.fetch_add(count as u64, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Forwarded,
    Dropped,
    Malformed,
    /// The receiver is gone; the reader should stop.
    Closed,
}

#[derive(Clone)]
pub struct EventForwarder {
    tx: mpsc::Sender<BindEvent>,
    stats: Arc<ProcessorStats>,
}

impl EventForwarder {
    pub fn new(tx: mpsc::Sender<BindEvent>, stats: Arc<ProcessorStats>) -> Self {
        Self { tx, stats }
    }

    pub fn forward(&self, buffer: &[u8]) -> ForwardOutcome {
        let event = match BindEventParser::parse(buffer) {
            Ok(event) => event,
            Err(e) => {
                debug!("Discarding perf record: {}", e);
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                return ForwardOutcome::Malformed;
            }
        };

        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                ForwardOutcome::Forwarded
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                ForwardOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => ForwardOutcome::Closed,
        }
    }
}

pub struct BindEventProcessor {
    buffer_manager: PerfBufferManager,
    channel_capacity: usize,
    running: Arc<AtomicBool>,
    stats: Arc<ProcessorStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl BindEventProcessor {
    pub fn new(channel_capacity: usize) -> anyhow::Result<Self> {
        if channel_capacity == 0 {
            return Err(anyhow::anyhow!("Event channel capacity must be non-zero"));
        }
        let buffer_manager = PerfBufferManager::new()?;

        Ok(Self {
            buffer_manager,
            channel_capacity,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ProcessorStats::default()),
            tasks: Vec::new(),
        })
    }

    /// Spawns the per-CPU readers and returns the receiving end of the event
    /// channel.
    pub fn start(
        &mut self,
        mut events: AsyncPerfEventArray<MapData>,
    ) -> anyhow::Result<mpsc::Receiver<BindEvent>> {
        if self.running.load(Ordering::Relaxed) {
            return Err(anyhow::anyhow!("Event processing is already running"));
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let forwarder = EventForwarder::new(tx, self.stats.clone());
        self.running.store(true, Ordering::Relaxed);

        for &cpu_id in self.buffer_manager.online_cpus() {
            let mut buf = match events.open(cpu_id, Some(DEFAULT_PAGE_COUNT)) {
                Ok(buf) => buf,
                Err(e) => {
                    warn!("Failed to open perf buffer for CPU {}: {}", cpu_id, e);
                    continue;
                }
            };

            let mut buffers = self.buffer_manager.create_event_pool(DEFAULT_POOL_SIZE);
            let forwarder = forwarder.clone();
            let running = self.running.clone();
            let stats = self.stats.clone();

            self.tasks.push(tokio::spawn(async move {
                while running.load(Ordering::Relaxed) {
                    let events = match buf.read_events(&mut buffers).await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!("Error reading perf events on CPU {}: {}", cpu_id, e);
                            break;
                        }
                    };
                    if events.lost > 0 {
                        stats.record_lost(events.lost);
                    }
                    for record in buffers.iter().take(events.read) {
                        if forwarder.forward(record) == ForwardOutcome::Closed {
                            return;
                        }
                    }
                }
            }));
        }

        if self.tasks.is_empty() {
            self.running.store(false, Ordering::Relaxed);
            return Err(anyhow::anyhow!("Could not open a perf buffer on any CPU"));
        }

        info!("Event processing started on {} CPUs", self.tasks.len());
        Ok(rx)
    }

    pub fn stop(&mut self) -> anyhow::Result<()> {
        if !self.running.load(Ordering::Relaxed) {
            return Ok(());
        }

        info!("Stopping event processing...");
        self.running.store(false, Ordering::Relaxed);

        for task in self.tasks.drain(..) {
            task.abort();
        }

        info!("Event processing stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }
}

impl Drop for BindEventProcessor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
