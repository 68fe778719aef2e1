//! Event Processing Module
//!
//! Moves [`BindEvent`](bindsnoop_common::BindEvent) records from the per-CPU
//! perf buffers to the printer.
//!
//! Key components:
//! - PerfBufferManager: online CPU detection and buffer pools
//! - BindEventParser: size-checked decoding of raw perf records
//! - BindEventProcessor: one reader task per CPU feeding a bounded channel

pub mod buffer_manager;
pub mod parser;
pub mod processor;

pub use buffer_manager::PerfBufferManager;
pub use parser::BindEventParser;
pub use processor::{BindEventProcessor, EventForwarder, ForwardOutcome, ProcessorStats};
