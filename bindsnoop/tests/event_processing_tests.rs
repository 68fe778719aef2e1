//! Tests for moving raw perf records to the printer

use assert_matches::assert_matches;
use bindsnoop::errors::BindsnoopError;
use bindsnoop::event_processing::{
    BindEventParser, BindEventProcessor, EventForwarder, ForwardOutcome, PerfBufferManager,
    ProcessorStats,
};
use bindsnoop_common::{BindEvent, BindOptions};
use std::mem::size_of;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tokio::sync::mpsc;

fn as_bytes(event: &BindEvent) -> Vec<u8> {
    let ptr = (event as *const BindEvent).cast::<u8>();
    unsafe { std::slice::from_raw_parts(ptr, size_of::<BindEvent>()) }.to_vec()
}

fn sample_event(pid: u32) -> BindEvent {
    BindEvent::new()
        .with_pid(pid)
        .with_uid(1000)
        .with_gid(1000)
        .with_command(b"python3")
        .with_addr(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
        .with_port(8080)
        .with_protocol(6)
}

mod parser_tests {
    use super::*;

    #[test]
    fn should_decode_every_field() {
        let event = BindEvent::new()
            .with_pid(77)
            .with_command(b"named")
            .with_addr(IpAddr::V6(Ipv6Addr::LOCALHOST))
            .with_port(53)
            .with_protocol(17)
            .with_return_code(-98)
            .with_bound_dev_if(2)
            .with_mount_ns_id(4026531840)
            .with_options(BindOptions(BindOptions::REUSE_ADDRESS));

        let parsed = BindEventParser::parse(&as_bytes(&event)).unwrap();

        assert_eq!(parsed.pid, 77);
        assert_eq!(parsed.command_as_str(), "named");
        assert_eq!(parsed.ip_addr(), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(parsed.port, 53);
        assert_eq!(parsed.proto, 17);
        assert_eq!(parsed.ret, -98);
        assert_eq!(parsed.bound_dev_if, 2);
        assert_eq!(parsed.mount_ns_id, 4026531840);
        assert!(parsed.options().reuse_address());
        assert!(!parsed.options().reuse_port());
    }

    #[test]
    fn should_reject_truncated_record() {
        let bytes = as_bytes(&sample_event(1));

        let result = BindEventParser::parse(&bytes[..bytes.len() - 1]);

        assert_matches!(result, Err(BindsnoopError::EventParsing { message }) if message.contains("smaller"));
    }
}

mod forwarder_tests {
    use super::*;

    #[tokio::test]
    async fn should_deliver_events_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let stats = Arc::new(ProcessorStats::default());
        let forwarder = EventForwarder::new(tx, stats.clone());

        for pid in 1..=3 {
            assert_eq!(
                forwarder.forward(&as_bytes(&sample_event(pid))),
                ForwardOutcome::Forwarded
            );
        }

        for pid in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().pid, pid);
        }
        assert_eq!(stats.forwarded(), 3);
    }

    #[test]
    fn should_never_block_on_a_slow_consumer() {
        let (tx, mut rx) = mpsc::channel(2);
        let stats = Arc::new(ProcessorStats::default());
        let forwarder = EventForwarder::new(tx, stats.clone());

        for pid in 0..10 {
            forwarder.forward(&as_bytes(&sample_event(pid)));
        }

        assert_eq!(stats.forwarded(), 2);
        assert_eq!(stats.dropped(), 8);
        assert_eq!(rx.try_recv().unwrap().pid, 0);
        assert_eq!(rx.try_recv().unwrap().pid, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn should_share_stats_between_clones() {
        let (tx, _rx) = mpsc::channel(16);
        let stats = Arc::new(ProcessorStats::default());
        let forwarder = EventForwarder::new(tx, stats.clone());
        let other = forwarder.clone();

        forwarder.forward(&as_bytes(&sample_event(1)));
        other.forward(&as_bytes(&sample_event(2)));
        other.forward(&[]);

        assert_eq!(stats.forwarded(), 2);
        assert_eq!(stats.malformed(), 1);
    }
}

mod buffer_tests {
    use super::*;

    #[test]
    fn should_detect_online_cpus() {
        let manager = PerfBufferManager::new().unwrap();

        assert!(!manager.online_cpus().is_empty());
    }

    #[test]
    fn should_size_event_pool_for_bind_events() {
        let manager = PerfBufferManager::new().unwrap();

        let pool = manager.create_event_pool(4);

        assert_eq!(pool.len(), 4);
        assert!(pool
            .iter()
            .all(|buffer| buffer.capacity() >= size_of::<BindEvent>()));
    }

    #[test]
    fn should_start_processor_stopped() {
        let processor = BindEventProcessor::new(64).unwrap();

        assert!(!processor.is_running());
        assert_eq!(processor.stats().lost(), 0);
        assert_eq!(processor.stats().dropped(), 0);
    }
}
