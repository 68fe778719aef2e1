//! End-to-end tests from raw perf records to printed lines

use bindsnoop::configuration::OutputFormat;
use bindsnoop::event_processing::BindEventParser;
use bindsnoop::{BindRecord, EventFormatter};
use bindsnoop_common::{BindEvent, BindOptions};
use chrono::{DateTime, Utc};
use std::mem::size_of;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fn as_bytes(event: &BindEvent) -> Vec<u8> {
    let ptr = (event as *const BindEvent).cast::<u8>();
    unsafe { std::slice::from_raw_parts(ptr, size_of::<BindEvent>()) }.to_vec()
}

fn render(event: &BindEvent, verbose: bool, format: OutputFormat) -> String {
    let parsed = BindEventParser::parse(&as_bytes(event)).unwrap();
    let record = BindRecord::from_event(&parsed, None);
    EventFormatter::new(verbose, format)
        .format_record(&record)
        .unwrap()
}

fn web_server_bind() -> BindEvent {
    BindEvent::new()
        .with_pid(2048)
        .with_uid(33)
        .with_gid(33)
        .with_command(b"nginx")
        .with_addr(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        .with_port(80)
        .with_protocol(6)
        .with_options(BindOptions(BindOptions::REUSE_ADDRESS))
}

mod table_output_tests {
    use super::*;

    #[test]
    fn should_render_successful_ipv4_bind() {
        let line = render(&web_server_bind(), false, OutputFormat::Table);

        assert!(line.starts_with("2048"));
        assert!(line.contains("nginx"));
        assert!(line.contains("TCP"));
        assert!(line.contains("...R."));
        assert!(line.ends_with("80 0.0.0.0"));
    }

    #[test]
    fn should_render_failed_ipv6_bind() {
        let event = web_server_bind()
            .with_addr(IpAddr::V6(Ipv6Addr::UNSPECIFIED))
            .with_return_code(-98);

        let line = render(&event, false, OutputFormat::Table);

        assert!(line.contains("-98"));
        assert!(line.ends_with("80 ::"));
    }

    #[test]
    fn should_render_identity_in_verbose_mode() {
        let event = web_server_bind().with_mount_ns_id(4026532198);

        let line = render(&event, true, OutputFormat::Table);

        assert!(line.starts_with("2048    33      33"));
        assert!(line.contains("4026532198"));
    }

    #[test]
    fn should_fall_back_to_unknown_protocol() {
        let event = web_server_bind().with_protocol(0);

        let line = render(&event, false, OutputFormat::Table);

        assert!(line.contains("UNKN"));
    }
}

mod json_output_tests {
    use super::*;

    #[test]
    fn should_render_one_json_object_per_event() {
        let line = render(&web_server_bind(), false, OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["pid"], 2048);
        assert_eq!(value["uid"], 33);
        assert_eq!(value["command"], "nginx");
        assert_eq!(value["ip_version"], 4);
        assert_eq!(value["address"], "0.0.0.0");
        assert_eq!(value["port"], 80);
        assert_eq!(value["return_code"], 0);
        assert_eq!(value["options"], serde_json::json!(["reuse_address"]));
        assert!(value["interface"].is_null());
        assert!(value["time"].is_null());
    }

    #[test]
    fn should_include_wall_clock_time_when_known() {
        let epoch: DateTime<Utc> = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut event = web_server_bind();
        event.timestamp = 1_500_000_000;

        let record = BindRecord::from_event(&event, Some(epoch));
        let line = EventFormatter::new(false, OutputFormat::Json)
            .format_record(&record)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert!(value["time"]
            .as_str()
            .unwrap()
            .starts_with("2025-06-01T12:00:01.5"));
    }
}
