use crate::configuration::OutputFormat;
use crate::errors::Result;
use crate::record::BindRecord;

pub struct EventFormatter {
    verbose: bool,
    format: OutputFormat,
}

impl EventFormatter {
    pub fn new(verbose: bool, format: OutputFormat) -> Self {
        Self { verbose, format }
    }

    /// Column header, or `None` for line-delimited JSON.
    pub fn header(&self) -> Option<String> {
        if self.format == OutputFormat::Json {
            return None;
        }
        Some(if self.verbose {
            format!(
                "{:<7} {:<7} {:<7} {:<16} {:>4} {:<5} {:<5} {:<8} {:<12} {:>5} {}",
                "PID", "UID", "GID", "COMM", "RET", "PROTO", "OPTS", "IF", "MNTNS", "PORT", "ADDR"
            )
        } else {
            format!(
                "{:<7} {:<16} {:>4} {:<5} {:<5} {:>5} {}",
                "PID", "COMM", "RET", "PROTO", "OPTS", "PORT", "ADDR"
            )
        })
    }

    pub fn separator(&self) -> Option<String> {
        self.header().map(|header| "-".repeat(header.len()))
    }

    pub fn format_record(&self, record: &BindRecord) -> Result<String> {
        if self.format == OutputFormat::Json {
            return Ok(serde_json::to_string(record)?);
        }

        let line = if self.verbose {
            let interface = record
                .interface
                .clone()
                .unwrap_or_else(|| record.bound_dev_if.to_string());
            format!(
                "{:<7} {:<7} {:<7} {:<16} {:>4} {:<5} {:<5} {:<8} {:<12} {:>5} {}",
                record.pid,
                record.uid,
                record.gid,
                record.command,
                record.return_code,
                record.protocol,
                record.options_short(),
                interface,
                record.mount_ns_id,
                record.port,
                record.address
            )
        } else {
            format!(
                "{:<7} {:<16} {:>4} {:<5} {:<5} {:>5} {}",
                record.pid,
                record.command,
                record.return_code,
                record.protocol,
                record.options_short(),
                record.port,
                record.address
            )
        };
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindsnoop_common::BindEvent;
    use std::net::{IpAddr, Ipv4Addr};

    fn record() -> BindRecord {
        let event = BindEvent::new()
            .with_pid(31337)
            .with_uid(0)
            .with_command(b"sshd")
            .with_addr(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)))
            .with_port(22)
            .with_protocol(6)
            .with_mount_ns_id(4026531840);
        BindRecord::from_event(&event, None)
    }

    mod event_formatting {
        use super::*;

        #[test]
        fn should_format_header_for_verbose_mode() {
            let formatter = EventFormatter::new(true, OutputFormat::Table);
            let header = formatter.header().unwrap();

            assert!(header.contains("PID"));
            assert!(header.contains("UID"));
            assert!(header.contains("MNTNS"));
            assert!(header.contains("ADDR"));
        }

        #[test]
        fn should_format_header_for_non_verbose_mode() {
            let formatter = EventFormatter::new(false, OutputFormat::Table);
            let header = formatter.header().unwrap();

            assert!(header.contains("PID"));
            assert!(!header.contains("UID"));
            assert!(!header.contains("MNTNS"));
            assert!(header.contains("PORT"));
        }

        #[test]
        fn should_match_separator_to_header() {
            for verbose in [true, false] {
                let formatter = EventFormatter::new(verbose, OutputFormat::Table);

                assert_eq!(
                    formatter.separator().unwrap().len(),
                    formatter.header().unwrap().len()
                );
            }
        }

        #[test]
        fn should_omit_header_for_json() {
            let formatter = EventFormatter::new(true, OutputFormat::Json);

            assert!(formatter.header().is_none());
            assert!(formatter.separator().is_none());
        }

        #[test]
        fn should_format_table_row() {
            let formatter = EventFormatter::new(false, OutputFormat::Table);

            let line = formatter.format_record(&record()).unwrap();

            assert!(line.starts_with("31337"));
            assert!(line.contains("sshd"));
            assert!(line.contains("TCP"));
            assert!(line.contains("....."));
            assert!(line.ends_with("22 10.1.2.3"));
        }

        #[test]
        fn should_include_namespace_in_verbose_row() {
            let formatter = EventFormatter::new(true, OutputFormat::Table);

            let line = formatter.format_record(&record()).unwrap();

            assert!(line.contains("4026531840"));
        }

        #[test]
        fn should_format_json_line() {
            let formatter = EventFormatter::new(false, OutputFormat::Json);

            let line = formatter.format_record(&record()).unwrap();
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();

            assert_eq!(value["pid"], 31337);
            assert_eq!(value["address"], "10.1.2.3");
            assert_eq!(value["port"], 22);
            assert_eq!(value["protocol"], "TCP");
            assert!(value.get("raw_options").is_none());
            assert!(!line.contains('\n'));
        }
    }
}
