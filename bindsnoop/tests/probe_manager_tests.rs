//! Tests for probe selection and attachment bookkeeping

use assert_matches::assert_matches;
use bindsnoop::configuration::Configuration;
use bindsnoop::ebpf_manager::{BindProbeManager, EbpfApplication, ProbeManager, ProbeSummary};
use bindsnoop::errors::{BindsnoopError, ProbeType};
use bindsnoop_common::programs;

mod probe_type_tests {
    use super::*;

    #[test]
    fn should_map_probe_types_to_kernel_functions() {
        assert_eq!(ProbeType::Ipv4Bind.target(), programs::IPV4_TARGET);
        assert_eq!(ProbeType::Ipv6Bind.target(), programs::IPV6_TARGET);
        assert_eq!(ProbeType::Ipv4Bind.target(), "inet_bind");
        assert_eq!(ProbeType::Ipv6Bind.target(), "inet6_bind");
    }

    #[test]
    fn should_pair_entry_and_exit_programs() {
        assert_eq!(ProbeType::Ipv4Bind.entry_program(), programs::IPV4_ENTRY);
        assert_eq!(ProbeType::Ipv4Bind.exit_program(), programs::IPV4_EXIT);
        assert_eq!(ProbeType::Ipv6Bind.entry_program(), programs::IPV6_ENTRY);
        assert_eq!(ProbeType::Ipv6Bind.exit_program(), programs::IPV6_EXIT);
    }

    #[test]
    fn should_parse_probe_selection() {
        assert_eq!(
            ProbeType::parse_selection("all").unwrap(),
            vec![ProbeType::Ipv4Bind, ProbeType::Ipv6Bind]
        );
        assert_eq!(
            ProbeType::parse_selection("ipv6").unwrap(),
            vec![ProbeType::Ipv6Bind]
        );
        assert_matches!(
            ProbeType::parse_selection("udp"),
            Err(BindsnoopError::InvalidProbeType { .. })
        );
    }

    #[test]
    fn should_round_trip_display_and_from_str() {
        for probe_type in ProbeType::all() {
            let parsed: ProbeType = probe_type.to_string().parse().unwrap();

            assert_eq!(parsed, probe_type);
        }
    }
}

mod manager_tests {
    use super::*;

    #[test]
    fn should_start_with_nothing_attached() {
        let manager = BindProbeManager::default();

        assert!(manager.attached_probes().is_empty());
        for probe_type in ProbeType::all() {
            assert!(!manager.is_attached(probe_type));
        }
    }

    #[test]
    fn should_list_two_programs_per_probe_type() {
        let manager = BindProbeManager::new();

        for probe_type in ProbeType::all() {
            let names = manager.program_names(probe_type);

            assert_eq!(names.len(), 2);
            assert!(names.contains(&probe_type.entry_program()));
            assert!(names.contains(&probe_type.exit_program()));
        }
    }
}

mod application_tests {
    use super::*;

    fn app_for(args: &[&str]) -> EbpfApplication {
        let config = Configuration::builder()
            .from_cli_args(args)
            .unwrap()
            .build()
            .unwrap();
        EbpfApplication::new(config)
    }

    #[test]
    fn should_summarize_selected_probes() {
        let app = app_for(&["--probe", "ipv6"]);

        assert_eq!(
            app.get_probe_summary(),
            ProbeSummary {
                total_probe_types: 1,
                attached_probe_types: 0,
                probe_types: vec![ProbeType::Ipv6Bind],
            }
        );
    }

    #[test]
    fn should_require_only_selected_programs() {
        let app = app_for(&["--probe", "ipv4"]);

        assert_eq!(
            app.required_program_names(),
            vec!["bind_ipv4_entry", "bind_ipv4_exit"]
        );
    }

    #[test]
    fn should_not_be_ready_before_attaching() {
        let app = app_for(&[]);

        assert!(!app.is_ready_for_monitoring());
    }

    #[test]
    fn should_keep_configuration() {
        let app = app_for(&["--pid", "99", "--ports", "53"]);

        assert_eq!(app.config().tracing.target_pid, 99);
        assert_eq!(app.config().filters.ports, vec![53]);
    }
}
