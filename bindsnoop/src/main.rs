use std::future;

use aya::maps::AsyncPerfEventArray;
use aya_log::EbpfLogger;
use bindsnoop::{
    configuration::{Configuration, OutputFormat},
    ebpf_manager::EbpfApplication,
    errors::BindsnoopError,
    event_processing::BindEventProcessor,
    record::{boot_epoch, BindRecord},
    Args, EventFormatter,
};
use bindsnoop_common::maps;
use clap::Parser;
use log::{debug, info, warn};
use tokio::{signal, time::sleep};

/// Events buffered between the perf readers and the printer.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::init();

    let config = Configuration::builder()
        .from_args(&args)?
        .resolve_kernel_layout()
        .build()?;
    debug!("Effective configuration: {:?}", config);

    // Bump the memlock rlimit. This is needed for older kernels that don't use the
    // new memcg based accounting, see https://lwn.net/Articles/837122/
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {ret}");
    }

    let mut app = EbpfApplication::new(config.clone());
    let mut ebpf = app.load(aya::include_bytes_aligned!(concat!(
        env!("OUT_DIR"),
        "/bindsnoop"
    )))?;

    if let Err(e) = EbpfLogger::init(&mut ebpf) {
        warn!("failed to initialize eBPF logger: {e}");
    }

    app.populate_maps(&mut ebpf)?;
    app.attach_configured_probes(&mut ebpf)?;

    let events = ebpf
        .take_map(maps::EVENTS)
        .ok_or_else(|| BindsnoopError::MapNotFound {
            map_name: maps::EVENTS.to_string(),
        })?;
    let events = AsyncPerfEventArray::try_from(events)?;

    let mut processor = BindEventProcessor::new(EVENT_CHANNEL_CAPACITY)?;
    let mut rx = processor.start(events)?;

    let formatter = EventFormatter::new(config.is_verbose(), config.output.format);
    if config.output.format == OutputFormat::Table {
        let probes: Vec<&str> = config.tracing.probes.iter().map(|p| p.as_str()).collect();
        println!("bindsnoop started, tracing {}", probes.join(", "));
        if config.tracing.target_pid != 0 {
            println!("Filtering by PID: {}", config.tracing.target_pid);
        }
        if let Some(duration) = config.tracing.duration {
            println!("Running for {} seconds", duration);
        }
        println!("Press Ctrl+C to exit\n");
    }
    if let (Some(header), Some(separator)) = (formatter.header(), formatter.separator()) {
        println!("{}", header);
        println!("{}", separator);
    }

    let epoch = boot_epoch();
    let printer = async {
        while let Some(event) = rx.recv().await {
            let record = BindRecord::from_event(&event, epoch);
            println!("{}", formatter.format_record(&record)?);
        }
        Ok::<_, BindsnoopError>(())
    };

    let deadline = async {
        match config.duration() {
            Some(duration) => sleep(duration).await,
            None => future::pending().await,
        }
    };

    tokio::select! {
        result = printer => result?,
        _ = deadline => {
            info!("Tracing completed after {} seconds", config.tracing.duration.unwrap_or_default());
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, exiting...");
        }
    }

    processor.stop()?;

    let stats = processor.stats();
    if stats.lost() > 0 || stats.dropped() > 0 {
        warn!(
            "{} events lost in perf buffers, {} dropped by a slow consumer",
            stats.lost(),
            stats.dropped()
        );
    }
    match app.pending_table_drops(&ebpf) {
        Ok(drops) => debug!("pending-call table rejected {} calls", drops),
        Err(e) => warn!("failed to read probe statistics: {e}"),
    }

    app.detach_all_probes(&mut ebpf)?;
    Ok(())
}
