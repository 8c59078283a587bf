//! Command implementations behind the `lanwatch` binary

use crate::args::{Cli, Commands, DeviceAction};
use crate::signal::shutdown_signal;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use ipnetwork::Ipv4Network;
use lanwatch_capture::{filters, PacketCapture};
use lanwatch_core::{Interface, MacAddr, Packet};
use lanwatch_monitor::{
    select_targets, ActivityStore, ConnectionTracker, DeviceFilter, DeviceRegistry, FilterStatus,
    FlowFeed, FlowInterceptor, JsonFilterStore, Pipeline, PipelineStats, Table,
};
use lanwatch_spoof::{
    default_gateway, ArpResolver, ArpScanner, ArpSpoofer, ForwardingState, SpoofConfig,
};
use std::fs;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Dispatch the parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Interfaces => list_interfaces(),
        Commands::Monitor { flow_listen, ports } => monitor(&cli, *flow_listen, ports).await,
        Commands::Spoof {
            targets,
            gateway,
            interval,
        } => spoof(&cli, targets, *gateway, *interval).await,
        Commands::Devices { action } => devices(&cli, action),
        Commands::Scan { network } => scan(&cli, *network).await,
        Commands::History { limit } => history(&cli, *limit),
    }
}

fn list_interfaces() -> Result<()> {
    let interfaces = Interface::list_all();
    if interfaces.is_empty() {
        bail!("no network interfaces found");
    }

    println!("{:<16} {:<18} {:<20} FLAGS", "NAME", "MAC", "IPV4");
    for iface in interfaces {
        let mut flags = Vec::new();
        if iface.is_up {
            flags.push("up");
        }
        if iface.is_loopback {
            flags.push("loopback");
        }
        println!(
            "{:<16} {:<18} {:<20} {}",
            iface.name,
            iface.mac_address,
            iface.ipv4.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            flags.join(",")
        );
    }
    Ok(())
}

fn select_interface(cli: &Cli) -> Result<Interface> {
    let interface = match &cli.interface {
        Some(name) => Interface::by_name(name)?,
        None => Interface::default_interface()?,
    };
    debug!(interface = %interface.name, "Using interface");
    Ok(interface)
}

fn load_filter(cli: &Cli) -> Result<DeviceFilter> {
    let store = JsonFilterStore::new(&cli.filter_config);
    DeviceFilter::load(Arc::new(store))
        .with_context(|| format!("loading {}", cli.filter_config.display()))
}

fn open_store(cli: &Cli) -> Result<ActivityStore> {
    ActivityStore::open(&cli.db).with_context(|| format!("opening {}", cli.db.display()))
}

/// Effective UID from the text of `/proc/self/status`
fn effective_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .and_then(|euid| euid.parse().ok())
}

fn warn_if_unprivileged() {
    let Ok(status) = fs::read_to_string("/proc/self/status") else {
        return;
    };
    if effective_uid(&status).is_some_and(|uid| uid != 0) {
        warn!("Not running as root; capture and raw sends will likely fail");
    }
}

async fn monitor(cli: &Cli, flow_listen: Option<SocketAddr>, ports: &[u16]) -> Result<()> {
    warn_if_unprivileged();

    let store = Arc::new(open_store(cli)?);
    let filter = Arc::new(load_filter(cli)?);
    if filter.status() == FilterStatus::AdmitsNothing {
        eprintln!(
            "Warning: filtering is enabled but no devices are listed; nothing will be recorded"
        );
    }

    let registry = Arc::new(DeviceRegistry::new());
    let preloaded = registry.preload(store.devices()?);
    info!(devices = preloaded, "Loaded known devices");

    let interface = select_interface(cli)?;
    let mut capture = PacketCapture::new(&interface.name)
        .with_context(|| format!("opening capture on {}", interface.name))?;
    capture.set_filter(&filters::monitor_filter_excluding(
        ports,
        &interface.mac_address.to_string(),
    ));
    let frames = capture.start()?;

    let pipeline = Pipeline::new(registry.clone(), filter.clone(), store.clone())
        .with_tracker(ConnectionTracker::new().with_ports(ports.iter().copied()))
        .ignore_source(interface.mac_address);
    let stop_decode = Arc::new(AtomicBool::new(false));
    let decode = spawn_decode(pipeline, frames, stop_decode.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    let feed = match flow_listen {
        Some(addr) => {
            let interceptor = Arc::new(FlowInterceptor::new(
                registry.clone(),
                filter.clone(),
                store.clone(),
            ));
            let feed = FlowFeed::bind(addr, interceptor)
                .await
                .with_context(|| format!("binding flow feed on {}", addr))?;
            Some(tokio::spawn(feed.serve(stop_rx)))
        }
        None => None,
    };

    println!(
        "Monitoring {} ({}); press Ctrl+C to stop",
        interface.name,
        describe_filter(filter.status())
    );
    let outcome = supervise(shutdown_signal(), decode, &stop_decode).await;

    let _ = stop_tx.send(true);
    capture.stop();
    if let Some(handle) = feed {
        handle.await??;
    }
    let stats = outcome?;

    let capture_stats = capture.stats();
    println!("{}", capture_stats.format());
    if capture_stats.has_significant_drops(1.0) {
        eprintln!("Warning: the decoder fell behind and frames were dropped");
    }
    println!(
        "Frames: {}, events: {}, malformed: {}, filtered: {}, store errors: {}",
        stats.frames, stats.events, stats.malformed, stats.filtered, stats.store_errors
    );
    println!("Devices seen: {}", registry.len());
    Ok(())
}

/// Run the decode loop on the blocking pool
fn spawn_decode(
    pipeline: Pipeline,
    frames: Receiver<Packet>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<PipelineStats> {
    tokio::task::spawn_blocking(move || pipeline.run(frames, &stop))
}

/// Wait for `signal`, then stop the decode loop and collect its stats.
///
/// A decode loop that ends first has lost its capture source. That is
/// fatal: the monitor does not keep running without capture.
async fn supervise(
    signal: impl Future<Output = io::Result<()>>,
    mut decode: JoinHandle<PipelineStats>,
    stop: &AtomicBool,
) -> Result<PipelineStats> {
    tokio::select! {
        received = signal => {
            received.context("waiting for shutdown signal")?;
            info!("Shutting down monitor");
            stop.store(true, Ordering::Relaxed);
            decode.await.context("decode task failed")
        }
        finished = &mut decode => {
            let stats = finished.context("decode task failed")?;
            error!(frames = stats.frames, "Capture source closed");
            bail!("capture source closed unexpectedly after {} frames", stats.frames)
        }
    }
}

async fn spoof(
    cli: &Cli,
    explicit: &[Ipv4Addr],
    gateway: Option<Ipv4Addr>,
    interval: u64,
) -> Result<()> {
    warn_if_unprivileged();
    let interface = select_interface(cli)?;

    let gateway = match gateway {
        Some(ip) => ip,
        None => default_gateway(Some(interface.name.as_str()))
            .or_else(|_| default_gateway(None))
            .context("no gateway given and no default route found")?,
    };

    let config = load_filter(cli)?.snapshot();
    let known = open_store(cli)?.devices()?;
    let selection = select_targets(&config, explicit, &known);
    for mac in &selection.skipped {
        eprintln!("Skipping {}: no known IPv4 address", mac);
    }
    for ip in &selection.outside_filter {
        eprintln!("Warning: {} is not an interested device; its activity will not be recorded", ip);
    }
    if selection.is_empty() {
        bail!("no targets: pass -t IP or enable filtering with devices that have been seen");
    }

    let sender = Arc::new(interface.sender()?);
    let resolver = Arc::new(ArpResolver::new(interface.clone())?);
    let config = SpoofConfig {
        interval: Duration::from_secs(interval.max(1)),
        ..SpoofConfig::default()
    };
    let spoofer = ArpSpoofer::new(interface.mac_address, sender, resolver).with_config(config);

    let status = spoofer.start(&selection.targets, gateway).await?;
    println!("Gateway: {}", status.gateway.map(|g| g.to_string()).unwrap_or_default());
    for target in &status.targets {
        println!("Target:  {}", target);
    }
    if status.forwarding == ForwardingState::Disabled {
        eprintln!("Warning: IP forwarding is disabled; targets will lose connectivity");
    }
    println!("Spoofing; press Ctrl+C to stop and restore");

    shutdown_signal().await.context("waiting for shutdown signal")?;
    println!("Restoring ARP caches...");
    spoofer.stop().await.context("restoring ARP caches")?;

    let status = spoofer.status();
    println!(
        "Rounds: {}, packets sent: {}, send errors: {}",
        status.rounds, status.packets_sent, status.send_errors
    );
    Ok(())
}

fn describe_filter(status: FilterStatus) -> String {
    match status {
        FilterStatus::MonitorAll => "all devices".to_string(),
        FilterStatus::Filtering { interested } => format!("{} interested devices", interested),
        FilterStatus::AdmitsNothing => "no devices".to_string(),
    }
}

fn devices(cli: &Cli, action: &DeviceAction) -> Result<()> {
    let filter = load_filter(cli)?;

    match action {
        DeviceAction::Status => {
            println!("Recording: {}", describe_filter(filter.status()));
            let store = open_store(cli)?;
            let config = filter.snapshot();
            if !config.interested.is_empty() {
                println!("Interested:");
                for mac in &config.interested {
                    match store.device(mac)? {
                        Some(device) => println!(
                            "  {} {:<15} {}",
                            mac,
                            device.last_known_ip,
                            device.hostname.unwrap_or_default()
                        ),
                        None => println!("  {} (not seen yet)", mac),
                    }
                }
            }
            let known = store.devices()?;
            println!("Known devices: {}", known.len());
            for device in known {
                println!(
                    "  {} {:<15} {} {}",
                    device.mac,
                    device.last_known_ip,
                    format_time(device.last_seen),
                    device.hostname.unwrap_or_default()
                );
            }
        }
        DeviceAction::Add { mac } => {
            if filter.add(mac)? {
                println!("Added {}", mac);
            } else {
                println!("{} is already listed", mac);
            }
        }
        DeviceAction::Remove { mac } => {
            if filter.remove(mac)? {
                println!("Removed {}", mac);
            } else {
                println!("{} was not listed", mac);
            }
        }
        DeviceAction::Enable => {
            filter.enable()?;
            println!("Filtering enabled ({})", describe_filter(filter.status()));
        }
        DeviceAction::Disable => {
            filter.disable()?;
            println!("Filtering disabled; all devices are recorded");
        }
        DeviceAction::Clear => {
            let removed = filter.clear()?;
            println!("Removed {} devices", removed);
        }
        DeviceAction::Name { mac, name } => {
            let mac: MacAddr = mac.parse()?;
            let store = open_store(cli)?;
            if !store.set_hostname(&mac, name.as_deref())? {
                bail!("{} has not been seen yet", mac);
            }
            match name {
                Some(name) => println!("{} is now {}", mac, name),
                None => println!("Cleared name of {}", mac),
            }
        }
    }
    Ok(())
}

async fn scan(cli: &Cli, network: Option<Ipv4Network>) -> Result<()> {
    warn_if_unprivileged();
    let interface = select_interface(cli)?;
    let our_ip = interface
        .ipv4_addr()
        .ok_or_else(|| anyhow!("{} has no IPv4 address", interface.name))?;
    let network = match network.or(interface.ipv4) {
        Some(net) => Ipv4Network::new(net.network(), net.prefix())?,
        None => bail!("no network to scan on {}", interface.name),
    };

    let scanner = ArpScanner::new(Arc::new(interface.sender()?), interface.mac_address, our_ip);
    let sent = scanner.sweep(network).await?;
    println!(
        "Sent {} ARP requests on {}; replies are recorded by a running monitor",
        sent, network
    );
    Ok(())
}

fn history(cli: &Cli, limit: usize) -> Result<()> {
    let store = open_store(cli)?;

    let totals = Table::ALL
        .iter()
        .map(|table| -> Result<String> {
            Ok(format!("{} {}", table.name(), store.count(*table)?))
        })
        .collect::<Result<Vec<_>>>()?;
    println!("Totals: {}", totals.join(", "));

    println!("\nDNS queries:");
    for q in store.recent_dns_queries(limit)? {
        println!(
            "  {} {} {:<15} {} {}",
            format_time(q.timestamp),
            q.device,
            q.source_ip,
            q.record_type.as_str(),
            q.queried_name
        );
    }

    println!("\nConnections:");
    for c in store.recent_connections(limit)? {
        println!(
            "  {} {} {} -> {}:{} {}",
            format_time(c.timestamp),
            c.device,
            c.source_ip,
            c.destination_ip,
            c.destination_port,
            c.protocol_guess.as_str()
        );
    }

    println!("\nSearches:");
    for s in store.recent_searches(limit)? {
        println!(
            "  {} {} {:<10} {}",
            format_time(s.timestamp),
            s.device,
            s.search_engine.as_str(),
            s.query_text
        );
    }

    println!("\nBrowsing:");
    for b in store.recent_browsing(limit)? {
        let status = b.status_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "  {} {} {} {}{} {}",
            format_time(b.timestamp),
            b.device,
            b.method,
            b.host,
            b.path,
            status
        );
    }

    println!("\nForm submissions:");
    for f in store.recent_form_submissions(limit)? {
        let fields = f
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        println!(
            "  {} {} {}{} {}",
            format_time(f.timestamp),
            f.device,
            f.host,
            f.path,
            fields
        );
    }
    Ok(())
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
