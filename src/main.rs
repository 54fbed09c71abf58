use std::fs::File;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;

use ot_discovery_rs::client::{HttpBackend, ScanMode};
use ot_discovery_rs::config::{self, ClientConfig};
use ot_discovery_rs::inventory::{FailurePolicy, Inventory};
use ot_discovery_rs::scheduler::{PollEvent, PollingScheduler};
use ot_discovery_rs::submitter::TaskSubmitter;
use ot_discovery_rs::types::{Device, ScanSummary};
use ot_discovery_rs::{logging, netrange};

/// ot-discovery-rs — run a remote OT network scan and print the discovered device inventory.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ot-discovery-rs",
    version,
    about = "Run a remote OT network scan and print the discovered device inventory.",
    long_about = None
)]
struct Cli {
    /// Target range in CIDR notation (e.g., 192.168.1.0/24) or a single IP. If omitted, auto-detect local /24.
    #[arg(long)]
    range: Option<String>,

    /// JSON config file; command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the scan backend.
    #[arg(long = "backend-url")]
    backend_url: Option<String>,

    /// Seconds between two status queries.
    #[arg(long = "poll-interval-secs")]
    poll_interval_secs: Option<u64>,

    /// Per-request timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Scan depth requested from the backend.
    #[arg(long, value_enum)]
    mode: Option<ScanMode>,

    /// Optional key for the backend's external host lookup.
    #[arg(long = "shodan-api-key", env = "SHODAN_API_KEY", hide_env_values = true)]
    shodan_api_key: Option<String>,

    /// Keep or drop the device list when polling fails.
    #[arg(long = "on-failure", value_enum)]
    on_failure: Option<FailurePolicy>,

    /// Write devices and summary as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn resolve_config(&self) -> Result<ClientConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config_from_path(path)?,
            None => ClientConfig::default(),
        };
        if let Some(url) = &self.backend_url {
            cfg.backend_url = url.clone();
        }
        if let Some(secs) = self.poll_interval_secs {
            cfg.poll_interval_secs = secs;
        }
        if let Some(ms) = self.timeout_ms {
            cfg.request_timeout_ms = ms;
        }
        if let Some(mode) = self.mode {
            cfg.scan_mode = mode;
        }
        if self.shodan_api_key.is_some() {
            cfg.external_api_key = self.shodan_api_key.clone();
        }
        if let Some(policy) = self.on_failure {
            cfg.on_poll_failure = policy;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Serialize)]
struct Report<'a> {
    devices: &'a [Device],
    summary: ScanSummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;
    let cfg = cli.resolve_config()?;

    let range = match cli.range.clone() {
        Some(r) => r,
        None => {
            let cidrs = netrange::detect_local_cidrs().context("failed to detect local networks")?;
            match cidrs.first() {
                Some(cidr) => cidr.to_string(),
                None => bail!("no local IPv4 network found; pass --range"),
            }
        }
    };

    println!("ot-discovery-rs configuration:");
    println!("  range        : {}", range);
    println!("  backend      : {}", cfg.backend_url);
    println!("  mode         : {:?}", cfg.scan_mode);
    println!("  poll every   : {}s", cfg.poll_interval_secs);
    println!("  timeout_ms   : {}", cfg.request_timeout_ms);
    println!(
        "  api key      : {}",
        if cfg.external_api_key.is_some() { "<set>" } else { "<none>" }
    );
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );

    let backend = Arc::new(HttpBackend::new(&cfg.backend_url, cfg.request_timeout())?);
    let submitter = TaskSubmitter::new(backend.clone())
        .with_mode(cfg.scan_mode)
        .with_external_api_key(cfg.external_api_key.clone());

    println!("\nStarting scan request for {}...", range);
    let task_id = match submitter.submit(&range).await {
        Ok(id) => id,
        Err(e) => bail!("Failed to start scan. {}", e.detail()),
    };
    println!("Scan started. Task ID: {}. Polling...", task_id);

    let (tx, mut rx) = mpsc::unbounded_channel::<PollEvent>();
    let scheduler = PollingScheduler::new(backend, Arc::new(tx)).with_period(cfg.poll_interval());
    let handle = scheduler.begin(task_id);
    let mut inventory = Inventory::new(cfg.on_poll_failure);

    if let ScanOutcome::Interrupted =
        follow_scan(&mut rx, &mut inventory, tokio::signal::ctrl_c()).await?
    {
        handle.cancel();
        bail!("scan polling cancelled");
    }

    let summary = inventory.summary();
    print_device_table(inventory.devices());
    print_summary(&summary);

    if let Some(path) = cli.output.as_deref() {
        let report = Report {
            devices: inventory.devices(),
            summary,
        };
        if let Err(e) = write_report_json(path, &report) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON report to {}", path.display());
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ScanOutcome {
    Finished,
    Interrupted,
}

/// Apply poll events to `inventory` until the scan finishes, fails, or `shutdown` resolves.
///
/// `shutdown` is polled across the whole loop, so a signal arriving while an
/// event is being handled is still seen on the next pass.
async fn follow_scan<F: Future>(
    rx: &mut mpsc::UnboundedReceiver<PollEvent>,
    inventory: &mut Inventory,
    shutdown: F,
) -> Result<ScanOutcome> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            ev = rx.recv() => {
                let Some(ev) = ev else { return Ok(ScanOutcome::Finished) };
                inventory.apply(&ev);
                match ev {
                    PollEvent::Progress { elapsed_secs, .. } => {
                        println!("Scanning... Time elapsed: {:.1}s. Waiting for results.", elapsed_secs);
                    }
                    PollEvent::Completed { duration_secs, .. } => {
                        println!("Scan Completed in {:.2}s", duration_secs);
                        return Ok(ScanOutcome::Finished);
                    }
                    PollEvent::Failed { error, .. } => {
                        bail!("Scan Failed: {}", error.detail());
                    }
                }
            }
            _ = &mut shutdown => return Ok(ScanOutcome::Interrupted),
        }
    }
}

fn print_device_table(devices: &[Device]) {
    if devices.is_empty() {
        println!("\nNo devices discovered.");
        return;
    }

    let mut ip_w = "ip".len();
    let mut name_w = "name".len();
    let mut vendor_w = "vendor".len();
    let mut proto_w = "protocol".len();
    for d in devices {
        ip_w = ip_w.max(d.address.len());
        name_w = name_w.max(d.display_name.len().min(40));
        vendor_w = vendor_w.max(d.vendor.len().min(30));
        proto_w = proto_w.max(d.primary_protocol.len());
    }
    let mac_w = 17usize;
    let risk_w = "critical".len();

    println!("\nDevices: {}", devices.len());
    println!(
        "{:<ip_w$}  {:<name_w$}  {:<vendor_w$}  {:<mac_w$}  {:<risk_w$}  {:<proto_w$}  ports",
        "ip", "name", "vendor", "mac", "risk", "protocol",
    );
    println!(
        "{:-<ip_w$}  {:-<name_w$}  {:-<vendor_w$}  {:-<mac_w$}  {:-<risk_w$}  {:-<proto_w$}  -----",
        "", "", "", "", "", "",
    );
    for d in devices {
        let ports = d
            .open_ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<ip_w$}  {:<name_w$}  {:<vendor_w$}  {:<mac_w$}  {:<risk_w$}  {:<proto_w$}  {}",
            d.address,
            truncate(&d.display_name, name_w),
            truncate(&d.vendor, vendor_w),
            d.hardware_id.as_deref().unwrap_or("-"),
            d.risk_level,
            d.primary_protocol,
            ports,
        );
    }
}

fn print_summary(summary: &ScanSummary) {
    println!("\nNetwork summary");
    println!("  total devices      : {}", summary.total_devices);
    println!("  anomalies detected : {}", summary.anomalies_detected);
    println!("  protocols used     : {}", summary.protocols_used.len());
    println!("  security score     : {}%", summary.security_score());
    if !summary.protocols_used.is_empty() {
        println!("  detected protocols : {}", summary.protocols_used.join(", "));
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn write_report_json(path: &std::path::Path, report: &Report<'_>) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
