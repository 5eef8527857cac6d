//! icmpd daemon: rewrites the source address of egress packets.

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use icmpd::daemon::{bring_up, ifaddr_name};
use icmpd::ebpf_loader::{DEFAULT_PROGRAM_PATH, EbpfManager};
use icmpd::ifaddr_sync::{DEFAULT_REFRESH_MS, IfaddrSync};
use icmpd::iface::SystemInterfaces;
use icmpd::options::{self, TargetOptions};
use icmpd::registry::TargetRegistry;
use icmpd_common::{Family, IcmpdInfo};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "icmpd")]
#[command(about = "Rewrite the source address of egress packets", long_about = None)]
struct Cli {
    #[command(flatten)]
    target: TargetOptions,

    /// Interface whose egress traffic is rewritten (repeatable)
    #[arg(short, long = "attach", value_name = "DEVICE", required = true)]
    attach: Vec<String>,

    /// Protocol families to handle
    #[arg(long, value_enum, default_value = "both")]
    family: FamilyArg,

    /// Path to the compiled TC classifier object
    #[arg(long, default_value = DEFAULT_PROGRAM_PATH)]
    program: PathBuf,

    /// Interface address refresh period in milliseconds. With --ifaddr, an
    /// address change reaches the datapath at most this long after it happens
    #[arg(long, default_value_t = DEFAULT_REFRESH_MS)]
    refresh_ms: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FamilyArg {
    Ipv4,
    Ipv6,
    Both,
}

impl FamilyArg {
    fn families(self) -> &'static [Family] {
        match self {
            FamilyArg::Ipv4 => &[Family::Ipv4],
            FamilyArg::Ipv6 => &[Family::Ipv6],
            FamilyArg::Both => &[Family::Ipv4, Family::Ipv6],
        }
    }
}

/// One configuration record per family the daemon handles. A static address
/// only applies to its own family.
fn build_rules(cli: &Cli) -> anyhow::Result<Vec<(Family, IcmpdInfo)>> {
    let families: Vec<Family> = match cli.target.static_family() {
        Some(family) if cli.family.families().contains(&family) => vec![family],
        Some(family) => bail!(
            "--to address is {family:?}, but only {:?} was requested",
            cli.family.families()
        ),
        None => cli.family.families().to_vec(),
    };

    families
        .into_iter()
        .map(|family| {
            let info = cli
                .target
                .to_info(family)
                .with_context(|| format!("Invalid target for {family:?}"))?;
            Ok((family, info))
        })
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    info!("icmpd starting...");

    let rules = match build_rules(&cli) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Invalid configuration");
            std::process::exit(1);
        }
    };

    // Load eBPF programs
    let mut ebpf = match EbpfManager::load(&cli.program, cli.attach.clone()) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "Failed to load eBPF programs");
            std::process::exit(1);
        }
    };

    for (family, info) in &rules {
        info!(?family, rule = %options::print(info, *family), "Configured rule");
    }

    // The first snapshot has to be in the maps before anything is attached
    let ifaddr = ifaddr_name(&rules);
    let interfaces = SystemInterfaces::new();
    let snapshot = match ifaddr {
        Some(name) => match interfaces.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!(if_name = %name, error = %e, "Failed to read interface addresses");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let targets = match bring_up(&mut ebpf, &rules, snapshot.as_ref()) {
        Ok(targets) => targets,
        Err(e) => {
            error!(error = %e, "Failed to install rules");
            std::process::exit(1);
        }
    };

    let ebpf = Arc::new(Mutex::new(ebpf));

    // Address sync is only needed when the source follows an interface
    let sync = ifaddr.map(|name| {
        IfaddrSync::start(
            Arc::clone(&ebpf),
            name,
            interfaces,
            Duration::from_millis(cli.refresh_ms.max(1)),
        )
    });

    info!(interfaces = ?cli.attach, "icmpd running");

    // Setup signal handlers
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(i), Ok(t)) => (i, t),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to register signal handlers");
            ebpf.lock().await.unregister_targets(&targets);
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }

    if let Some(sync) = sync {
        sync.stop();
    }
    ebpf.lock().await.unregister_targets(&targets);

    info!("icmpd stopped");
}
