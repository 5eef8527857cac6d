//! Interface address sync task.
//!
//! The classifiers cannot ask the kernel for interface addresses, so the
//! IFADDRS_V4 / ANYCAST_V6 maps are refreshed from a fresh snapshot on every
//! tick. Address changes show up in the datapath within one period.

use crate::ebpf_loader::{EbpfError, EbpfManager};
use crate::iface::{IfaceError, SystemInterfaces};
use icmpd_common::IfName;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info, warn};

/// Default refresh period in milliseconds
pub const DEFAULT_REFRESH_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Iface(#[from] IfaceError),

    #[error(transparent)]
    Ebpf(#[from] EbpfError),
}

/// Interface address sync task handle.
pub struct IfaddrSync {
    task: tokio::task::JoinHandle<()>,
}

impl IfaddrSync {
    /// Start syncing the addresses of `name` every `period`. The first sync
    /// happens right away.
    pub fn start(
        ebpf: Arc<Mutex<EbpfManager>>,
        name: IfName,
        interfaces: SystemInterfaces,
        period: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            sync_loop(ebpf, name, interfaces, period).await;
        });

        info!(if_name = %name, period_ms = period.as_millis() as u64, "Interface address sync started");

        Self { task }
    }

    /// Stop the sync task.
    pub fn stop(self) {
        self.task.abort();
        info!("Interface address sync stopped");
    }
}

async fn sync_loop(
    ebpf: Arc<Mutex<EbpfManager>>,
    name: IfName,
    interfaces: SystemInterfaces,
    period: Duration,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if let Err(e) = sync_once(&ebpf, &name, &interfaces).await {
            warn!(if_name = %name, error = %e, "Failed to sync interface addresses");
        }
    }
}

/// Take one snapshot and push it to the maps.
pub async fn sync_once(
    ebpf: &Mutex<EbpfManager>,
    name: &IfName,
    interfaces: &SystemInterfaces,
) -> Result<(), SyncError> {
    let snapshot = interfaces.snapshot().await?;
    ebpf.lock().await.sync_interfaces(name, &snapshot)?;
    debug!(if_name = %name, "Interface addresses synced");
    Ok(())
}
