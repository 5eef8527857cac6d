//! eBPF program loading and BPF map management.
//!
//! This module loads the TC classifiers, attaches them to the egress hook of
//! the configured interfaces and keeps their maps in sync. The actual eBPF
//! programs are compiled separately in icmpd-ebpf-programs.

use crate::iface::InterfaceSnapshot;
use crate::registry::{TargetRegistry, TargetSpec, check_entry};
use aya::maps::{Array, HashMap, MapData};
use aya::programs::tc::{SchedClassifierLinkId, TcOptions};
use aya::programs::{SchedClassifier, TcAttachType};
use aya::{Bpf, BpfLoader};
use icmpd_common::{
    AnycastListV6, ConfigValidationError, Family, IFNAMSIZ, IcmpdInfo, IfAddrListV4, IfName,
    MODE_IFADDR,
};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default path of the installed classifier object
pub const DEFAULT_PROGRAM_PATH: &str = "/usr/lib/icmpd/ebpf/tc-icmpd";

// Map names (must match the eBPF program)
const ICMPD_INFO: &str = "ICMPD_INFO";
const IFADDRS_V4: &str = "IFADDRS_V4";
const ANYCAST_V6: &str = "ANYCAST_V6";

/// Rule record as stored in the ICMPD_INFO array.
#[repr(transparent)]
#[derive(Clone, Copy, Debug)]
pub struct InfoValue(pub IcmpdInfo);

unsafe impl aya::Pod for InfoValue {}

/// IPv4 address list as stored in IFADDRS_V4.
#[repr(transparent)]
#[derive(Clone, Copy, Debug)]
pub struct IfAddrsValue(pub IfAddrListV4);

unsafe impl aya::Pod for IfAddrsValue {}

/// Anycast list as stored in ANYCAST_V6.
#[repr(transparent)]
#[derive(Clone, Copy, Debug)]
pub struct AnycastValue(pub AnycastListV6);

unsafe impl aya::Pod for AnycastValue {}

/// eBPF loader errors.
#[derive(Debug, Error)]
pub enum EbpfError {
    #[error("Failed to load eBPF program: {0}")]
    Load(#[from] aya::BpfError),

    #[error("Failed to attach TC program: {0}")]
    Attach(#[from] aya::programs::ProgramError),

    #[error("Failed to access map: {0}")]
    Map(#[from] aya::maps::MapError),

    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    #[error("Map not found: {0}")]
    MapNotFound(String),

    #[error("TC error: {0}")]
    Tc(String),

    #[error("Invalid rule: {0}")]
    Invalid(#[from] ConfigValidationError),

    #[error("Interface addresses not synced yet for {0}")]
    NotSynced(IfName),
}

pub type Result<T> = std::result::Result<T, EbpfError>;

/// Classifier entry point for a family.
pub fn program_name(family: Family) -> &'static str {
    match family {
        Family::Ipv4 => "icmpd_v4",
        Family::Ipv6 => "icmpd_v6",
    }
}

/// One classifier attached to one interface. Stub mode records the
/// attachment without a kernel link.
struct Attachment {
    family: Family,
    if_name: String,
    link: Option<SchedClassifierLinkId>,
}

/// Manages the loaded classifiers and their maps.
///
/// Without a program object (stub mode) every operation succeeds without
/// touching the kernel, so the daemon can run on hosts without the eBPF build.
///
/// A rule that follows an interface cannot be attached before its addresses
/// have been pushed once with [`EbpfManager::sync_interfaces`]; until then
/// the classifiers would only see empty maps.
pub struct EbpfManager {
    bpf: Option<Bpf>,
    /// Interfaces whose egress hook gets the classifiers
    interfaces: Vec<String>,
    loaded: HashSet<Family>,
    links: Vec<Attachment>,
    /// Interface named by an ifaddr rule that has not been synced yet
    pending_sync: Option<IfName>,
}

impl EbpfManager {
    /// Create a manager in stub mode.
    pub fn new(interfaces: Vec<String>) -> Self {
        Self {
            bpf: None,
            interfaces,
            loaded: HashSet::new(),
            links: Vec::new(),
            pending_sync: None,
        }
    }

    /// Load the classifier object from `path`.
    pub fn load_from_path(path: impl AsRef<Path>, interfaces: Vec<String>) -> Result<Self> {
        let bpf = BpfLoader::new().load_file(path.as_ref())?;

        info!(path = %path.as_ref().display(), "eBPF programs loaded from file");

        Ok(Self {
            bpf: Some(bpf),
            ..Self::new(interfaces)
        })
    }

    /// Load from `path`, falling back to stub mode if it does not exist.
    pub fn load(path: impl AsRef<Path>, interfaces: Vec<String>) -> Result<Self> {
        if !path.as_ref().exists() {
            info!(
                path = %path.as_ref().display(),
                "eBPF programs not found, using stub implementation"
            );
            return Ok(Self::new(interfaces));
        }

        Self::load_from_path(path, interfaces)
    }

    pub fn is_stub(&self) -> bool {
        self.bpf.is_none()
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Interfaces the family's classifier is currently attached to.
    pub fn attached(&self, family: Family) -> impl Iterator<Item = &str> + '_ {
        self.links
            .iter()
            .filter(move |a| a.family == family)
            .map(|a| a.if_name.as_str())
    }

    /// Validate `info` and store it as the rule for `family`.
    pub fn set_rule(&mut self, family: Family, info: &IcmpdInfo) -> Result<()> {
        check_entry(info)?;
        if info.mode == MODE_IFADDR {
            self.pending_sync = Some(IfName::from_raw(info.target));
        }

        let Some(bpf) = self.bpf.as_mut() else {
            debug!(?family, mode = info.mode, "Skipping rule update (stub mode)");
            return Ok(());
        };

        let mut rules: Array<&mut MapData, InfoValue> = bpf
            .map_mut(ICMPD_INFO)
            .ok_or_else(|| EbpfError::MapNotFound(ICMPD_INFO.to_string()))?
            .try_into()?;

        rules.set(family.info_index(), InfoValue(*info), 0)?;
        info!(?family, mode = info.mode, "Rule stored");
        Ok(())
    }

    /// Push the current addresses of device `name` into the maps. Devices
    /// without a family's state lose their entry in that family's map.
    pub fn sync_interfaces(&mut self, name: &IfName, snapshot: &InterfaceSnapshot) -> Result<()> {
        let Some(bpf) = self.bpf.as_mut() else {
            self.mark_synced(name);
            return Ok(());
        };

        let key: [u8; IFNAMSIZ] = name.to_raw();
        let (v4, v6) = snapshot.map_lists(name);

        let mut ifaddrs: HashMap<&mut MapData, [u8; IFNAMSIZ], IfAddrsValue> = bpf
            .map_mut(IFADDRS_V4)
            .ok_or_else(|| EbpfError::MapNotFound(IFADDRS_V4.to_string()))?
            .try_into()?;
        match v4 {
            Some(list) => ifaddrs.insert(key, IfAddrsValue(list), 0)?,
            None => remove_entry(&mut ifaddrs, &key)?,
        }

        let mut anycast: HashMap<&mut MapData, [u8; IFNAMSIZ], AnycastValue> = bpf
            .map_mut(ANYCAST_V6)
            .ok_or_else(|| EbpfError::MapNotFound(ANYCAST_V6.to_string()))?
            .try_into()?;
        match v6 {
            Some(list) => anycast.insert(key, AnycastValue(list), 0)?,
            None => remove_entry(&mut anycast, &key)?,
        }

        self.mark_synced(name);
        debug!(if_name = %name, "Interface maps synced");
        Ok(())
    }

    fn mark_synced(&mut self, name: &IfName) {
        if self.pending_sync.as_ref() == Some(name) {
            self.pending_sync = None;
        }
    }

    /// Attach the family's classifier to egress of every configured interface.
    pub fn attach(&mut self, family: Family) -> Result<()> {
        if let Some(name) = self.pending_sync {
            return Err(EbpfError::NotSynced(name));
        }

        let Some(bpf) = self.bpf.as_mut() else {
            for if_name in &self.interfaces {
                info!(if_name = %if_name, ?family, "Skipping eBPF attach (stub mode)");
                self.links.push(Attachment {
                    family,
                    if_name: if_name.clone(),
                    link: None,
                });
            }
            return Ok(());
        };

        let name = program_name(family);
        let prog: &mut SchedClassifier = bpf
            .program_mut(name)
            .ok_or_else(|| EbpfError::ProgramNotFound(name.to_string()))?
            .try_into()?;

        if !self.loaded.contains(&family) {
            prog.load()?;
            self.loaded.insert(family);
        }

        for if_name in &self.interfaces {
            // Add clsact qdisc if not present
            if let Err(e) = aya::programs::tc::qdisc_add_clsact(if_name)
                && !e.to_string().contains("exists")
            {
                return Err(EbpfError::Tc(format!(
                    "Failed to add clsact qdisc to {}: {}",
                    if_name, e
                )));
            }

            let link = prog.attach_with_options(
                if_name,
                TcAttachType::Egress,
                TcOptions {
                    priority: 1,
                    handle: match family {
                        Family::Ipv4 => 1,
                        Family::Ipv6 => 2,
                    },
                },
            )?;
            self.links.push(Attachment {
                family,
                if_name: if_name.clone(),
                link: Some(link),
            });

            info!(if_name = %if_name, ?family, program = name, "TC egress program attached");
        }
        Ok(())
    }

    /// Detach the family's classifier everywhere it was attached.
    pub fn detach(&mut self, family: Family) {
        let (ours, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.links)
            .into_iter()
            .partition(|a| a.family == family);
        self.links = rest;
        self.release(ours);
    }

    fn release(&mut self, attachments: Vec<Attachment>) {
        for Attachment {
            family,
            if_name,
            link,
        } in attachments
        {
            let Some(link) = link else {
                debug!(if_name = %if_name, ?family, "Skipping eBPF detach (stub mode)");
                continue;
            };
            let prog: Option<&mut SchedClassifier> = self
                .bpf
                .as_mut()
                .and_then(|bpf| bpf.program_mut(program_name(family)))
                .and_then(|p| p.try_into().ok());
            let Some(prog) = prog else {
                warn!(if_name = %if_name, ?family, "Program gone, cannot detach");
                continue;
            };

            match prog.detach(link) {
                Ok(()) => info!(if_name = %if_name, ?family, "TC egress program detached"),
                Err(e) => warn!(if_name = %if_name, ?family, error = %e, "Failed to detach TC program"),
            }
        }
    }
}

fn remove_entry<V: aya::Pod>(
    map: &mut HashMap<&mut MapData, [u8; IFNAMSIZ], V>,
    key: &[u8; IFNAMSIZ],
) -> Result<()> {
    match map.remove(key) {
        Ok(()) | Err(aya::maps::MapError::KeyNotFound) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl TargetRegistry for EbpfManager {
    type Error = EbpfError;

    fn register_targets(&mut self, targets: &[TargetSpec]) -> Result<()> {
        // Links from earlier registrations stay put on failure
        let mark = self.links.len();
        for spec in targets {
            if let Err(e) = self.attach(spec.family) {
                let added = self.links.split_off(mark);
                self.release(added);
                return Err(e);
            }
        }
        Ok(())
    }

    fn unregister_targets(&mut self, targets: &[TargetSpec]) {
        for spec in targets {
            self.detach(spec.family);
        }
    }
}
