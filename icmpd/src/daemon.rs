//! Daemon startup sequence.
//!
//! Rules go into the maps first. A rule that follows an interface then gets
//! one address sync before any classifier is attached, so the first packets
//! already see the interface's addresses.

use crate::ebpf_loader::{EbpfError, EbpfManager};
use crate::iface::InterfaceSnapshot;
use crate::registry::{TargetRegistry, TargetSpec, targets_for};
use icmpd_common::{Family, IcmpdInfo, IfName, MODE_IFADDR};
use tracing::info;

/// Interface followed by the rules, if any of them is an ifaddr rule.
pub fn ifaddr_name(rules: &[(Family, IcmpdInfo)]) -> Option<IfName> {
    rules
        .iter()
        .find(|(_, info)| info.mode == MODE_IFADDR)
        .map(|(_, info)| IfName::from_raw(info.target))
}

/// Store `rules`, push `snapshot` for an ifaddr rule, then attach the
/// classifiers. Returns the registered targets for later unregistration.
pub fn bring_up(
    ebpf: &mut EbpfManager,
    rules: &[(Family, IcmpdInfo)],
    snapshot: Option<&InterfaceSnapshot>,
) -> Result<Vec<TargetSpec>, EbpfError> {
    for (family, info) in rules {
        ebpf.set_rule(*family, info)?;
    }

    if let (Some(name), Some(snapshot)) = (ifaddr_name(rules), snapshot) {
        ebpf.sync_interfaces(&name, snapshot)?;
        info!(if_name = %name, "Initial interface addresses synced");
    }

    let families: Vec<Family> = rules.iter().map(|(family, _)| *family).collect();
    let targets = targets_for(&families);
    ebpf.register_targets(&targets)?;
    Ok(targets)
}
