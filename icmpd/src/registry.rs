//! Target registration with a host pipeline, and rule installation.
//!
//! The ICMPD target exists once per family, both only valid in the mangle
//! table. A pipeline backend implements [`TargetRegistry`]; [`XtRegistry`] is
//! the in-process one, [`crate::EbpfManager`] the TC one.

use icmpd_common::{
    ConfigValidationError, Family, INFO_SIZE, IcmpdInfo, InterfaceAddressTable, PacketBuffer,
    RuleConfigV4, RuleConfigV6, Verdict, icmpd_v4, icmpd_v6, validate,
};
use thiserror::Error;
use tracing::{debug, info};

pub const TARGET_NAME: &str = "ICMPD";
pub const MANGLE_TABLE: &str = "mangle";

/// Registration and installation errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Target {name} revision {revision} for {family:?} is already registered")]
    AlreadyRegistered {
        name: &'static str,
        revision: u8,
        family: Family,
    },

    #[error("No target {name} registered for {family:?}")]
    NotFound { name: String, family: Family },

    #[error("Target {name} is only valid in the {expected} table, not {table}")]
    WrongTable {
        name: &'static str,
        expected: &'static str,
        table: String,
    },

    #[error("Target {name} expects {expected} bytes of configuration, got {got}")]
    SizeMismatch {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigValidationError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registration record of one target variant.
#[derive(Debug, Clone, Copy)]
pub struct TargetSpec {
    pub name: &'static str,
    pub revision: u8,
    pub family: Family,
    pub table: &'static str,
    pub target_size: usize,
    pub check_entry: fn(&IcmpdInfo) -> std::result::Result<(), ConfigValidationError>,
}

impl TargetSpec {
    fn same_target(&self, other: &TargetSpec) -> bool {
        self.name == other.name && self.revision == other.revision && self.family == other.family
    }
}

pub static ICMPD_TARGETS: [TargetSpec; 2] = [
    TargetSpec {
        name: TARGET_NAME,
        revision: 0,
        family: Family::Ipv4,
        table: MANGLE_TABLE,
        target_size: INFO_SIZE,
        check_entry,
    },
    TargetSpec {
        name: TARGET_NAME,
        revision: 0,
        family: Family::Ipv6,
        table: MANGLE_TABLE,
        target_size: INFO_SIZE,
        check_entry,
    },
];

/// Load-time check shared by both variants.
pub fn check_entry(info: &IcmpdInfo) -> std::result::Result<(), ConfigValidationError> {
    validate(info.mode).inspect_err(|_| {
        info!(mode = info.mode, "ICMPD: invalid or unknown mode");
    })
}

/// The ICMPD specs for the given families, in `ICMPD_TARGETS` order.
pub fn targets_for(families: &[Family]) -> Vec<TargetSpec> {
    ICMPD_TARGETS
        .iter()
        .filter(|spec| families.contains(&spec.family))
        .copied()
        .collect()
}

/// A packet pipeline that targets can be registered with.
pub trait TargetRegistry {
    type Error;

    /// Register all of `targets`, or none of them.
    fn register_targets(&mut self, targets: &[TargetSpec]) -> std::result::Result<(), Self::Error>;

    fn unregister_targets(&mut self, targets: &[TargetSpec]);
}

/// Register both ICMPD variants.
pub fn init<R: TargetRegistry + ?Sized>(registry: &mut R) -> std::result::Result<(), R::Error> {
    registry.register_targets(&ICMPD_TARGETS)
}

/// Unregister both ICMPD variants.
pub fn exit<R: TargetRegistry + ?Sized>(registry: &mut R) {
    registry.unregister_targets(&ICMPD_TARGETS)
}

/// In-process target registry.
#[derive(Debug, Default)]
pub struct XtRegistry {
    targets: Vec<TargetSpec>,
}

impl XtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, name: &str, family: Family) -> bool {
        self.find(name, family).is_some()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn find(&self, name: &str, family: Family) -> Option<&TargetSpec> {
        self.targets
            .iter()
            .find(|spec| spec.name == name && spec.family == family)
    }

    /// Install a rule: `data` is the raw configuration record from the rule
    /// loader.
    pub fn install(
        &self,
        family: Family,
        name: &str,
        table: &str,
        data: &[u8],
    ) -> Result<InstalledRule> {
        let spec = self.find(name, family).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
            family,
        })?;

        if spec.table != table {
            return Err(RegistryError::WrongTable {
                name: spec.name,
                expected: spec.table,
                table: table.to_string(),
            });
        }

        let info = IcmpdInfo::from_bytes(data)
            .filter(|_| data.len() == spec.target_size)
            .ok_or(RegistryError::SizeMismatch {
                name: spec.name,
                expected: spec.target_size,
                got: data.len(),
            })?;

        (spec.check_entry)(&info)?;

        let rule = match family {
            Family::Ipv4 => InstalledRule::V4(RuleConfigV4::from_info(&info)?),
            Family::Ipv6 => InstalledRule::V6(RuleConfigV6::from_info(&info)?),
        };
        info!(target_name = spec.name, ?family, ?rule, "Rule installed");
        Ok(rule)
    }
}

impl TargetRegistry for XtRegistry {
    type Error = RegistryError;

    fn register_targets(&mut self, targets: &[TargetSpec]) -> Result<()> {
        let before = self.targets.len();
        for spec in targets {
            if self.targets.iter().any(|t| t.same_target(spec)) {
                self.targets.truncate(before);
                return Err(RegistryError::AlreadyRegistered {
                    name: spec.name,
                    revision: spec.revision,
                    family: spec.family,
                });
            }
            self.targets.push(*spec);
            debug!(target_name = spec.name, family = ?spec.family, "Target registered");
        }
        Ok(())
    }

    fn unregister_targets(&mut self, targets: &[TargetSpec]) {
        self.targets
            .retain(|t| !targets.iter().any(|spec| spec.same_target(t)));
    }
}

/// A validated rule bound to its family's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstalledRule {
    V4(RuleConfigV4),
    V6(RuleConfigV6),
}

impl InstalledRule {
    pub fn family(&self) -> Family {
        match self {
            InstalledRule::V4(_) => Family::Ipv4,
            InstalledRule::V6(_) => Family::Ipv6,
        }
    }

    /// Run the target on one packet.
    pub fn process<P, T>(&self, packet: &mut P, table: &T) -> Verdict
    where
        P: PacketBuffer + ?Sized,
        T: InterfaceAddressTable + ?Sized,
    {
        match self {
            InstalledRule::V4(config) => icmpd_v4(packet, config, table),
            InstalledRule::V6(config) => icmpd_v6(packet, config, table),
        }
    }
}
