//! Typed rule configuration and load-time validation.
//!
//! The wire record overlays a static address and an interface name in the
//! same 16 bytes. Decoding turns that into [`Target`], so the per-packet code
//! can never read the wrong variant.

use core::fmt;
use core::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::{Family, IFNAMSIZ, IcmpdInfo, MAX_MODE, MODE_IFADDR, MODE_TO};

/// Rule configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("invalid or unknown mode {0}")]
    UnknownMode(u32),
}

pub type Result<T> = core::result::Result<T, ConfigValidationError>;

/// Reject modes outside the defined set. Runs once, before a rule is installed.
pub fn validate(mode: u32) -> Result<()> {
    if mode > MAX_MODE {
        return Err(ConfigValidationError::UnknownMode(mode));
    }
    Ok(())
}

/// How the replacement source address is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Fixed address from the rule
    To,
    /// Address currently bound to a named interface
    IfAddr,
}

impl TryFrom<u32> for Mode {
    type Error = ConfigValidationError;

    fn try_from(mode: u32) -> Result<Self> {
        validate(mode)?;
        Ok(match mode {
            MODE_TO => Mode::To,
            _ => Mode::IfAddr,
        })
    }
}

impl From<Mode> for u32 {
    fn from(mode: Mode) -> u32 {
        match mode {
            Mode::To => MODE_TO,
            Mode::IfAddr => MODE_IFADDR,
        }
    }
}

/// Bounded interface name.
///
/// Holds up to [`IFNAMSIZ`] bytes; a name of exactly that length carries no
/// terminator. Bytes after the first NUL are zeroed on construction, so two
/// names compare equal exactly when their strings are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IfName {
    bytes: [u8; IFNAMSIZ],
}

impl IfName {
    pub const fn from_raw(raw: [u8; IFNAMSIZ]) -> Self {
        let mut bytes = [0u8; IFNAMSIZ];
        let mut i = 0;
        while i < IFNAMSIZ && raw[i] != 0 {
            bytes[i] = raw[i];
            i += 1;
        }
        Self { bytes }
    }

    /// Returns `None` if the name is longer than [`IFNAMSIZ`] or contains a NUL.
    pub fn new(name: &str) -> Option<Self> {
        let src = name.as_bytes();
        if src.len() > IFNAMSIZ || src.contains(&0) {
            return None;
        }
        let mut bytes = [0u8; IFNAMSIZ];
        bytes[..src.len()].copy_from_slice(src);
        Some(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(IFNAMSIZ);
        &self.bytes[..len]
    }

    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(self.as_bytes()).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }

    pub const fn to_raw(self) -> [u8; IFNAMSIZ] {
        self.bytes
    }
}

impl fmt::Display for IfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.as_bytes() {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for IfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IfName(\"{}\")", self)
    }
}

/// Address type a rule can carry for one protocol family.
pub trait WireAddr: Copy + Eq + fmt::Debug {
    const FAMILY: Family;

    fn from_target(target: &[u8; 16]) -> Self;

    fn to_target(self) -> [u8; 16];
}

impl WireAddr for Ipv4Addr {
    const FAMILY: Family = Family::Ipv4;

    fn from_target(target: &[u8; 16]) -> Self {
        Ipv4Addr::new(target[0], target[1], target[2], target[3])
    }

    fn to_target(self) -> [u8; 16] {
        let mut target = [0u8; 16];
        target[..4].copy_from_slice(&self.octets());
        target
    }
}

impl WireAddr for Ipv6Addr {
    const FAMILY: Family = Family::Ipv6;

    fn from_target(target: &[u8; 16]) -> Self {
        Ipv6Addr::from(*target)
    }

    fn to_target(self) -> [u8; 16] {
        self.octets()
    }
}

/// Replacement source selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<A> {
    Static(A),
    ByInterface(IfName),
}

/// Validated, immutable rule configuration for one protocol family.
///
/// Safe to share read-only between any number of concurrent packet paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleConfig<A> {
    pub target: Target<A>,
}

pub type RuleConfigV4 = RuleConfig<Ipv4Addr>;
pub type RuleConfigV6 = RuleConfig<Ipv6Addr>;

impl<A: WireAddr> RuleConfig<A> {
    pub const fn new(target: Target<A>) -> Self {
        Self { target }
    }

    pub const fn to_static(addr: A) -> Self {
        Self::new(Target::Static(addr))
    }

    pub const fn by_interface(name: IfName) -> Self {
        Self::new(Target::ByInterface(name))
    }

    /// Validate the mode, then decode the target for this family.
    pub fn from_info(info: &IcmpdInfo) -> Result<Self> {
        let target = match Mode::try_from(info.mode)? {
            Mode::To => Target::Static(A::from_target(&info.target)),
            Mode::IfAddr => Target::ByInterface(IfName::from_raw(info.target)),
        };
        Ok(Self::new(target))
    }

    pub fn mode(&self) -> Mode {
        match self.target {
            Target::Static(_) => Mode::To,
            Target::ByInterface(_) => Mode::IfAddr,
        }
    }

    pub fn to_info(&self) -> IcmpdInfo {
        match self.target {
            Target::Static(addr) => IcmpdInfo::new(MODE_TO, addr.to_target()),
            Target::ByInterface(name) => IcmpdInfo::ifaddr(name),
        }
    }

    pub const fn family(&self) -> Family {
        A::FAMILY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_validate_accepts_defined_modes() {
        assert_eq!(validate(0), Ok(()));
        assert_eq!(validate(1), Ok(()));
    }

    #[test]
    fn test_validate_rejects_unknown_modes() {
        assert_eq!(validate(2), Err(ConfigValidationError::UnknownMode(2)));
        assert_eq!(validate(5), Err(ConfigValidationError::UnknownMode(5)));
        assert_eq!(
            validate(u32::MAX),
            Err(ConfigValidationError::UnknownMode(u32::MAX))
        );
    }

    #[test]
    fn test_ifname_full_length_without_terminator() {
        let name = IfName::from_raw(*b"abcdefghijklmnop");
        assert_eq!(name.as_bytes(), b"abcdefghijklmnop");
        assert_eq!(name, IfName::new("abcdefghijklmnop").unwrap());
    }

    #[test]
    fn test_ifname_ignores_garbage_after_nul() {
        let mut raw = [0u8; IFNAMSIZ];
        raw[..4].copy_from_slice(b"eth0");
        raw[5..8].copy_from_slice(b"xyz");
        let name = IfName::from_raw(raw);
        assert_eq!(name.as_str(), Some("eth0"));
        assert_eq!(name, IfName::new("eth0").unwrap());
    }

    #[test]
    fn test_ifname_is_not_a_prefix_match() {
        assert_ne!(IfName::new("eth0").unwrap(), IfName::new("eth0:1").unwrap());
        assert_ne!(IfName::new("eth").unwrap(), IfName::new("eth0").unwrap());
    }

    #[test]
    fn test_ifname_rejects_oversized_and_nul() {
        assert!(IfName::new("abcdefghijklmnopq").is_none());
        assert!(IfName::new("et\0h0").is_none());
    }

    #[test]
    fn test_ifname_display_escapes_non_printable() {
        let name = IfName::from_raw(*b"a\x01b\0\0\0\0\0\0\0\0\0\0\0\0\0");
        assert_eq!(name.to_string(), "a\\x01b");
    }

    #[test]
    fn test_from_info_static_v4() {
        let info = IcmpdInfo::to_v4(Ipv4Addr::new(198, 51, 100, 7));
        let config = RuleConfigV4::from_info(&info).unwrap();
        assert_eq!(config.target, Target::Static(Ipv4Addr::new(198, 51, 100, 7)));
        assert_eq!(config.mode(), Mode::To);
        assert_eq!(config.to_info(), info);
    }

    #[test]
    fn test_from_info_static_v6() {
        let addr: Ipv6Addr = "2001:db8::7".parse().unwrap();
        let config = RuleConfigV6::from_info(&IcmpdInfo::to_v6(addr)).unwrap();
        assert_eq!(config.target, Target::Static(addr));
        assert_eq!(config.family(), Family::Ipv6);
    }

    #[test]
    fn test_from_info_by_interface() {
        let name = IfName::new("eth0").unwrap();
        let config = RuleConfigV6::from_info(&IcmpdInfo::ifaddr(name)).unwrap();
        assert_eq!(config.target, Target::ByInterface(name));
        assert_eq!(config.mode(), Mode::IfAddr);
    }

    #[test]
    fn test_from_info_rejects_unknown_mode() {
        let info = IcmpdInfo::new(2, [0; 16]);
        assert_eq!(
            RuleConfigV4::from_info(&info),
            Err(ConfigValidationError::UnknownMode(2))
        );
    }
}
