//! ICMPD target options: parsing, listing and saving rules.
//!
//! `--to` and `--ifaddr` are the two ways to pick the replacement source.
//! [`print`] and [`save`] go the other way, from a stored record back to
//! text; `save` output parses back into the same record.

use clap::{ArgGroup, Args};
use icmpd_common::{Family, IFNAMSIZ, IcmpdInfo, IfName, MODE_IFADDR, MODE_TO, WireAddr};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Option parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("Bad IP address \"{0}\"")]
    BadAddress(String),

    #[error("Interface name too long: \"{0}\" (at most {max} bytes)", max = IFNAMSIZ - 1)]
    NameTooLong(String),

    #[error("Interface name must not be empty")]
    EmptyName,

    #[error("Invalid interface name \"{0}\"")]
    InvalidName(String),

    #[error("One of --to or --ifaddr is required")]
    MissingTarget,

    #[error("--to and --ifaddr are mutually exclusive")]
    ConflictingTargets,
}

pub type Result<T> = std::result::Result<T, OptionsError>;

pub const HELP: &str = "\
ICMPD target options:
  --to <ipaddr>        Address to map source to.
  --ifaddr <device>    Address on which device to map source to.
";

/// Replacement source selection, exactly one of the two.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
#[command(group(ArgGroup::new("target").required(true).args(["to", "ifaddr"])))]
pub struct TargetOptions {
    /// Address to map source to
    #[arg(long, value_name = "ADDR")]
    pub to: Option<String>,

    /// Map source to the address of this device
    #[arg(long, value_name = "DEVICE")]
    pub ifaddr: Option<String>,
}

impl TargetOptions {
    pub fn to(addr: impl Into<String>) -> Self {
        Self {
            to: Some(addr.into()),
            ifaddr: None,
        }
    }

    pub fn ifaddr(name: impl Into<String>) -> Self {
        Self {
            to: None,
            ifaddr: Some(name.into()),
        }
    }

    /// Family implied by a `--to` literal, if one was given and parses.
    pub fn static_family(&self) -> Option<Family> {
        match self.to.as_deref()?.parse::<IpAddr>().ok()? {
            IpAddr::V4(_) => Some(Family::Ipv4),
            IpAddr::V6(_) => Some(Family::Ipv6),
        }
    }

    /// Build the configuration record for a rule of `family`.
    pub fn to_info(&self, family: Family) -> Result<IcmpdInfo> {
        match (&self.to, &self.ifaddr) {
            (Some(addr), None) => parse_to(addr, family),
            (None, Some(name)) => parse_ifaddr(name).map(IcmpdInfo::ifaddr),
            (None, None) => Err(OptionsError::MissingTarget),
            (Some(_), Some(_)) => Err(OptionsError::ConflictingTargets),
        }
    }
}

fn parse_to(arg: &str, family: Family) -> Result<IcmpdInfo> {
    let bad = |_| OptionsError::BadAddress(arg.to_string());
    match family {
        Family::Ipv4 => arg.parse::<Ipv4Addr>().map(IcmpdInfo::to_v4).map_err(bad),
        Family::Ipv6 => arg.parse::<Ipv6Addr>().map(IcmpdInfo::to_v6).map_err(bad),
    }
}

/// Accepts 1..IFNAMSIZ bytes, leaving room for the terminator.
pub fn parse_ifaddr(arg: &str) -> Result<IfName> {
    if arg.is_empty() {
        return Err(OptionsError::EmptyName);
    }
    if arg.len() >= IFNAMSIZ {
        return Err(OptionsError::NameTooLong(arg.to_string()));
    }
    IfName::new(arg).ok_or_else(|| OptionsError::InvalidName(arg.to_string()))
}

fn static_addr(info: &IcmpdInfo, family: Family) -> IpAddr {
    match family {
        Family::Ipv4 => IpAddr::V4(Ipv4Addr::from_target(&info.target)),
        Family::Ipv6 => IpAddr::V6(Ipv6Addr::from_target(&info.target)),
    }
}

/// The name as written on the command line. `Display` escapes non-graphic
/// bytes, which would not parse back.
fn raw_name(info: &IcmpdInfo) -> String {
    String::from_utf8_lossy(IfName::from_raw(info.target).as_bytes()).into_owned()
}

/// Rule listing fragment, e.g. `" to: 198.51.100.7"`.
pub fn print(info: &IcmpdInfo, family: Family) -> String {
    let mut out = String::from(" to:");
    match info.mode {
        MODE_TO => out.push_str(&format!(" {}", static_addr(info, family))),
        MODE_IFADDR => out.push_str(&format!(" address of interface {}", raw_name(info))),
        _ => {}
    }
    out
}

/// Rule save fragment, e.g. `" --ifaddr eth0"`.
pub fn save(info: &IcmpdInfo, family: Family) -> String {
    match info.mode {
        MODE_TO => format!(" --to {}", static_addr(info, family)),
        MODE_IFADDR => format!(" --ifaddr {}", raw_name(info)),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        target: TargetOptions,
    }

    fn parse(args: &[&str]) -> std::result::Result<TargetOptions, clap::Error> {
        TestCli::try_parse_from(std::iter::once("icmpd").chain(args.iter().copied()))
            .map(|cli| cli.target)
    }

    #[test]
    fn test_to_v4() {
        let info = TargetOptions::to("198.51.100.7").to_info(Family::Ipv4).unwrap();
        assert_eq!(info, IcmpdInfo::to_v4(Ipv4Addr::new(198, 51, 100, 7)));
        assert_eq!(&info.target[4..], &[0u8; 12]);
    }

    #[test]
    fn test_to_v6() {
        let info = TargetOptions::to("2001:db8::1").to_info(Family::Ipv6).unwrap();
        assert_eq!(info, IcmpdInfo::to_v6("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_to_family_mismatch_is_bad_address() {
        assert_eq!(
            TargetOptions::to("2001:db8::1").to_info(Family::Ipv4),
            Err(OptionsError::BadAddress("2001:db8::1".into()))
        );
        assert_eq!(
            TargetOptions::to("not-an-ip").to_info(Family::Ipv4),
            Err(OptionsError::BadAddress("not-an-ip".into()))
        );
    }

    #[test]
    fn test_ifaddr_name_bounds() {
        let info = TargetOptions::ifaddr("eth0").to_info(Family::Ipv4).unwrap();
        assert_eq!(info.mode, MODE_IFADDR);
        assert_eq!(&info.target[..5], b"eth0\0");

        assert!(TargetOptions::ifaddr("a23456789012345").to_info(Family::Ipv4).is_ok());
        assert_eq!(
            parse_ifaddr("a234567890123456"),
            Err(OptionsError::NameTooLong("a234567890123456".into()))
        );
        assert_eq!(parse_ifaddr(""), Err(OptionsError::EmptyName));
        assert_eq!(
            parse_ifaddr("et\0h"),
            Err(OptionsError::InvalidName("et\0h".into()))
        );
    }

    #[test]
    fn test_exactly_one_target() {
        assert_eq!(
            TargetOptions::default().to_info(Family::Ipv4),
            Err(OptionsError::MissingTarget)
        );
        let both = TargetOptions {
            to: Some("10.0.0.1".into()),
            ifaddr: Some("eth0".into()),
        };
        assert_eq!(
            both.to_info(Family::Ipv4),
            Err(OptionsError::ConflictingTargets)
        );

        assert!(parse(&[]).is_err());
        assert!(parse(&["--to", "10.0.0.1", "--ifaddr", "eth0"]).is_err());
        assert_eq!(parse(&["--ifaddr", "eth0"]).unwrap(), TargetOptions::ifaddr("eth0"));
    }

    #[test]
    fn test_static_family() {
        assert_eq!(TargetOptions::to("10.0.0.1").static_family(), Some(Family::Ipv4));
        assert_eq!(TargetOptions::to("::1").static_family(), Some(Family::Ipv6));
        assert_eq!(TargetOptions::to("bogus").static_family(), None);
        assert_eq!(TargetOptions::ifaddr("eth0").static_family(), None);
    }

    #[test]
    fn test_print() {
        let info = IcmpdInfo::to_v4(Ipv4Addr::new(198, 51, 100, 7));
        assert_eq!(print(&info, Family::Ipv4), " to: 198.51.100.7");

        let info = IcmpdInfo::ifaddr(IfName::new("eth0").unwrap());
        assert_eq!(print(&info, Family::Ipv6), " to: address of interface eth0");

        let info = IcmpdInfo::ifaddr(IfName::new("wlän0").unwrap());
        assert_eq!(print(&info, Family::Ipv4), " to: address of interface wlän0");

        assert_eq!(print(&IcmpdInfo::new(7, [0; 16]), Family::Ipv4), " to:");
    }

    #[test]
    fn test_save_parses_back() {
        let records = [
            (Family::Ipv4, IcmpdInfo::to_v4(Ipv4Addr::new(198, 51, 100, 7))),
            (Family::Ipv6, IcmpdInfo::to_v6("2001:db8::7".parse().unwrap())),
            (Family::Ipv4, IcmpdInfo::ifaddr(IfName::new("eth0").unwrap())),
            (Family::Ipv6, IcmpdInfo::ifaddr(IfName::new("wlän0").unwrap())),
            (Family::Ipv4, IcmpdInfo::ifaddr(IfName::new("br\x01lan").unwrap())),
        ];

        for (family, info) in records {
            let saved = save(&info, family);
            let args: Vec<&str> = saved.split_whitespace().collect();
            let reparsed = parse(&args).unwrap().to_info(family).unwrap();
            assert_eq!(reparsed, info, "{saved}");
        }
    }

    #[test]
    fn test_save_unknown_mode_is_empty() {
        assert_eq!(save(&IcmpdInfo::new(2, [0; 16]), Family::Ipv4), "");
    }

    #[test]
    fn test_help_mentions_both_options() {
        assert!(HELP.contains("--to"));
        assert!(HELP.contains("--ifaddr"));
    }
}
