//! Replacement address resolution.
//!
//! A name that does not resolve yields the unspecified address (`0.0.0.0` /
//! `::`) instead of an error; the packet is still rewritten with it.

use core::net::{Ipv4Addr, Ipv6Addr};

use crate::config::{RuleConfig, Target};
use crate::table::{Inet6Dev, InterfaceAddressTable};
use crate::IfName;

/// Resolve the IPv4 source for `config`.
///
/// For [`Target::ByInterface`] this is the first unicast address of the named
/// device whose label equals the configured name exactly, so alias labels
/// such as `eth0:1` are never picked for `eth0`.
pub fn resolve_v4<T>(config: &RuleConfig<Ipv4Addr>, table: &T) -> Ipv4Addr
where
    T: InterfaceAddressTable + ?Sized,
{
    match config.target {
        Target::Static(addr) => addr,
        Target::ByInterface(ref name) => {
            addr_by_label(table, name).unwrap_or(Ipv4Addr::UNSPECIFIED)
        }
    }
}

/// Resolve the IPv6 source for `config`.
///
/// For [`Target::ByInterface`] this walks the device's anycast list (not its
/// unicast addresses) and takes the first entry owned by that same inet6
/// device.
pub fn resolve_v6<T>(config: &RuleConfig<Ipv6Addr>, table: &T) -> Ipv6Addr
where
    T: InterfaceAddressTable + ?Sized,
{
    match config.target {
        Target::Static(addr) => addr,
        Target::ByInterface(ref name) => {
            anycast_by_owner(table, name).unwrap_or(Ipv6Addr::UNSPECIFIED)
        }
    }
}

fn addr_by_label<T>(table: &T, name: &IfName) -> Option<Ipv4Addr>
where
    T: InterfaceAddressTable + ?Sized,
{
    table
        .inet_dev(name)?
        .find(|ifa| ifa.label == *name)
        .map(|ifa| ifa.address)
}

fn anycast_by_owner<T>(table: &T, name: &IfName) -> Option<Ipv6Addr>
where
    T: InterfaceAddressTable + ?Sized,
{
    let Inet6Dev { id, mut anycast } = table.inet6_dev(name)?;
    anycast
        .find(|aca| aca.owner == id)
        .map(|aca| aca.address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{AnycastAddr, DevId, UnicastAddr};
    use core::iter::Copied;
    use core::slice::Iter;

    struct Dev {
        name: &'static str,
        id: u32,
        unicast: Option<&'static [UnicastAddr]>,
        anycast: Option<&'static [AnycastAddr]>,
    }

    struct Table(&'static [Dev]);

    impl Table {
        fn dev(&self, name: &IfName) -> Option<&Dev> {
            self.0
                .iter()
                .find(|d| IfName::new(d.name).as_ref() == Some(name))
        }
    }

    impl InterfaceAddressTable for Table {
        type Unicast<'a> = Copied<Iter<'a, UnicastAddr>>;
        type Anycast<'a> = Copied<Iter<'a, AnycastAddr>>;

        fn inet_dev(&self, name: &IfName) -> Option<Self::Unicast<'_>> {
            Some(self.dev(name)?.unicast?.iter().copied())
        }

        fn inet6_dev(&self, name: &IfName) -> Option<Inet6Dev<Self::Anycast<'_>>> {
            let dev = self.dev(name)?;
            Some(Inet6Dev {
                id: DevId(dev.id),
                anycast: dev.anycast?.iter().copied(),
            })
        }
    }

    const fn name(s: &[u8]) -> IfName {
        let mut raw = [0u8; crate::IFNAMSIZ];
        let mut i = 0;
        while i < s.len() {
            raw[i] = s[i];
            i += 1;
        }
        IfName::from_raw(raw)
    }

    const fn v6(last: u16) -> Ipv6Addr {
        Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last)
    }

    static TABLE: Table = Table(&[
        Dev {
            name: "eth0",
            id: 2,
            unicast: Some(&[
                UnicastAddr {
                    label: name(b"eth0:1"),
                    address: Ipv4Addr::new(198, 51, 100, 1),
                },
                UnicastAddr {
                    label: name(b"eth0"),
                    address: Ipv4Addr::new(198, 51, 100, 9),
                },
                UnicastAddr {
                    label: name(b"eth0"),
                    address: Ipv4Addr::new(198, 51, 100, 10),
                },
            ]),
            anycast: Some(&[
                AnycastAddr {
                    owner: DevId(7),
                    address: v6(0x70),
                },
                AnycastAddr {
                    owner: DevId(2),
                    address: v6(0x20),
                },
            ]),
        },
        Dev {
            name: "eth1",
            id: 3,
            unicast: Some(&[UnicastAddr {
                label: name(b"eth1:web"),
                address: Ipv4Addr::new(203, 0, 113, 4),
            }]),
            anycast: Some(&[]),
        },
        Dev {
            name: "v4only",
            id: 4,
            unicast: Some(&[UnicastAddr {
                label: name(b"v4only"),
                address: Ipv4Addr::new(192, 0, 2, 4),
            }]),
            anycast: None,
        },
    ]);

    #[test]
    fn test_static_ignores_table() {
        let v4 = RuleConfig::to_static(Ipv4Addr::new(198, 51, 100, 7));
        assert_eq!(resolve_v4(&v4, &TABLE), Ipv4Addr::new(198, 51, 100, 7));

        let v6cfg = RuleConfig::to_static(v6(7));
        assert_eq!(resolve_v6(&v6cfg, &TABLE), v6(7));
    }

    #[test]
    fn test_v4_first_exact_label_match() {
        let config = RuleConfig::<Ipv4Addr>::by_interface(name(b"eth0"));
        assert_eq!(resolve_v4(&config, &TABLE), Ipv4Addr::new(198, 51, 100, 9));
    }

    #[test]
    fn test_v4_no_matching_label_is_unspecified() {
        let config = RuleConfig::<Ipv4Addr>::by_interface(name(b"eth1"));
        assert_eq!(resolve_v4(&config, &TABLE), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_v4_unknown_device_is_unspecified() {
        let config = RuleConfig::<Ipv4Addr>::by_interface(name(b"bogus0"));
        assert_eq!(resolve_v4(&config, &TABLE), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_v6_first_anycast_owned_by_device() {
        let config = RuleConfig::<Ipv6Addr>::by_interface(name(b"eth0"));
        assert_eq!(resolve_v6(&config, &TABLE), v6(0x20));
    }

    #[test]
    fn test_v6_empty_anycast_is_unspecified() {
        let config = RuleConfig::<Ipv6Addr>::by_interface(name(b"eth1"));
        assert_eq!(resolve_v6(&config, &TABLE), Ipv6Addr::UNSPECIFIED);
    }

    #[test]
    fn test_v6_without_inet6_state_is_unspecified() {
        let config = RuleConfig::<Ipv6Addr>::by_interface(name(b"v4only"));
        assert_eq!(resolve_v6(&config, &TABLE), Ipv6Addr::UNSPECIFIED);
    }
}
