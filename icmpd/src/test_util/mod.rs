//! Test utilities for icmpd integration tests.
//!
//! Provides packet builders and a fixed interface table for exercising the
//! target without CAP_NET_ADMIN or real devices.

pub mod packets;

pub use packets::*;

use crate::iface::InterfaceSnapshot;
use icmpd_common::{DevId, IfName};
use std::net::{Ipv4Addr, Ipv6Addr};

/// ifindex of eth0 in [`test_snapshot`]
pub const ETH0_INDEX: u32 = 2;

/// ifindex of eth1 in [`test_snapshot`]
pub const ETH1_INDEX: u32 = 3;

/// Primary IPv4 address of eth0 in [`test_snapshot`]
pub const ETH0_V4: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 9);

/// Anycast address owned by eth0 in [`test_snapshot`]
pub const ETH0_ANYCAST: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x20);

/// Interface name from a string literal
pub fn ifname(name: &str) -> IfName {
    IfName::new(name).unwrap_or_else(|| panic!("bad test interface name {name:?}"))
}

/// Interface table used across tests:
///
/// - eth0 (2): `eth0:1` 198.51.100.1, then `eth0` 198.51.100.9 and .10;
///   anycast 2001:db8::70 owned by 7, then 2001:db8::20 owned by eth0
/// - eth1 (3): only the alias `eth1:web` 203.0.113.4, empty anycast list
/// - v4only (4): `v4only` 192.0.2.4, no IPv6 state
pub fn test_snapshot() -> InterfaceSnapshot {
    let mut snapshot = InterfaceSnapshot::new();
    snapshot
        .add_device(ifname("eth0"), ETH0_INDEX)
        .add_unicast(ifname("eth0"), ifname("eth0:1"), Ipv4Addr::new(198, 51, 100, 1))
        .add_unicast(ifname("eth0"), ifname("eth0"), ETH0_V4)
        .add_unicast(ifname("eth0"), ifname("eth0"), Ipv4Addr::new(198, 51, 100, 10))
        .add_anycast(
            ifname("eth0"),
            DevId(7),
            Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x70),
        )
        .add_anycast(ifname("eth0"), DevId(ETH0_INDEX), ETH0_ANYCAST)
        .add_device(ifname("eth1"), ETH1_INDEX)
        .add_unicast(ifname("eth1"), ifname("eth1:web"), Ipv4Addr::new(203, 0, 113, 4))
        .add_inet6_dev(ifname("eth1"))
        .add_device(ifname("v4only"), 4)
        .add_unicast(ifname("v4only"), ifname("v4only"), Ipv4Addr::new(192, 0, 2, 4));
    snapshot
}
