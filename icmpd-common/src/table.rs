//! Read-only view of the network stack's interface addresses.
//!
//! The table is owned and refreshed by the network stack. The core only ever
//! takes a momentary look through this trait and never keeps results across
//! packets.

use core::net::{Ipv4Addr, Ipv6Addr};

use crate::{AnycastV6, IfAddrV4, IfName};

/// Identity of an inet6 device (the ifindex of the owning net device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevId(pub u32);

/// One IPv4 address of a device together with the label it was added under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicastAddr {
    pub label: IfName,
    pub address: Ipv4Addr,
}

/// One IPv6 anycast address and the inet6 device that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnycastAddr {
    pub owner: DevId,
    pub address: Ipv6Addr,
}

/// IPv6 state of a device: its identity plus its anycast list.
#[derive(Debug)]
pub struct Inet6Dev<I> {
    pub id: DevId,
    pub anycast: I,
}

/// Interface address lookups used by the resolver.
///
/// Iterators are lazy, finite and walked at most once per lookup.
pub trait InterfaceAddressTable {
    type Unicast<'a>: Iterator<Item = UnicastAddr>
    where
        Self: 'a;

    type Anycast<'a>: Iterator<Item = AnycastAddr>
    where
        Self: 'a;

    /// IPv4 addresses of the device called `name`, in stack order.
    /// `None` if there is no such device or it has no IPv4 state.
    fn inet_dev(&self, name: &IfName) -> Option<Self::Unicast<'_>>;

    /// IPv6 state of the device called `name`.
    /// `None` if there is no such device or it has no IPv6 state.
    fn inet6_dev(&self, name: &IfName) -> Option<Inet6Dev<Self::Anycast<'_>>>;
}

impl From<&IfAddrV4> for UnicastAddr {
    fn from(entry: &IfAddrV4) -> Self {
        Self {
            label: IfName::from_raw(entry.label),
            address: Ipv4Addr::from(entry.addr),
        }
    }
}

impl From<UnicastAddr> for IfAddrV4 {
    fn from(entry: UnicastAddr) -> Self {
        IfAddrV4::new(entry.label.to_raw(), entry.address.octets())
    }
}

impl From<&AnycastV6> for AnycastAddr {
    fn from(entry: &AnycastV6) -> Self {
        Self {
            owner: DevId(entry.owner),
            address: Ipv6Addr::from(entry.addr),
        }
    }
}

impl From<AnycastAddr> for AnycastV6 {
    fn from(entry: AnycastAddr) -> Self {
        AnycastV6::new(entry.owner.0, entry.address.octets())
    }
}
