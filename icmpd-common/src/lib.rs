//! Shared core of the ICMPD source-address rewrite target.
//!
//! Everything in here is `no_std` and allocation-free so the same code runs in
//! userspace pipelines and in the TC classifiers from icmpd-ebpf-programs:
//!
//! ```text
//! IcmpdInfo (wire) --validate--> RuleConfig --resolve--> address --rewrite--> Verdict
//!                                                  ^
//!                                                  |
//!                                    InterfaceAddressTable (read-only)
//! ```

#![no_std]

#[cfg(test)]
extern crate std;

pub mod checksum;
pub mod config;
pub mod resolve;
pub mod rewrite;
pub mod table;

pub use checksum::{csum_fold, csum_replace4, ipv4_header_checksum};
pub use config::{
    ConfigValidationError, IfName, Mode, RuleConfig, RuleConfigV4, RuleConfigV6, Target,
    WireAddr, validate,
};
pub use resolve::{resolve_v4, resolve_v6};
pub use rewrite::{
    PacketBuffer, Verdict, icmpd_v4, icmpd_v6, rewrite_v4, rewrite_v6, saddr_v4_checksum,
};
pub use table::{AnycastAddr, DevId, Inet6Dev, InterfaceAddressTable, UnicastAddr};

use core::net::{Ipv4Addr, Ipv6Addr};

/// Size of an interface name buffer (the name is NUL-terminated only if shorter)
pub const IFNAMSIZ: usize = 16;

// Rule modes
pub const MODE_TO: u32 = 0;
pub const MODE_IFADDR: u32 = 1;
pub const MAX_MODE: u32 = MODE_IFADDR;

/// Maximum number of addresses per device carried in the eBPF interface maps
pub const MAX_IFADDRS: usize = 8;

// EtherTypes
pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;

// Header sizes
pub const ETH_HLEN: usize = 14;
pub const IPV4_HLEN: usize = 20;
pub const IPV6_HLEN: usize = 40;

/// ICMPD_INFO map slots, one rule per family
pub const INFO_IDX_V4: u32 = 0;
pub const INFO_IDX_V6: u32 = 1;

// Field offsets inside the network header
pub const IPV4_CHECK_OFF: usize = 10;
pub const IPV4_SADDR_OFF: usize = 12;
pub const IPV6_SADDR_OFF: usize = 8;

/// Protocol family a target is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    pub const fn info_index(self) -> u32 {
        match self {
            Family::Ipv4 => INFO_IDX_V4,
            Family::Ipv6 => INFO_IDX_V6,
        }
    }
}

/// Size of the configuration record on the wire
pub const INFO_SIZE: usize = core::mem::size_of::<IcmpdInfo>();

/// ICMPD target configuration as handed over by the rule loader.
/// Layout is fixed; userspace tooling and the eBPF maps share it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IcmpdInfo {
    /// Mode: 0=static address, 1=address of interface
    pub mode: u32,
    /// Static address (IPv4 in first 4 bytes, IPv6 uses all 16) or interface name
    pub target: [u8; 16],
}

impl IcmpdInfo {
    pub const fn new(mode: u32, target: [u8; 16]) -> Self {
        Self { mode, target }
    }

    /// Static IPv4 source; the trailing 12 bytes stay zero.
    pub fn to_v4(addr: Ipv4Addr) -> Self {
        let mut target = [0u8; 16];
        target[..4].copy_from_slice(&addr.octets());
        Self::new(MODE_TO, target)
    }

    pub fn to_v6(addr: Ipv6Addr) -> Self {
        Self::new(MODE_TO, addr.octets())
    }

    pub fn ifaddr(name: IfName) -> Self {
        Self::new(MODE_IFADDR, name.to_raw())
    }

    /// Decode a record; `data` must be exactly [`INFO_SIZE`] bytes.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != INFO_SIZE {
            return None;
        }
        let mode = u32::from_ne_bytes(data[..4].try_into().ok()?);
        let target = data[4..].try_into().ok()?;
        Some(Self::new(mode, target))
    }

    pub fn to_bytes(&self) -> [u8; INFO_SIZE] {
        let mut out = [0u8; INFO_SIZE];
        out[..4].copy_from_slice(&self.mode.to_ne_bytes());
        out[4..].copy_from_slice(&self.target);
        out
    }
}

impl Default for IcmpdInfo {
    fn default() -> Self {
        Self::new(MODE_TO, [0; 16])
    }
}

/// IPv4 unicast address entry in the IFADDRS_V4 map
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IfAddrV4 {
    /// Address label (e.g. "eth0" or an alias such as "eth0:1")
    pub label: [u8; IFNAMSIZ],
    /// IPv4 address in network byte order
    pub addr: [u8; 4],
}

impl IfAddrV4 {
    pub const fn new(label: [u8; IFNAMSIZ], addr: [u8; 4]) -> Self {
        Self { label, addr }
    }
}

/// All IPv4 addresses of one device, in kernel order
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct IfAddrListV4 {
    /// Number of valid entries (clamped to MAX_IFADDRS when read)
    pub count: u32,
    pub entries: [IfAddrV4; MAX_IFADDRS],
}

impl IfAddrListV4 {
    pub const fn new() -> Self {
        Self {
            count: 0,
            entries: [IfAddrV4::new([0; IFNAMSIZ], [0; 4]); MAX_IFADDRS],
        }
    }

    /// Append an entry. Returns false once the list is full.
    pub fn push(&mut self, entry: IfAddrV4) -> bool {
        let idx = self.count as usize;
        if idx >= MAX_IFADDRS {
            return false;
        }
        self.entries[idx] = entry;
        self.count += 1;
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &IfAddrV4> {
        self.entries.iter().take(self.count as usize)
    }
}

impl Default for IfAddrListV4 {
    fn default() -> Self {
        Self::new()
    }
}

/// IPv6 anycast address entry in the ANYCAST_V6 map
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnycastV6 {
    /// Identity of the owning inet6 device (its ifindex)
    pub owner: u32,
    /// IPv6 address in network byte order
    pub addr: [u8; 16],
}

impl AnycastV6 {
    pub const fn new(owner: u32, addr: [u8; 16]) -> Self {
        Self { owner, addr }
    }
}

/// Anycast list of one inet6 device. Presence of the entry means the device
/// has IPv6 state.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AnycastListV6 {
    /// Identity of the inet6 device (its ifindex)
    pub dev: u32,
    /// Number of valid entries (clamped to MAX_IFADDRS when read)
    pub count: u32,
    pub entries: [AnycastV6; MAX_IFADDRS],
}

impl AnycastListV6 {
    pub const fn new(dev: u32) -> Self {
        Self {
            dev,
            count: 0,
            entries: [AnycastV6::new(0, [0; 16]); MAX_IFADDRS],
        }
    }

    /// Append an entry. Returns false once the list is full.
    pub fn push(&mut self, entry: AnycastV6) -> bool {
        let idx = self.count as usize;
        if idx >= MAX_IFADDRS {
            return false;
        }
        self.entries[idx] = entry;
        self.count += 1;
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnycastV6> {
        self.entries.iter().take(self.count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_layout() {
        assert_eq!(core::mem::size_of::<IcmpdInfo>(), 20);
        assert_eq!(core::mem::align_of::<IcmpdInfo>(), 4);
    }

    #[test]
    fn test_info_to_v4_zero_pads() {
        let info = IcmpdInfo::to_v4(Ipv4Addr::new(198, 51, 100, 7));
        assert_eq!(info.mode, MODE_TO);
        assert_eq!(&info.target[..4], &[198, 51, 100, 7]);
        assert!(info.target[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_info_bytes_require_exact_size() {
        let info = IcmpdInfo::new(MODE_IFADDR, *b"eth0\0\0\0\0\0\0\0\0\0\0\0\0");
        assert_eq!(IcmpdInfo::from_bytes(&info.to_bytes()), Some(info));
        assert_eq!(IcmpdInfo::from_bytes(&[0u8; INFO_SIZE - 1]), None);
        assert_eq!(IcmpdInfo::from_bytes(&[0u8; INFO_SIZE + 4]), None);
    }

    #[test]
    fn test_list_push_stops_when_full() {
        let mut list = IfAddrListV4::new();
        for i in 0..MAX_IFADDRS {
            assert!(list.push(IfAddrV4::new([0; IFNAMSIZ], [10, 0, 0, i as u8])));
        }
        assert!(!list.push(IfAddrV4::new([0; IFNAMSIZ], [10, 0, 0, 99])));
        assert_eq!(list.iter().count(), MAX_IFADDRS);
    }

    #[test]
    fn test_list_iter_clamps_bogus_count() {
        let mut list = AnycastListV6::new(3);
        list.count = 1000;
        assert_eq!(list.iter().count(), MAX_IFADDRS);
    }
}
