//! Source address rewrite for IPv4 and IPv6 headers.
//!
//! Each call is a single synchronous step ending in [`Verdict::Continue`] or
//! [`Verdict::Drop`]. The only way to get `Drop` is a packet whose storage
//! cannot be made privately writable over its full length; in that case
//! nothing has been touched.

use core::net::{Ipv4Addr, Ipv6Addr};

use crate::checksum::csum_replace4;
use crate::config::RuleConfig;
use crate::resolve::{resolve_v4, resolve_v6};
use crate::table::InterfaceAddressTable;
use crate::{IPV4_CHECK_OFF, IPV4_HLEN, IPV4_SADDR_OFF, IPV6_HLEN, IPV6_SADDR_OFF};

/// Per-packet outcome handed back to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Go on with the next rule
    Continue,
    /// Discard the packet and stop processing it
    Drop,
}

/// Packet storage the rewrite borrows for the duration of one call.
pub trait PacketBuffer {
    /// Packet length starting at the network header.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exclusive, private write access to at least the first `len` bytes,
    /// starting at the network header. `None` if that cannot be granted.
    fn make_writable(&mut self, len: usize) -> Option<&mut [u8]>;
}

/// A plain byte slice is already private to its borrower.
impl PacketBuffer for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn make_writable(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > <[u8]>::len(self) {
            return None;
        }
        Some(self)
    }
}

/// Request write access over the whole packet. A writable region that cannot
/// hold the fixed header is refused as well.
fn writable<P>(packet: &mut P, header_len: usize) -> Option<&mut [u8]>
where
    P: PacketBuffer + ?Sized,
{
    let len = packet.len();
    let data = packet.make_writable(len)?;
    if data.len() < header_len {
        return None;
    }
    Some(data)
}

/// Header checksum after replacing source `old` with `new`, or `None` when
/// the source already equals `new` and the header must stay untouched.
#[inline(always)]
pub fn saddr_v4_checksum(old: [u8; 4], check: u16, new: Ipv4Addr) -> Option<u16> {
    let new = new.octets();
    if old == new {
        return None;
    }
    Some(csum_replace4(check, old, new))
}

/// Replace the IPv4 source and patch the header checksum in place.
/// `header` must hold at least [`IPV4_HLEN`] bytes.
fn replace_saddr_v4(header: &mut [u8], new_addr: Ipv4Addr) {
    let old = [
        header[IPV4_SADDR_OFF],
        header[IPV4_SADDR_OFF + 1],
        header[IPV4_SADDR_OFF + 2],
        header[IPV4_SADDR_OFF + 3],
    ];
    let check = u16::from_be_bytes([header[IPV4_CHECK_OFF], header[IPV4_CHECK_OFF + 1]]);
    let Some(check) = saddr_v4_checksum(old, check, new_addr) else {
        return;
    };

    header[IPV4_CHECK_OFF..IPV4_CHECK_OFF + 2].copy_from_slice(&check.to_be_bytes());
    header[IPV4_SADDR_OFF..IPV4_SADDR_OFF + 4].copy_from_slice(&new_addr.octets());
}

/// Replace the IPv6 source. IPv6 has no header checksum, and transport
/// checksums are left as they are.
fn replace_saddr_v6(header: &mut [u8], new_addr: Ipv6Addr) {
    header[IPV6_SADDR_OFF..IPV6_SADDR_OFF + 16].copy_from_slice(&new_addr.octets());
}

/// Set the IPv4 source of `packet` to `new_addr`.
pub fn rewrite_v4<P>(packet: &mut P, new_addr: Ipv4Addr) -> Verdict
where
    P: PacketBuffer + ?Sized,
{
    let Some(header) = writable(packet, IPV4_HLEN) else {
        return Verdict::Drop;
    };
    replace_saddr_v4(header, new_addr);
    Verdict::Continue
}

/// Set the IPv6 source of `packet` to `new_addr`.
pub fn rewrite_v6<P>(packet: &mut P, new_addr: Ipv6Addr) -> Verdict
where
    P: PacketBuffer + ?Sized,
{
    let Some(header) = writable(packet, IPV6_HLEN) else {
        return Verdict::Drop;
    };
    replace_saddr_v6(header, new_addr);
    Verdict::Continue
}

/// IPv4 target: make the packet writable, resolve, rewrite.
pub fn icmpd_v4<P, T>(packet: &mut P, config: &RuleConfig<Ipv4Addr>, table: &T) -> Verdict
where
    P: PacketBuffer + ?Sized,
    T: InterfaceAddressTable + ?Sized,
{
    let Some(header) = writable(packet, IPV4_HLEN) else {
        return Verdict::Drop;
    };
    replace_saddr_v4(header, resolve_v4(config, table));
    Verdict::Continue
}

/// IPv6 target: make the packet writable, resolve, rewrite.
pub fn icmpd_v6<P, T>(packet: &mut P, config: &RuleConfig<Ipv6Addr>, table: &T) -> Verdict
where
    P: PacketBuffer + ?Sized,
    T: InterfaceAddressTable + ?Sized,
{
    let Some(header) = writable(packet, IPV6_HLEN) else {
        return Verdict::Drop;
    };
    replace_saddr_v6(header, resolve_v6(config, table));
    Verdict::Continue
}
