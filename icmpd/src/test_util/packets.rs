//! Packet builders and parsers for rewrite tests.
//!
//! Packets start at the network header, the way the target sees them. smoltcp
//! builds the headers and checks the checksums, so the tests do not depend on
//! the checksum code under test.

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    Icmpv4Packet, Icmpv4Repr, IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr, Ipv6Address,
    Ipv6Packet, Ipv6Repr,
};
use std::net::{Ipv4Addr, Ipv6Addr};

/// IPv4 header size (without options)
pub const IP_HDR_SIZE: usize = 20;

/// IPv6 header size
pub const IPV6_HDR_SIZE: usize = 40;

/// Echo payload used by the builders
pub const PING_DATA: &[u8] = b"ping from test!";

/// Create an ICMP echo request, starting at the IPv4 header
pub fn create_icmp_echo_request(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, id: u16, seq: u16) -> Vec<u8> {
    let icmp_repr = Icmpv4Repr::EchoRequest {
        ident: id,
        seq_no: seq,
        data: PING_DATA,
    };

    let icmp_len = icmp_repr.buffer_len();
    let mut packet = vec![0u8; IP_HDR_SIZE + icmp_len];

    let ip_repr = Ipv4Repr {
        src_addr: Ipv4Address::from_bytes(&src_ip.octets()),
        dst_addr: Ipv4Address::from_bytes(&dst_ip.octets()),
        next_header: IpProtocol::Icmp,
        payload_len: icmp_len,
        hop_limit: 64,
    };
    let mut ip_packet = Ipv4Packet::new_unchecked(&mut packet[..]);
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());

    let mut icmp_packet = Icmpv4Packet::new_unchecked(ip_packet.payload_mut());
    icmp_repr.emit(&mut icmp_packet, &ChecksumCapabilities::default());

    packet
}

/// Create an ICMPv6 echo request, starting at the IPv6 header. The ICMPv6
/// checksum is left zero; the target never looks at it.
pub fn create_icmpv6_echo_request(src_ip: Ipv6Addr, dst_ip: Ipv6Addr, id: u16, seq: u16) -> Vec<u8> {
    // Echo Request: type(1) + code(1) + checksum(2) + id(2) + seq(2) + data
    let icmpv6_len = 8 + PING_DATA.len();
    let mut packet = vec![0u8; IPV6_HDR_SIZE + icmpv6_len];

    let ipv6_repr = Ipv6Repr {
        src_addr: Ipv6Address::from_bytes(&src_ip.octets()),
        dst_addr: Ipv6Address::from_bytes(&dst_ip.octets()),
        next_header: IpProtocol::Icmpv6,
        payload_len: icmpv6_len,
        hop_limit: 64,
    };
    let mut ipv6_packet = Ipv6Packet::new_unchecked(&mut packet[..]);
    ipv6_repr.emit(&mut ipv6_packet);

    let icmpv6_data = &mut packet[IPV6_HDR_SIZE..];
    // Type: Echo Request (128)
    icmpv6_data[0] = 128;
    icmpv6_data[4..6].copy_from_slice(&id.to_be_bytes());
    icmpv6_data[6..8].copy_from_slice(&seq.to_be_bytes());
    icmpv6_data[8..].copy_from_slice(PING_DATA);

    packet
}

/// Parsed IPv4 header fields the tests look at
#[derive(Debug)]
pub struct Ipv4Summary {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub checksum: u16,
    /// Header checksum verified by smoltcp
    pub checksum_ok: bool,
}

/// Parse an IPv4 packet
pub fn parse_ipv4(packet: &[u8]) -> Option<Ipv4Summary> {
    let ip_packet = Ipv4Packet::new_checked(packet).ok()?;
    Some(Ipv4Summary {
        src_ip: Ipv4Addr::from(ip_packet.src_addr().0),
        dst_ip: Ipv4Addr::from(ip_packet.dst_addr().0),
        checksum: ip_packet.checksum(),
        checksum_ok: ip_packet.verify_checksum(),
    })
}

/// Source address of an IPv6 packet
pub fn parse_ipv6_src(packet: &[u8]) -> Option<Ipv6Addr> {
    let ipv6_packet = Ipv6Packet::new_checked(packet).ok()?;
    Some(Ipv6Addr::from(ipv6_packet.src_addr().0))
}
