//! TC egress classifiers for the ICMPD target
//!
//! `icmpd_v4` and `icmpd_v6` are attached to the egress path of the configured
//! interfaces. Each one:
//! - leaves frames of the other family alone
//! - pulls the whole packet into the linear area (the writable request)
//! - resolves the replacement source from the rule in ICMPD_INFO
//! - rewrites the source address, patching the IPv4 header checksum
//!
//! Interface addresses come from IFADDRS_V4 / ANYCAST_V6, kept current by the
//! icmpd daemon.

#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::{TC_ACT_SHOT, TC_ACT_UNSPEC},
    cty::c_long,
    macros::{classifier, map},
    maps::{Array, HashMap},
    programs::TcContext,
};
use core::iter::{Map, Take};
use core::slice::Iter;

use icmpd_common::{
    AnycastAddr, AnycastListV6, AnycastV6, DevId, ETH_HLEN, ETH_P_IP, ETH_P_IPV6, IFNAMSIZ,
    INFO_IDX_V4, INFO_IDX_V6, IPV4_CHECK_OFF, IPV4_HLEN, IPV4_SADDR_OFF, IPV6_HLEN,
    IPV6_SADDR_OFF, IcmpdInfo, IfAddrListV4, IfAddrV4, IfName, Inet6Dev, InterfaceAddressTable,
    MAX_IFADDRS, RuleConfigV4, RuleConfigV6, UnicastAddr, Verdict, resolve_v4, resolve_v6,
    saddr_v4_checksum,
};

/// Rule per family, indexed by INFO_IDX_V4 / INFO_IDX_V6
#[map]
static ICMPD_INFO: Array<IcmpdInfo> = Array::with_max_entries(2, 0);

/// IPv4 addresses per device name
#[map]
static IFADDRS_V4: HashMap<[u8; IFNAMSIZ], IfAddrListV4> = HashMap::with_max_entries(256, 0);

/// Anycast list per device name; an entry means the device has IPv6 state
#[map]
static ANYCAST_V6: HashMap<[u8; IFNAMSIZ], AnycastListV6> = HashMap::with_max_entries(256, 0);

fn unicast(entry: &IfAddrV4) -> UnicastAddr {
    entry.into()
}

fn anycast(entry: &AnycastV6) -> AnycastAddr {
    entry.into()
}

fn clamp(count: u32) -> usize {
    (count as usize).min(MAX_IFADDRS)
}

/// Interface table backed by the BPF maps.
struct MapTable;

impl InterfaceAddressTable for MapTable {
    type Unicast<'a> = Map<Take<Iter<'a, IfAddrV4>>, fn(&IfAddrV4) -> UnicastAddr>;
    type Anycast<'a> = Map<Take<Iter<'a, AnycastV6>>, fn(&AnycastV6) -> AnycastAddr>;

    fn inet_dev(&self, name: &IfName) -> Option<Self::Unicast<'_>> {
        let list = unsafe { IFADDRS_V4.get(&name.to_raw()) }?;
        Some(
            list.entries
                .iter()
                .take(clamp(list.count))
                .map(unicast as fn(&IfAddrV4) -> UnicastAddr),
        )
    }

    fn inet6_dev(&self, name: &IfName) -> Option<Inet6Dev<Self::Anycast<'_>>> {
        let list = unsafe { ANYCAST_V6.get(&name.to_raw()) }?;
        Some(Inet6Dev {
            id: DevId(list.dev),
            anycast: list
                .entries
                .iter()
                .take(clamp(list.count))
                .map(anycast as fn(&AnycastV6) -> AnycastAddr),
        })
    }
}

#[inline(always)]
fn tc_action(verdict: Verdict) -> i32 {
    match verdict {
        Verdict::Continue => TC_ACT_UNSPEC,
        Verdict::Drop => TC_ACT_SHOT,
    }
}

#[inline(always)]
fn eth_type(ctx: &TcContext) -> Result<u16, c_long> {
    // EtherType (bytes 12-13)
    let raw: [u8; 2] = ctx.load(12)?;
    Ok(u16::from_be_bytes(raw))
}

/// Make the whole packet writable. Packets too short for the network header
/// count as not writable.
#[inline(always)]
fn make_writable(ctx: &mut TcContext, header_len: usize) -> bool {
    let len = ctx.len();
    if (len as usize) < ETH_HLEN + header_len {
        return false;
    }
    ctx.pull_data(len).is_ok()
}

#[classifier]
pub fn icmpd_v4(mut ctx: TcContext) -> i32 {
    match try_icmpd_v4(&mut ctx) {
        Ok(verdict) => tc_action(verdict),
        Err(_) => TC_ACT_UNSPEC, // Not an IPv4 frame we can read, leave it alone
    }
}

#[inline(always)]
fn try_icmpd_v4(ctx: &mut TcContext) -> Result<Verdict, c_long> {
    if eth_type(ctx)? != ETH_P_IP {
        return Ok(Verdict::Continue);
    }
    if !make_writable(ctx, IPV4_HLEN) {
        return Ok(Verdict::Drop);
    }

    let Some(info) = ICMPD_INFO.get(INFO_IDX_V4) else {
        return Ok(Verdict::Continue);
    };
    let Ok(config) = RuleConfigV4::from_info(info) else {
        return Ok(Verdict::Continue);
    };
    let new = resolve_v4(&config, &MapTable);

    let saddr_off = ETH_HLEN + IPV4_SADDR_OFF;
    let check_off = ETH_HLEN + IPV4_CHECK_OFF;
    let old: [u8; 4] = ctx.load(saddr_off)?;
    let check: [u8; 2] = ctx.load(check_off)?;
    let Some(check) = saddr_v4_checksum(old, u16::from_be_bytes(check), new) else {
        return Ok(Verdict::Continue);
    };

    ctx.store(check_off, &check.to_be_bytes(), 0)?;
    ctx.store(saddr_off, &new.octets(), 0)?;

    Ok(Verdict::Continue)
}

#[classifier]
pub fn icmpd_v6(mut ctx: TcContext) -> i32 {
    match try_icmpd_v6(&mut ctx) {
        Ok(verdict) => tc_action(verdict),
        Err(_) => TC_ACT_UNSPEC,
    }
}

#[inline(always)]
fn try_icmpd_v6(ctx: &mut TcContext) -> Result<Verdict, c_long> {
    if eth_type(ctx)? != ETH_P_IPV6 {
        return Ok(Verdict::Continue);
    }
    if !make_writable(ctx, IPV6_HLEN) {
        return Ok(Verdict::Drop);
    }

    let Some(info) = ICMPD_INFO.get(INFO_IDX_V6) else {
        return Ok(Verdict::Continue);
    };
    let Ok(config) = RuleConfigV6::from_info(info) else {
        return Ok(Verdict::Continue);
    };
    let new = resolve_v6(&config, &MapTable).octets();

    // No IPv6 header checksum; transport checksums are not touched
    ctx.store(ETH_HLEN + IPV6_SADDR_OFF, &new, 0)?;

    Ok(Verdict::Continue)
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
