//! Registration and rule installation tests.
//!
//! Installs rules through [`XtRegistry`] from raw configuration records and
//! runs them on packets, covering the load-time checks end to end.

use icmpd::options::{TargetOptions, print, save};
use icmpd::registry::{
    ICMPD_TARGETS, MANGLE_TABLE, RegistryError, TARGET_NAME, TargetRegistry, XtRegistry, exit,
    init,
};
use icmpd::skb::SkBuff;
use icmpd::test_util::{ETH0_V4, create_icmp_echo_request, parse_ipv4, test_snapshot};
use icmpd_common::{ConfigValidationError, Family, IcmpdInfo, Verdict};
use std::net::Ipv4Addr;

const SRC_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const DST_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 50);

fn registry() -> XtRegistry {
    let mut registry = XtRegistry::new();
    init(&mut registry).unwrap();
    registry
}

#[test]
fn test_init_registers_both_families() {
    let registry = registry();
    assert!(registry.is_registered(TARGET_NAME, Family::Ipv4));
    assert!(registry.is_registered(TARGET_NAME, Family::Ipv6));
    assert_eq!(registry.len(), ICMPD_TARGETS.len());
}

#[test]
fn test_double_init_fails_and_keeps_state() {
    let mut registry = registry();
    assert!(matches!(
        init(&mut registry),
        Err(RegistryError::AlreadyRegistered { .. })
    ));
    assert_eq!(registry.len(), 2);

    exit(&mut registry);
    assert!(registry.is_empty());
}

#[test]
fn test_unknown_mode_is_not_installed() {
    let registry = registry();
    let data = IcmpdInfo::new(5, [0; 16]).to_bytes();

    for family in [Family::Ipv4, Family::Ipv6] {
        assert!(matches!(
            registry.install(family, TARGET_NAME, MANGLE_TABLE, &data),
            Err(RegistryError::Invalid(ConfigValidationError::UnknownMode(5)))
        ));
    }
}

#[test]
fn test_options_to_installed_rule_to_packet() {
    let registry = registry();
    let info = TargetOptions::to("198.51.100.7").to_info(Family::Ipv4).unwrap();
    let rule = registry
        .install(Family::Ipv4, TARGET_NAME, MANGLE_TABLE, &info.to_bytes())
        .unwrap();

    let mut skb = SkBuff::new(create_icmp_echo_request(SRC_IP, DST_IP, 1, 1));
    assert_eq!(rule.process(&mut skb, &test_snapshot()), Verdict::Continue);

    let after = parse_ipv4(skb.as_bytes()).unwrap();
    assert_eq!(after.src_ip, Ipv4Addr::new(198, 51, 100, 7));
    assert!(after.checksum_ok);

    assert_eq!(print(&info, Family::Ipv4), " to: 198.51.100.7");
    assert_eq!(save(&info, Family::Ipv4), " --to 198.51.100.7");
}

#[test]
fn test_by_interface_rule_follows_table() {
    let registry = registry();
    let info = TargetOptions::ifaddr("eth0").to_info(Family::Ipv4).unwrap();
    let rule = registry
        .install(Family::Ipv4, TARGET_NAME, MANGLE_TABLE, &info.to_bytes())
        .unwrap();

    let mut skb = SkBuff::new(create_icmp_echo_request(SRC_IP, DST_IP, 1, 2));
    assert_eq!(rule.process(&mut skb, &test_snapshot()), Verdict::Continue);
    assert_eq!(parse_ipv4(skb.as_bytes()).unwrap().src_ip, ETH0_V4);
}

#[test]
fn test_rule_outside_mangle_is_rejected() {
    let registry = registry();
    let info = TargetOptions::ifaddr("eth0").to_info(Family::Ipv6).unwrap();
    assert!(matches!(
        registry.install(Family::Ipv6, TARGET_NAME, "filter", &info.to_bytes()),
        Err(RegistryError::WrongTable { .. })
    ));
}

#[test]
fn test_unregistered_family_has_no_target() {
    let mut registry = XtRegistry::new();
    registry.register_targets(&ICMPD_TARGETS[..1]).unwrap();

    let info = TargetOptions::to("2001:db8::1").to_info(Family::Ipv6).unwrap();
    assert!(matches!(
        registry.install(Family::Ipv6, TARGET_NAME, MANGLE_TABLE, &info.to_bytes()),
        Err(RegistryError::NotFound { .. })
    ));
}
