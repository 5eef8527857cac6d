//! icmpd: the ICMPD source-address rewrite target for Linux hosts.
//!
//! The per-packet work lives in `icmpd-common` and runs either in process
//! (through [`XtRegistry`] and [`SkBuff`]) or in the kernel as TC egress
//! classifiers managed by [`EbpfManager`].
//!
//! # Architecture
//!
//! ```text
//! icmpd --to/--ifaddr --> IcmpdInfo --check_entry--> ICMPD_INFO map
//!                                                        |
//! packet --> TC egress (icmpd_v4 / icmpd_v6) ------------+--> rewritten source
//!                              ^
//!                              |
//! rtnetlink + /proc/net/anycast6 --> IfaddrSync --> IFADDRS_V4 / ANYCAST_V6
//! ```

pub mod daemon;
pub mod ebpf_loader;
pub mod ifaddr_sync;
pub mod iface;
pub mod options;
pub mod registry;
pub mod skb;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// Re-export commonly used types
pub use ebpf_loader::EbpfManager;
pub use ifaddr_sync::IfaddrSync;
pub use iface::{InterfaceSnapshot, SystemInterfaces};
pub use options::TargetOptions;
pub use registry::{ICMPD_TARGETS, InstalledRule, TargetRegistry, TargetSpec, XtRegistry};
pub use skb::SkBuff;
