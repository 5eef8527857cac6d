//! Interface address table built from the host's network stack.
//!
//! IPv4 addresses and their labels come from an rtnetlink dump. The IPv6
//! side is read from procfs: a device has inet6 state when it has a
//! `/proc/sys/net/ipv6/conf/<dev>` directory, and its anycast list comes from
//! `/proc/net/anycast6`.

use futures::TryStreamExt;
use icmpd_common::{
    AnycastAddr, AnycastListV6, DevId, IfAddrListV4, IfName, Inet6Dev, InterfaceAddressTable,
    UnicastAddr,
};
use netlink_packet_route::AddressFamily;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use rtnetlink::Handle;
use std::collections::HashMap;
use std::io;
use std::iter::Copied;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::slice::Iter;
use thiserror::Error;
use tracing::debug;

pub const ANYCAST6_PATH: &str = "/proc/net/anycast6";
pub const IPV6_CONF_DIR: &str = "/proc/sys/net/ipv6/conf";

/// Interface table errors.
#[derive(Debug, Error)]
pub enum IfaceError {
    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("Failed to read {}: {source}", path.display())]
    Procfs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, IfaceError>;

#[derive(Debug, Clone, Default)]
struct DeviceEntry {
    index: u32,
    inet: Option<Vec<UnicastAddr>>,
    inet6: Option<Vec<AnycastAddr>>,
}

/// Point-in-time copy of the interface address table.
///
/// Devices are created on first mention; a device only has IPv4 or IPv6
/// state once `add_inet_dev`/`add_unicast` or `add_inet6_dev`/`add_anycast`
/// was called for it.
#[derive(Debug, Clone, Default)]
pub struct InterfaceSnapshot {
    devices: HashMap<IfName, DeviceEntry>,
}

impl InterfaceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    fn device(&mut self, name: IfName) -> &mut DeviceEntry {
        self.devices.entry(name).or_default()
    }

    /// Record a device and its ifindex without any address state.
    pub fn add_device(&mut self, name: IfName, index: u32) -> &mut Self {
        self.device(name).index = index;
        self
    }

    /// Give the device IPv4 state (possibly with no addresses).
    pub fn add_inet_dev(&mut self, name: IfName) -> &mut Self {
        self.device(name).inet.get_or_insert_with(Vec::new);
        self
    }

    /// Append an IPv4 address; order of calls is the lookup order.
    pub fn add_unicast(&mut self, name: IfName, label: IfName, address: Ipv4Addr) -> &mut Self {
        self.device(name)
            .inet
            .get_or_insert_with(Vec::new)
            .push(UnicastAddr { label, address });
        self
    }

    /// Give the device IPv6 state (possibly with an empty anycast list).
    pub fn add_inet6_dev(&mut self, name: IfName) -> &mut Self {
        self.device(name).inet6.get_or_insert_with(Vec::new);
        self
    }

    pub fn add_anycast(&mut self, name: IfName, owner: DevId, address: Ipv6Addr) -> &mut Self {
        self.device(name)
            .inet6
            .get_or_insert_with(Vec::new)
            .push(AnycastAddr { owner, address });
        self
    }

    pub fn device_index(&self, name: &IfName) -> Option<u32> {
        self.devices.get(name).map(|dev| dev.index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// The eBPF map records describing `name`. `None` where the device lacks
    /// that family's state (or does not exist).
    pub fn map_lists(&self, name: &IfName) -> (Option<IfAddrListV4>, Option<AnycastListV6>) {
        let Some(dev) = self.devices.get(name) else {
            return (None, None);
        };

        let v4 = dev.inet.as_ref().map(|addrs| {
            let mut list = IfAddrListV4::new();
            for addr in addrs {
                if !list.push((*addr).into()) {
                    debug!(if_name = %name, dropped = %addr.address, "IPv4 address list full");
                }
            }
            list
        });

        let v6 = dev.inet6.as_ref().map(|anycast| {
            let mut list = AnycastListV6::new(dev.index);
            for aca in anycast {
                if !list.push((*aca).into()) {
                    debug!(if_name = %name, dropped = %aca.address, "Anycast list full");
                }
            }
            list
        });

        (v4, v6)
    }
}

impl InterfaceAddressTable for InterfaceSnapshot {
    type Unicast<'a> = Copied<Iter<'a, UnicastAddr>>;
    type Anycast<'a> = Copied<Iter<'a, AnycastAddr>>;

    fn inet_dev(&self, name: &IfName) -> Option<Self::Unicast<'_>> {
        Some(self.devices.get(name)?.inet.as_ref()?.iter().copied())
    }

    fn inet6_dev(&self, name: &IfName) -> Option<Inet6Dev<Self::Anycast<'_>>> {
        let dev = self.devices.get(name)?;
        Some(Inet6Dev {
            id: DevId(dev.index),
            anycast: dev.inet6.as_ref()?.iter().copied(),
        })
    }
}

/// One line of `/proc/net/anycast6`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anycast6Entry {
    pub index: u32,
    pub name: String,
    pub address: Ipv6Addr,
}

/// Parse `/proc/net/anycast6` contents:
/// `<ifindex> <name> <32 hex digits> <refcount>` per line.
/// Lines that do not match are skipped.
pub fn parse_anycast6(text: &str) -> Vec<Anycast6Entry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let index = fields.next()?.parse().ok()?;
            let name = fields.next()?.to_string();
            let hex = fields.next()?;
            if hex.len() != 32 {
                return None;
            }
            let address = Ipv6Addr::from(u128::from_str_radix(hex, 16).ok()?);
            Some(Anycast6Entry {
                index,
                name,
                address,
            })
        })
        .collect()
}

/// Read and parse an anycast6 file. A missing file means no IPv6 support and
/// yields an empty list.
pub fn read_anycast6(path: &Path) -> Result<Vec<Anycast6Entry>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_anycast6(&text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No anycast6 table, IPv6 disabled?");
            Ok(Vec::new())
        }
        Err(source) => Err(IfaceError::Procfs {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn link_name(msg: &LinkMessage) -> Option<IfName> {
    msg.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => IfName::new(name),
        _ => None,
    })
}

/// Label and address of an IPv4 address message. The kernel always sends a
/// label for IPv4; fall back to the device name if it does not.
fn inet_entry(msg: &AddressMessage, dev_name: IfName) -> Option<(IfName, Ipv4Addr)> {
    let mut label = dev_name;
    let mut address = None;
    for attr in &msg.attributes {
        match attr {
            AddressAttribute::Label(l) => label = IfName::new(l)?,
            AddressAttribute::Local(IpAddr::V4(a)) => address = Some(*a),
            AddressAttribute::Address(IpAddr::V4(a)) if address.is_none() => address = Some(*a),
            _ => {}
        }
    }
    Some((label, address?))
}

/// Snapshot source backed by rtnetlink and procfs.
#[derive(Debug, Clone)]
pub struct SystemInterfaces {
    anycast6_path: PathBuf,
    ipv6_conf_dir: PathBuf,
}

impl Default for SystemInterfaces {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemInterfaces {
    pub fn new() -> Self {
        Self::with_procfs(ANYCAST6_PATH, IPV6_CONF_DIR)
    }

    /// Use alternative procfs locations (containers with a private /proc).
    pub fn with_procfs(anycast6_path: impl Into<PathBuf>, ipv6_conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            anycast6_path: anycast6_path.into(),
            ipv6_conf_dir: ipv6_conf_dir.into(),
        }
    }

    /// Take a fresh snapshot of every device.
    pub async fn snapshot(&self) -> Result<InterfaceSnapshot> {
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(|e| IfaceError::Netlink(e.to_string()))?;
        let conn_task = tokio::spawn(connection);

        let result = self.collect(&handle).await;
        conn_task.abort();
        result
    }

    async fn collect(&self, handle: &Handle) -> Result<InterfaceSnapshot> {
        let mut snapshot = InterfaceSnapshot::new();
        let mut names: HashMap<u32, IfName> = HashMap::new();

        let mut links = handle.link().get().execute();
        while let Some(msg) = links
            .try_next()
            .await
            .map_err(|e| IfaceError::Netlink(e.to_string()))?
        {
            if let Some(name) = link_name(&msg) {
                names.insert(msg.header.index, name);
                snapshot.add_device(name, msg.header.index);
            }
        }

        let mut addrs = handle.address().get().execute();
        while let Some(msg) = addrs
            .try_next()
            .await
            .map_err(|e| IfaceError::Netlink(e.to_string()))?
        {
            if msg.header.family != AddressFamily::Inet {
                continue;
            }
            let Some(&dev_name) = names.get(&msg.header.index) else {
                continue;
            };
            if let Some((label, address)) = inet_entry(&msg, dev_name) {
                snapshot.add_unicast(dev_name, label, address);
            }
        }

        for name in names.values() {
            if let Some(dir) = name.as_str()
                && self.ipv6_conf_dir.join(dir).is_dir()
            {
                snapshot.add_inet6_dev(*name);
            }
        }

        for entry in read_anycast6(&self.anycast6_path)? {
            if let Some(&name) = names.get(&entry.index) {
                snapshot.add_anycast(name, DevId(entry.index), entry.address);
            }
        }

        debug!(devices = snapshot.len(), "Interface snapshot taken");
        Ok(snapshot)
    }
}
