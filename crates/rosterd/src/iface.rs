//! Local interface enumeration: seeds the registry at startup.

use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use anyhow::{Context, Result};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

use roster_services::InterfaceAddrs;

/// First usable IPv4 and IPv6 address of each interface.
///
/// `only` restricts the result to one named interface; it is an error if
/// that interface does not exist. Loopback interfaces are skipped unless
/// named explicitly.
pub fn local_addresses(only: Option<&str>) -> Result<Vec<InterfaceAddrs>> {
    let addrs = getifaddrs().context("getifaddrs()")?;

    let found = addrs.map(|ifa| {
        let ip = ifa.address.as_ref().and_then(|a| {
            if let Some(sin) = a.as_sockaddr_in() {
                Some(IpAddr::V4(*SocketAddrV4::from(*sin).ip()))
            } else {
                a.as_sockaddr_in6()
                    .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip()))
            }
        });
        let loopback = ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK);
        (ifa.interface_name, loopback, ip)
    });

    let seeds = seeds_from(found, only);
    if let Some(name) = only {
        if seeds.is_empty() {
            anyhow::bail!("interface '{}' not found", name);
        }
    }
    Ok(seeds)
}

/// Group raw (name, is_loopback, address) records by interface, keeping the
/// first usable address per family. Interfaces with no usable address are
/// kept with both fields empty; the registry skips them.
fn seeds_from(
    records: impl IntoIterator<Item = (String, bool, Option<IpAddr>)>,
    only: Option<&str>,
) -> Vec<InterfaceAddrs> {
    let mut seeds: Vec<InterfaceAddrs> = Vec::new();

    for (name, loopback, ip) in records {
        match only {
            Some(wanted) if wanted != name => continue,
            None if loopback => continue,
            _ => {}
        }

        let idx = match seeds.iter().position(|s| s.name == name) {
            Some(i) => i,
            None => {
                seeds.push(InterfaceAddrs {
                    name,
                    ipv4: None,
                    ipv6: None,
                });
                seeds.len() - 1
            }
        };
        let seed = &mut seeds[idx];

        match ip {
            Some(IpAddr::V4(v4)) if seed.ipv4.is_none() && !v4.is_unspecified() => {
                seed.ipv4 = Some(v4);
            }
            Some(IpAddr::V6(v6)) if seed.ipv6.is_none() && !v6.is_unspecified() => {
                seed.ipv6 = Some(v6);
            }
            _ => {}
        }
    }

    seeds
}

/// Get the OS interface index for a named network interface.
/// Returns an error if the interface does not exist.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}
