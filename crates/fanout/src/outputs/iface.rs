//! Source address selection for datagram outputs (`iface` parameter)

use std::io;
use std::net::{IpAddr, SocketAddr};

/// Resolve an `iface` value into a local bind address
///
/// Accepts an interface name (first IPv4 address wins, IPv6 as fallback), a
/// bare IP address, or an `ip:port` pair.
pub fn resolve_source(iface: &str) -> io::Result<SocketAddr> {
    if let Ok(addr) = iface.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = iface.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, 0));
    }
    match interface_addr(iface)? {
        Some(ip) => Ok(SocketAddr::new(ip, 0)),
        None => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("interface '{iface}' not found or has no address"),
        )),
    }
}

/// First IPv4 address of interface `name`, IPv6 as fallback
fn interface_addr(name: &str) -> io::Result<Option<IpAddr>> {
    let interfaces = local_ip_address::list_afinet_netifas().map_err(io::Error::other)?;
    let mut v6 = None;
    for (_, ip) in interfaces.into_iter().filter(|(ifname, _)| ifname == name) {
        match ip {
            IpAddr::V4(_) => return Ok(Some(ip)),
            IpAddr::V6(_) if v6.is_none() => v6 = Some(ip),
            IpAddr::V6(_) => {}
        }
    }
    Ok(v6)
}
