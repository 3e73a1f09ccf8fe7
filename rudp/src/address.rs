//! Host/port pairs as they appear inside packets
//!
//! Packets carry textual hosts so that relays can forward them without
//! understanding them. Only two literal forms are accepted:
//! - dotted IPv4, four groups of one to three decimal digits, each at most 255
//! - full IPv6, eight groups of one to four hex digits, no `::` compression

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// A peer address: textual host plus port
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub ip: String,
    pub port: u16,
}

impl Address {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Builds an address from a parsed IP, rendering IPv6 in full form
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        Self::new(format_host(ip), port)
    }

    /// Parses the host, returning `None` if it is not an accepted literal
    pub fn ip_addr(&self) -> Option<IpAddr> {
        parse_host(&self.ip)
    }

    /// True when the host is an accepted literal and the port is non-zero
    pub fn is_valid(&self) -> bool {
        self.port != 0 && self.ip_addr().is_some()
    }

    /// Resolves to a socket address usable with a UDP socket
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.ip_addr().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::from_ip(addr.ip(), addr.port())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

/// Parses a host literal following the packet address grammar
pub fn parse_host(host: &str) -> Option<IpAddr> {
    if host.contains(':') {
        parse_ipv6(host).map(IpAddr::V6)
    } else {
        parse_ipv4(host).map(IpAddr::V4)
    }
}

/// Renders an IP so that [`parse_host`] accepts it
pub fn format_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => v6
            .segments()
            .iter()
            .map(|segment| format!("{:x}", segment))
            .collect::<Vec<_>>()
            .join(":"),
    }
}

fn parse_ipv4(host: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut groups = host.split('.');

    for octet in octets.iter_mut() {
        let group = groups.next()?;
        if group.is_empty() || group.len() > 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = u8::try_from(group.parse::<u16>().ok()?).ok()?;
    }

    if groups.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

fn parse_ipv6(host: &str) -> Option<Ipv6Addr> {
    let mut segments = [0u16; 8];
    let mut groups = host.split(':');

    for segment in segments.iter_mut() {
        let group = groups.next()?;
        if group.is_empty() || group.len() > 4 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        *segment = u16::from_str_radix(group, 16).ok()?;
    }

    if groups.next().is_some() {
        return None;
    }
    Some(Ipv6Addr::from(segments))
}
