//! IPv4/IPv6 address and prefix types.
//!
//! Mirrors `beka/ip.py`: a prefix is stored as a fixed-width address plus a
//! bit length, `from_string`/`to_string` dispatch on the presence of `:`,
//! and the on-wire form of a prefix truncates to `ceil(length / 8)` bytes,
//! zero-padding back out to full width on ingress.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BgpError;

/// An IPv4 or IPv6 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpAddress {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl IpAddress {
    pub fn is_v4(&self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    pub fn is_v6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(addr) => write!(f, "{addr}"),
            IpAddress::V6(addr) => write!(f, "{addr}"),
        }
    }
}

impl FromStr for IpAddress {
    type Err = BgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            Ok(IpAddress::V6(s.parse().map_err(|_| {
                BgpError::protocol(format!("invalid IPv6 address: {s}"))
            })?))
        } else {
            Ok(IpAddress::V4(s.parse().map_err(|_| {
                BgpError::protocol(format!("invalid IPv4 address: {s}"))
            })?))
        }
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(addr)
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(addr)
    }
}

/// An IPv4 prefix: a full 4-byte address plus a bit length in `0..=32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv4Prefix {
    pub addr: Ipv4Addr,
    pub length: u8,
}

/// An IPv6 prefix: a full 16-byte address plus a bit length in `0..=128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv6Prefix {
    pub addr: Ipv6Addr,
    pub length: u8,
}

impl Ipv4Prefix {
    pub fn new(addr: Ipv4Addr, length: u8) -> Self {
        Self { addr, length }
    }

    /// Bytes needed to carry this prefix on the wire: `ceil(length / 8)`.
    pub fn wire_len(&self) -> usize {
        prefix_byte_length(self.length)
    }

    /// Truncate the address to its on-wire form (no trailing zero bytes).
    pub fn wire_bytes(&self) -> Vec<u8> {
        self.addr.octets()[..self.wire_len()].to_vec()
    }

    /// Rebuild a prefix from `ceil(length/8)` on-wire bytes, zero-padded to
    /// the full 4-byte width.
    pub fn from_wire_bytes(bytes: &[u8], length: u8) -> Result<Self, BgpError> {
        if bytes.len() > 4 {
            return Err(BgpError::protocol("IPv4 prefix body too long"));
        }
        let mut octets = [0u8; 4];
        octets[..bytes.len()].copy_from_slice(bytes);
        Ok(Self::new(Ipv4Addr::from(octets), length))
    }
}

impl Ipv6Prefix {
    pub fn new(addr: Ipv6Addr, length: u8) -> Self {
        Self { addr, length }
    }

    pub fn wire_len(&self) -> usize {
        prefix_byte_length(self.length)
    }

    pub fn wire_bytes(&self) -> Vec<u8> {
        self.addr.octets()[..self.wire_len()].to_vec()
    }

    pub fn from_wire_bytes(bytes: &[u8], length: u8) -> Result<Self, BgpError> {
        if bytes.len() > 16 {
            return Err(BgpError::protocol("IPv6 prefix body too long"));
        }
        let mut octets = [0u8; 16];
        octets[..bytes.len()].copy_from_slice(bytes);
        Ok(Self::new(Ipv6Addr::from(octets), length))
    }
}

/// `ceil(bit_length / 8)`, the on-wire byte width of a prefix.
pub fn prefix_byte_length(bit_length: u8) -> usize {
    let mut len = (bit_length / 8) as usize;
    if bit_length % 8 != 0 {
        len += 1;
    }
    len
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.length)
    }
}

impl fmt::Display for Ipv6Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.length)
    }
}

impl FromStr for Ipv4Prefix {
    type Err = BgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, length) = split_prefix(s)?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| BgpError::protocol(format!("invalid IPv4 prefix: {s}")))?;
        Ok(Self::new(addr, length))
    }
}

impl FromStr for Ipv6Prefix {
    type Err = BgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, length) = split_prefix(s)?;
        let addr: Ipv6Addr = addr
            .parse()
            .map_err(|_| BgpError::protocol(format!("invalid IPv6 prefix: {s}")))?;
        Ok(Self::new(addr, length))
    }
}

fn split_prefix(s: &str) -> Result<(&str, u8), BgpError> {
    let (addr, length) = s
        .split_once('/')
        .ok_or_else(|| BgpError::protocol(format!("prefix missing '/length': {s}")))?;
    let length: u8 = length
        .parse()
        .map_err(|_| BgpError::protocol(format!("invalid prefix length: {s}")))?;
    Ok((addr, length))
}

/// A prefix of either address family, used at the generic API surface
/// (`Server::add_route`, `RouteAddition.prefix`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpPrefix {
    V4(Ipv4Prefix),
    V6(Ipv6Prefix),
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpPrefix::V4(p) => write!(f, "{p}"),
            IpPrefix::V6(p) => write!(f, "{p}"),
        }
    }
}

impl FromStr for IpPrefix {
    type Err = BgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            Ok(IpPrefix::V6(s.parse()?))
        } else {
            Ok(IpPrefix::V4(s.parse()?))
        }
    }
}

impl From<Ipv4Prefix> for IpPrefix {
    fn from(p: Ipv4Prefix) -> Self {
        IpPrefix::V4(p)
    }
}

impl From<Ipv6Prefix> for IpPrefix {
    fn from(p: Ipv6Prefix) -> Self {
        IpPrefix::V6(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_dispatches_on_colon() {
        assert_eq!(
            "192.168.0.15".parse::<IpAddress>().unwrap(),
            IpAddress::V4(Ipv4Addr::new(192, 168, 0, 15))
        );
        assert_eq!(
            "2001:db8:1::242:ac11:2".parse::<IpAddress>().unwrap(),
            IpAddress::V6("2001:db8:1::242:ac11:2".parse().unwrap())
        );
    }

    #[test]
    fn v6_display_is_canonical_shortest_form() {
        let addr: Ipv6Addr = "2001:0db8:0000:0000:0000:0000:0000:0001".parse().unwrap();
        assert_eq!(IpAddress::V6(addr).to_string(), "2001:db8::1");
    }

    #[test]
    fn prefix_round_trips_through_string() {
        let p: Ipv4Prefix = "10.0.0.0/8".parse().unwrap();
        assert_eq!(p.to_string(), "10.0.0.0/8");

        let p6: Ipv6Prefix = "2001:db4::/127".parse().unwrap();
        assert_eq!(p6.to_string(), "2001:db4::/127");
    }

    #[test]
    fn wire_form_truncates_and_zero_pads() {
        let p: Ipv4Prefix = "192.168.64.0/23".parse().unwrap();
        assert_eq!(p.wire_len(), 3);
        assert_eq!(p.wire_bytes(), vec![192, 168, 64]);

        let rebuilt = Ipv4Prefix::from_wire_bytes(&[192, 168, 64], 23).unwrap();
        assert_eq!(rebuilt, p);
    }

    #[test]
    fn prefix_equality_is_bytes_and_length() {
        let a: Ipv4Prefix = "10.0.0.0/8".parse().unwrap();
        let b: Ipv4Prefix = "10.0.0.0/9".parse().unwrap();
        assert_ne!(a, b);
    }
}
