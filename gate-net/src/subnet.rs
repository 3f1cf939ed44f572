//! The overlay subnet and its reserved addresses

use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};

/// A private overlay subnet shared by a provider and its peers
///
/// Two addresses are reserved and never handed to peers: the network
/// address itself and the lowest host address, which belongs to the
/// provider's end of every tunnel (the gateway).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlaySubnet {
    net: Ipv4Net,
}

impl OverlaySubnet {
    /// Create a subnet from an address and prefix length
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        let net = Ipv4Net::new(addr, prefix_len)
            .map_err(|_| Error::InvalidCidr(format!("{}/{}", addr, prefix_len)))?;
        if prefix_len > 30 {
            return Err(Error::InvalidCidr(format!(
                "{} leaves no allocatable host",
                net
            )));
        }
        Ok(Self { net: net.trunc() })
    }

    /// Parse CIDR notation (e.g. "10.0.0.0/24")
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let net = Ipv4Net::from_str(cidr).map_err(|_| Error::InvalidCidr(cidr.to_string()))?;
        Self::new(net.addr(), net.prefix_len())
    }

    /// The network address (reserved)
    pub fn network(&self) -> Ipv4Addr {
        self.net.network()
    }

    /// The provider's own address: the lowest host in the subnet (reserved)
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.net.network()) + 1)
    }

    /// The lowest address that may be handed to a peer
    pub fn first_allocatable(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.net.network()) + 2)
    }

    /// The broadcast address (never allocated)
    pub fn broadcast(&self) -> Ipv4Addr {
        self.net.broadcast()
    }

    /// Prefix length of the subnet
    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// Whether an address falls inside the subnet
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.net.contains(&ip)
    }

    /// Whether an address is one of the two reserved addresses
    pub fn is_reserved(&self, ip: Ipv4Addr) -> bool {
        ip == self.network() || ip == self.gateway()
    }

    /// The underlying network value
    pub fn as_net(&self) -> Ipv4Net {
        self.net
    }
}

impl std::fmt::Display for OverlaySubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.net)
    }
}

impl FromStr for OverlaySubnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_cidr(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_reserved_addresses() {
        let subnet = OverlaySubnet::from_cidr("10.0.0.0/24").unwrap();
        assert_eq!(subnet.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(subnet.gateway(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(subnet.first_allocatable(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(subnet.broadcast(), Ipv4Addr::new(10, 0, 0, 255));
        assert!(subnet.is_reserved(Ipv4Addr::new(10, 0, 0, 0)));
        assert!(subnet.is_reserved(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!subnet.is_reserved(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn test_subnet_normalizes_host_bits() {
        let subnet = OverlaySubnet::from_cidr("10.0.0.5/24").unwrap();
        assert_eq!(subnet.network(), Ipv4Addr::new(10, 0, 0, 0));
    }

    #[test]
    fn test_subnet_contains() {
        let subnet = OverlaySubnet::from_cidr("192.168.10.0/28").unwrap();
        assert!(subnet.contains(Ipv4Addr::new(192, 168, 10, 7)));
        assert!(!subnet.contains(Ipv4Addr::new(192, 168, 11, 1)));
    }

    #[test]
    fn test_subnet_rejects_invalid() {
        assert!(OverlaySubnet::from_cidr("not-a-subnet").is_err());
        assert!(OverlaySubnet::from_cidr("10.0.0.0/33").is_err());
        // A /31 or /32 leaves nothing to allocate
        assert!(OverlaySubnet::from_cidr("10.0.0.0/31").is_err());
        assert!(OverlaySubnet::from_cidr("10.0.0.0/32").is_err());
    }
}
