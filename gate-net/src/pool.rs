//! IP address pool for peer address allocation
//!
//! The pool leases single host addresses out of the overlay subnet. The
//! provider leases the two reserved addresses at startup and re-leases
//! every persisted peer address when it reloads its peer table, so a
//! freshly constructed pool always converges to the on-disk state.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::subnet::OverlaySubnet;

/// Allocator for host addresses within the overlay subnet
#[derive(Debug, Clone)]
pub struct IpPool {
    subnet: OverlaySubnet,
    leased: HashSet<Ipv4Addr>,
}

impl IpPool {
    /// Create an empty pool over a subnet
    pub fn new(subnet: OverlaySubnet) -> Self {
        Self {
            subnet,
            leased: HashSet::new(),
        }
    }

    /// The subnet this pool allocates from
    pub fn subnet(&self) -> OverlaySubnet {
        self.subnet
    }

    /// Number of currently leased addresses
    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }

    /// Whether an address is currently leased
    pub fn is_leased(&self, ip: Ipv4Addr) -> bool {
        self.leased.contains(&ip)
    }

    /// Lease a specific address
    ///
    /// Fails if the address lies outside the subnet or is already leased.
    pub fn lease(&mut self, ip: Ipv4Addr) -> Result<()> {
        if !self.subnet.contains(ip) {
            return Err(Error::OutOfRange(ip));
        }
        if !self.leased.insert(ip) {
            return Err(Error::AlreadyLeased(ip));
        }
        Ok(())
    }

    /// Lease a specific address, tolerating an existing lease
    ///
    /// Used when re-leasing persisted peer addresses at startup, where the
    /// same address may legitimately appear twice across restarts.
    pub fn ensure_leased(&mut self, ip: Ipv4Addr) -> Result<()> {
        if !self.subnet.contains(ip) {
            return Err(Error::OutOfRange(ip));
        }
        self.leased.insert(ip);
        Ok(())
    }

    /// Allocate the lowest free host address
    ///
    /// Never returns the network, gateway or broadcast address, regardless
    /// of what has been leased.
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        let first = u32::from(self.subnet.first_allocatable());
        let broadcast = u32::from(self.subnet.broadcast());

        for raw in first..broadcast {
            let ip = Ipv4Addr::from(raw);
            if !self.leased.contains(&ip) {
                self.leased.insert(ip);
                return Ok(ip);
            }
        }
        Err(Error::ExhaustedPool)
    }

    /// Release an address back to the pool
    ///
    /// Returns whether the address was leased.
    pub fn release(&mut self, ip: Ipv4Addr) -> bool {
        self.leased.remove(&ip)
    }
}
