//! IPv4 CIDR blocks
//!
//! Only IPv4 is modelled: the provider's VPC primary range is IPv4 and the
//! subnet carving below works on plain `u32` arithmetic.

use crate::error::{Result, StackError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An aligned IPv4 network such as `10.0.0.0/16`
///
/// Invariants:
/// - prefix length is 0-32
/// - host bits of the address are zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self> {
        let cidr = format!("{}/{}", network, prefix);
        if prefix > 32 {
            return Err(StackError::InvalidCidr {
                cidr,
                reason: "prefix length must be 0-32".to_string(),
            });
        }
        if u32::from(network) & !Self::mask_bits(prefix) != 0 {
            return Err(StackError::InvalidCidr {
                cidr,
                reason: "host bits must be zero".to_string(),
            });
        }
        Ok(Self { network, prefix })
    }

    /// Literal block; the address must already be aligned to `prefix`
    pub(crate) const fn from_octets(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> Self {
        Self {
            network: Ipv4Addr::new(a, b, c, d),
            prefix,
        }
    }

    /// The `0.0.0.0/0` block
    pub fn any() -> Self {
        Self {
            network: Ipv4Addr::UNSPECIFIED,
            prefix: 0,
        }
    }

    fn mask_bits(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// First address as an integer
    pub fn first(&self) -> u64 {
        u64::from(u32::from(self.network))
    }

    /// One past the last address, as an integer
    pub fn end(&self) -> u64 {
        self.first() + self.size()
    }

    /// Whether `other` lies entirely inside this block
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.first() >= self.first() && other.end() <= self.end()
    }

    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.first() < other.end() && other.first() < self.end()
    }

    /// Build the block of the given prefix starting at integer address `start`
    pub(crate) fn from_start(start: u64, prefix: u8) -> Result<Self> {
        let start = u32::try_from(start).map_err(|_| StackError::InvalidCidr {
            cidr: format!("{}/{}", start, prefix),
            reason: "address out of IPv4 range".to_string(),
        })?;
        Self::new(Ipv4Addr::from(start), prefix)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s.split_once('/').ok_or_else(|| StackError::InvalidCidr {
            cidr: s.to_string(),
            reason: "expected <address>/<prefix>".to_string(),
        })?;
        let network = Ipv4Addr::from_str(addr).map_err(|_| StackError::InvalidCidr {
            cidr: s.to_string(),
            reason: format!("invalid IPv4 address {}", addr),
        })?;
        let prefix = prefix.parse::<u8>().map_err(|_| StackError::InvalidCidr {
            cidr: s.to_string(),
            reason: format!("invalid prefix length {}", prefix),
        })?;
        Self::new(network, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = StackError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(value: Ipv4Cidr) -> Self {
        value.to_string()
    }
}
