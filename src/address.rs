use std::fmt::{self, Display};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Deserialize;

/// Which kind of public address a run is resolving and publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[serde(alias = "v4")]
    Ipv4,
    #[serde(alias = "v6")]
    Ipv6,
}

impl AddressFamily {
    /// Number of octets an address of this family occupies.
    pub const fn octets(self) -> usize {
        match self {
            AddressFamily::Ipv4 => 4,
            AddressFamily::Ipv6 => 16,
        }
    }

    /// IP-echo endpoint used when the configuration does not name one.
    pub const fn default_endpoint(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "https://api-ipv4.ip.sb/jsonip",
            AddressFamily::Ipv6 => "https://api-ipv6.ip.sb/jsonip",
        }
    }

    fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

impl Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressFamily::Ipv4 => "IPv4",
            AddressFamily::Ipv6 => "IPv6",
        })
    }
}

/// An address was well-formed, but not of the family that was asked for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected an {expected} address, got {found}")]
pub struct FamilyMismatch {
    pub expected: AddressFamily,
    pub found: String,
}

/// A public address whose family has been checked against the family it was requested as.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are never accepted as IPv6: they are what an IPv4-only echo service
/// hands back through a dual-stack proxy, and publishing one in an `AAAA` record would be wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpAddress {
    family: AddressFamily,
    addr: IpAddr,
}

impl IpAddress {
    pub fn new(family: AddressFamily, addr: IpAddr) -> Result<Self, FamilyMismatch> {
        let mapped = matches!(addr, IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some());
        if AddressFamily::of(&addr) != family || mapped {
            return Err(FamilyMismatch {
                expected: family,
                found: addr.to_string(),
            });
        }

        Ok(Self { family, addr })
    }

    /// Builds an address out of raw network-order octets, which must be exactly as long as the family requires.
    pub fn from_octets(family: AddressFamily, octets: &[u8]) -> Result<Self, FamilyMismatch> {
        let mismatch = || FamilyMismatch {
            expected: family,
            found: format!("a {}-byte address", octets.len()),
        };

        if octets.len() != family.octets() {
            return Err(mismatch());
        }

        let addr = match family {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(octets).map_err(|_| mismatch())?)),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(octets).map_err(|_| mismatch())?)),
        };

        Self::new(family, addr)
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Checks whether a record's textual content denotes this same address.
    ///
    /// Content is compared as a parsed address so that `2001:DB8::1` and `2001:db8:0::1` count as equal; content that
    /// does not parse falls back to exact string comparison.
    pub fn matches_content(&self, content: &str) -> bool {
        match content.trim().parse::<IpAddr>() {
            Ok(other) => other == self.addr,
            Err(_) => content == self.addr.to_string(),
        }
    }
}

impl Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.addr, f)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_family() {
        let v6 = IpAddress::new(AddressFamily::Ipv6, "2001:db8::1".parse().unwrap()).unwrap();
        assert_eq!(v6.family(), AddressFamily::Ipv6);

        let v4 = IpAddress::new(AddressFamily::Ipv4, "203.0.113.7".parse().unwrap()).unwrap();
        assert_eq!(v4.to_string(), "203.0.113.7");
    }

    #[test]
    fn rejects_other_family() {
        let err = IpAddress::new(AddressFamily::Ipv6, "203.0.113.7".parse().unwrap()).unwrap_err();
        assert_eq!(err.expected, AddressFamily::Ipv6);
        assert_eq!(err.found, "203.0.113.7");

        assert!(IpAddress::new(AddressFamily::Ipv4, "2001:db8::1".parse().unwrap()).is_err());
    }

    #[test]
    fn rejects_v4_mapped_as_v6() {
        let mapped = "::ffff:203.0.113.7".parse().unwrap();
        assert!(IpAddress::new(AddressFamily::Ipv6, mapped).is_err());
    }

    #[test]
    fn octet_length_must_match_family() {
        let ok = IpAddress::from_octets(AddressFamily::Ipv4, &[192, 0, 2, 1]).unwrap();
        assert_eq!(ok.to_string(), "192.0.2.1");

        let err = IpAddress::from_octets(AddressFamily::Ipv6, &[192, 0, 2, 1]).unwrap_err();
        assert_eq!(err.found, "a 4-byte address");
        assert!(IpAddress::from_octets(AddressFamily::Ipv4, &[0; 16]).is_err());
    }

    #[test]
    fn content_comparison_is_semantic() {
        let addr = IpAddress::new(AddressFamily::Ipv6, "2001:db8::1".parse().unwrap()).unwrap();
        assert!(addr.matches_content("2001:DB8:0::1"));
        assert!(addr.matches_content(" 2001:db8::1\n"));
        assert!(!addr.matches_content("2001:db8::2"));
        assert!(!addr.matches_content("not an address"));
    }
}
