//! Network origins a user is allowed to connect from.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::ParseError;

/// A single origin entry attached to a user.
///
/// The allow-any marker is its own variant rather than a sentinel inside
/// the prefix set, so it can never collide with a stored address and every
/// match site must handle it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginRule {
    /// Matches every well-formed address, both families.
    AllowAny,
    /// Matches addresses inside the prefix.
    Prefix(IpNet),
}

impl OriginRule {
    /// Parses an origin spec: `"*"`, a CIDR-style prefix, or a bare address.
    ///
    /// A bare address is widened to a host-only prefix (/32 for IPv4, /128
    /// for IPv6) before storage, so `"10.0.0.5"` and `"10.0.0.5/32"` name
    /// the same entry.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] when the address or prefix syntax is
    /// invalid.
    pub fn parse(spec: &str) -> Result<Self, ParseError> {
        if spec == "*" {
            return Ok(Self::AllowAny);
        }

        if spec.contains('/') {
            let net =
                IpNet::from_str(spec).map_err(|_| ParseError::Prefix(spec.to_string()))?;
            Ok(Self::Prefix(net))
        } else {
            let addr =
                IpAddr::from_str(spec).map_err(|_| ParseError::Address(spec.to_string()))?;
            Ok(Self::Prefix(IpNet::from(addr)))
        }
    }

    /// Whether `addr` falls under this rule.
    pub fn matches(&self, addr: IpAddr) -> bool {
        match self {
            Self::AllowAny => true,
            Self::Prefix(net) => net.contains(&addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn parses_allow_any_marker() {
        assert_eq!(OriginRule::parse("*").unwrap(), OriginRule::AllowAny);
    }

    #[test]
    fn parses_explicit_prefix() {
        let rule = OriginRule::parse("10.0.0.0/24").unwrap();
        assert!(rule.matches(addr("10.0.0.5")));
        assert!(!rule.matches(addr("10.0.1.5")));
    }

    #[test]
    fn bare_address_widens_to_host_prefix() {
        let v4 = OriginRule::parse("192.0.2.7").unwrap();
        assert_eq!(v4, OriginRule::parse("192.0.2.7/32").unwrap());
        assert!(v4.matches(addr("192.0.2.7")));
        assert!(!v4.matches(addr("192.0.2.8")));

        let v6 = OriginRule::parse("2001:db8::1").unwrap();
        assert_eq!(v6, OriginRule::parse("2001:db8::1/128").unwrap());
        assert!(v6.matches(addr("2001:db8::1")));
        assert!(!v6.matches(addr("2001:db8::2")));
    }

    #[test]
    fn allow_any_matches_both_families() {
        assert!(OriginRule::AllowAny.matches(addr("198.51.100.20")));
        assert!(OriginRule::AllowAny.matches(addr("::1")));
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(matches!(
            OriginRule::parse("not-an-address"),
            Err(ParseError::Address(_))
        ));
        assert!(matches!(
            OriginRule::parse("10.0.0.0/99"),
            Err(ParseError::Prefix(_))
        ));
        assert!(matches!(
            OriginRule::parse("10.0.0/8"),
            Err(ParseError::Prefix(_))
        ));
    }
}
