use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::Error;
use crate::offer::OfferKind;

const DRP_PREFIX: &str = "drp:to=";
const RELAY_PREFIX: &str = "relay:to=";

/// Where the bind sends a packet and which path a received packet came from.
///
/// Text forms:
///
/// - `"<ip>:<port>"` direct UDP
/// - `"relay:to=<key>//<ip>:<port>"` through the TURN relay
/// - `"drp:to=<key>//<ip>:<port>"` through the DRP server at `ip:port`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Direct {
        addr: SocketAddr,
    },
    Relay {
        from: String,
        to: String,
        addr: SocketAddr,
    },
    Drp {
        from: String,
        to: String,
        addr: SocketAddr,
    },
}

impl Endpoint {
    pub fn kind(&self) -> OfferKind {
        match self {
            Endpoint::Direct { .. } => OfferKind::Direct,
            Endpoint::Relay { .. } => OfferKind::Relay,
            Endpoint::Drp { .. } => OfferKind::Drp,
        }
    }
    pub fn from(&self) -> &str {
        match self {
            Endpoint::Direct { .. } => "",
            Endpoint::Relay { from, .. } | Endpoint::Drp { from, .. } => from,
        }
    }
    pub fn to(&self) -> &str {
        match self {
            Endpoint::Direct { .. } => "",
            Endpoint::Relay { to, .. } | Endpoint::Drp { to, .. } => to,
        }
    }
    pub fn addr(&self) -> SocketAddr {
        match self {
            Endpoint::Direct { addr }
            | Endpoint::Relay { addr, .. }
            | Endpoint::Drp { addr, .. } => *addr,
        }
    }
    pub fn dst_ip(&self) -> IpAddr {
        self.addr().ip()
    }
    pub fn dst_to_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Direct { addr } => write!(f, "{addr}"),
            Endpoint::Relay { to, addr, .. } => write!(f, "{RELAY_PREFIX}{to}//{addr}"),
            Endpoint::Drp { to, addr, .. } => write!(f, "{DRP_PREFIX}{to}//{addr}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidEndpoint(s.to_string());
        if let Some(rest) = s.strip_prefix(DRP_PREFIX) {
            let (to, addr) = split_to(rest).ok_or_else(invalid)?;
            return Ok(Endpoint::Drp {
                from: String::new(),
                to,
                addr,
            });
        }
        if let Some(rest) = s.strip_prefix(RELAY_PREFIX) {
            let (to, addr) = split_to(rest).ok_or_else(invalid)?;
            return Ok(Endpoint::Relay {
                from: String::new(),
                to,
                addr,
            });
        }
        let addr = s.parse().map_err(|_| invalid())?;
        Ok(Endpoint::Direct { addr })
    }
}

fn split_to(rest: &str) -> Option<(String, SocketAddr)> {
    let (to, addr) = rest.rsplit_once("//")?;
    if to.is_empty() {
        return None;
    }
    Some((to.to_string(), addr.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direct() {
        let ep: Endpoint = "10.0.0.1:51820".parse().unwrap();
        assert_eq!(ep.kind(), OfferKind::Direct);
        assert_eq!(ep.addr(), "10.0.0.1:51820".parse().unwrap());
        assert_eq!(ep.to_string(), "10.0.0.1:51820");
    }

    #[test]
    fn test_parse_drp() {
        let ep: Endpoint = "drp:to=ABC//10.0.0.1:80".parse().unwrap();
        assert_eq!(ep.kind(), OfferKind::Drp);
        assert_eq!(ep.to(), "ABC");
        assert_eq!(ep.dst_ip(), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(ep.dst_to_string(), "drp:to=ABC//10.0.0.1:80");
    }

    #[test]
    fn test_display_parse() {
        let endpoints = [
            Endpoint::Relay {
                from: "me".into(),
                to: "a/b+c=".into(),
                addr: "[2001:db8::1]:3478".parse().unwrap(),
            },
            Endpoint::Drp {
                from: "me".into(),
                to: "key".into(),
                addr: "1.1.1.1:6266".parse().unwrap(),
            },
        ];
        for ep in endpoints {
            let parsed: Endpoint = ep.to_string().parse().unwrap();
            assert_eq!(parsed.kind(), ep.kind());
            assert_eq!(parsed.to(), ep.to());
            assert_eq!(parsed.addr(), ep.addr());
        }
    }

    #[test]
    fn test_invalid() {
        assert!("drp:to=//1.1.1.1:1".parse::<Endpoint>().is_err());
        assert!("drp:to=abc".parse::<Endpoint>().is_err());
        assert!("nonsense".parse::<Endpoint>().is_err());
    }
}
