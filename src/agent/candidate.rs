use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CandidateKind {
    /// Address of a local network card
    Host,
    /// Public mapping observed by the TURN/STUN server
    Srflx,
}

impl CandidateKind {
    fn as_str(&self) -> &'static str {
        match self {
            CandidateKind::Host => "host",
            CandidateKind::Srflx => "srflx",
        }
    }
}

/// A transport address the remote side may try, written `"<type> <ip:port>"`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub addr: SocketAddr,
}

impl Candidate {
    pub fn host(addr: SocketAddr) -> Self {
        Self {
            kind: CandidateKind::Host,
            addr,
        }
    }
    pub fn srflx(addr: SocketAddr) -> Self {
        Self {
            kind: CandidateKind::Srflx,
            addr,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.addr)
    }
}

impl FromStr for Candidate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, addr) = s
            .trim()
            .split_once(' ')
            .ok_or_else(|| Error::InvalidCandidate(s.to_string()))?;
        let kind = match kind {
            "host" => CandidateKind::Host,
            "srflx" => CandidateKind::Srflx,
            _ => return Err(Error::InvalidCandidate(s.to_string())),
        };
        let addr = addr
            .trim()
            .parse()
            .map_err(|_| Error::InvalidCandidate(s.to_string()))?;
        Ok(Candidate { kind, addr })
    }
}

/// Host candidates for every usable local address on the port of its family,
/// followed by the server-reflexive candidate.
pub(crate) fn gather(
    ips: &[IpAddr],
    v4_port: Option<u16>,
    v6_port: Option<u16>,
    mapped_addr: Option<SocketAddr>,
) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(ips.len() + 1);
    for ip in ips {
        let port = match ip {
            IpAddr::V4(_) => v4_port,
            IpAddr::V6(_) => v6_port,
        };
        if let Some(port) = port {
            let candidate = Candidate::host(SocketAddr::new(*ip, port));
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }
    if let Some(mapped_addr) = mapped_addr {
        candidates.push(Candidate::srflx(mapped_addr));
    }
    candidates
}
