//! Inspection of ICE candidates gathered locally and received from the remote
//! side.

use std::net::{IpAddr, Ipv6Addr};

use crate::platform::{CandidateType, IceCandidate};

/// Evidence about network paths collected from ICE candidates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CandidateEvidence {
    /// Host candidate seen.
    pub saw_host: bool,

    /// Host candidate with a publicly routable address seen.
    pub saw_public_host: bool,

    /// Server reflexive candidate seen.
    pub saw_server_reflexive: bool,

    /// Relay candidate seen.
    pub saw_relay: bool,

    /// Candidate with an IPv6 address seen.
    pub saw_ipv6: bool,
}

impl CandidateEvidence {
    /// Updates this [`CandidateEvidence`] with the provided [`IceCandidate`].
    ///
    /// Unparseable candidates are ignored.
    pub fn record(&mut self, candidate: &IceCandidate) {
        let parsed = match ParsedCandidate::parse(&candidate.candidate) {
            Some(parsed) => parsed,
            None => return,
        };
        if matches!(parsed.address, Some(IpAddr::V6(_))) {
            self.saw_ipv6 = true;
        }
        match parsed.kind {
            CandidateType::Host => {
                self.saw_host = true;
                if parsed.address.map_or(false, is_public) {
                    self.saw_public_host = true;
                }
            }
            CandidateType::ServerReflexive => self.saw_server_reflexive = true,
            CandidateType::Relay => self.saw_relay = true,
            CandidateType::PeerReflexive => {}
        }
    }

    /// Indicates whether any candidate reachable from outside of the local
    /// network was seen.
    pub fn has_reachable_candidate(&self) -> bool {
        self.saw_server_reflexive || self.saw_relay || self.saw_public_host
    }
}

/// Fields of an ICE candidate line relevant to [`CandidateEvidence`].
#[derive(Debug, PartialEq)]
struct ParsedCandidate {
    kind: CandidateType,
    address: Option<IpAddr>,
}

impl ParsedCandidate {
    /// Index of the connection address field in a candidate line.
    const ADDRESS_FIELD: usize = 4;

    /// Parses `candidate:<foundation> <component> <transport> <priority>
    /// <address> <port> typ <type> ...` line.
    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<_> = line.split_whitespace().collect();
        let kind = fields
            .iter()
            .position(|f| *f == "typ")
            .and_then(|i| fields.get(i + 1))
            .and_then(|t| CandidateType::from_sdp_token(t))?;
        let address = fields
            .get(Self::ADDRESS_FIELD)
            .and_then(|a| a.parse::<IpAddr>().ok());
        Some(Self { kind, address })
    }
}

/// Indicates whether the provided address is routable in the public
/// internet.
fn is_public(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            !(v6.is_loopback() || v6.is_unspecified() || is_local_v6(v6))
        }
    }
}

/// Checks `fe80::/10` (link-local) and `fc00::/7` (unique local) ranges.
fn is_local_v6(addr: Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    (first & 0xffc0) == 0xfe80 || (first & 0xfe00) == 0xfc00
}
