use crate::error::RssError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// RSS hash functions mask
///
/// Bit values are those of the DPDK `RTE_ETH_RSS_*` flags, so masks can be exchanged
/// with a device (e.g `flow_type_rss_offloads` or `rss_hf`) without conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HashFunctions(pub u64);

impl HashFunctions {
    pub const NONE: HashFunctions = HashFunctions(0);

    pub const IPV4: HashFunctions = HashFunctions(1 << 2);
    pub const FRAG_IPV4: HashFunctions = HashFunctions(1 << 3);
    pub const NONFRAG_IPV4_TCP: HashFunctions = HashFunctions(1 << 4);
    pub const NONFRAG_IPV4_UDP: HashFunctions = HashFunctions(1 << 5);
    pub const NONFRAG_IPV4_SCTP: HashFunctions = HashFunctions(1 << 6);
    pub const NONFRAG_IPV4_OTHER: HashFunctions = HashFunctions(1 << 7);
    pub const IPV6: HashFunctions = HashFunctions(1 << 8);
    pub const FRAG_IPV6: HashFunctions = HashFunctions(1 << 9);
    pub const NONFRAG_IPV6_TCP: HashFunctions = HashFunctions(1 << 10);
    pub const NONFRAG_IPV6_UDP: HashFunctions = HashFunctions(1 << 11);
    pub const NONFRAG_IPV6_SCTP: HashFunctions = HashFunctions(1 << 12);
    pub const NONFRAG_IPV6_OTHER: HashFunctions = HashFunctions(1 << 13);
    pub const L2_PAYLOAD: HashFunctions = HashFunctions(1 << 14);
    pub const IPV6_EX: HashFunctions = HashFunctions(1 << 15);
    pub const IPV6_TCP_EX: HashFunctions = HashFunctions(1 << 16);
    pub const IPV6_UDP_EX: HashFunctions = HashFunctions(1 << 17);
    pub const PORT: HashFunctions = HashFunctions(1 << 18);
    pub const VXLAN: HashFunctions = HashFunctions(1 << 19);
    pub const GENEVE: HashFunctions = HashFunctions(1 << 20);
    pub const NVGRE: HashFunctions = HashFunctions(1 << 21);
    pub const GTPU: HashFunctions = HashFunctions(1 << 23);
    pub const ETH: HashFunctions = HashFunctions(1 << 24);
    pub const S_VLAN: HashFunctions = HashFunctions(1 << 25);
    pub const C_VLAN: HashFunctions = HashFunctions(1 << 26);
    pub const ESP: HashFunctions = HashFunctions(1 << 27);
    pub const AH: HashFunctions = HashFunctions(1 << 28);
    pub const L2TPV3: HashFunctions = HashFunctions(1 << 29);
    pub const PFCP: HashFunctions = HashFunctions(1 << 30);
    pub const PPPOE: HashFunctions = HashFunctions(1 << 31);
    pub const ECPRI: HashFunctions = HashFunctions(1 << 32);
    pub const MPLS: HashFunctions = HashFunctions(1 << 33);
    pub const IPV4_CHKSUM: HashFunctions = HashFunctions(1 << 34);
    pub const L4_CHKSUM: HashFunctions = HashFunctions(1 << 35);
    pub const L2TPV2: HashFunctions = HashFunctions(1 << 36);
    pub const IPV6_FLOW_LABEL: HashFunctions = HashFunctions(1 << 37);

    pub const L2_DST_ONLY: HashFunctions = HashFunctions(1 << 58);
    pub const L2_SRC_ONLY: HashFunctions = HashFunctions(1 << 59);
    pub const L4_DST_ONLY: HashFunctions = HashFunctions(1 << 60);
    pub const L4_SRC_ONLY: HashFunctions = HashFunctions(1 << 61);
    pub const L3_DST_ONLY: HashFunctions = HashFunctions(1 << 62);
    pub const L3_SRC_ONLY: HashFunctions = HashFunctions(1 << 63);

    /// All IP hash functions (DPDK `RTE_ETH_RSS_IP`)
    pub const IP: HashFunctions = HashFunctions(
        Self::IPV4.0
            | Self::FRAG_IPV4.0
            | Self::NONFRAG_IPV4_OTHER.0
            | Self::IPV6.0
            | Self::FRAG_IPV6.0
            | Self::NONFRAG_IPV6_OTHER.0
            | Self::IPV6_EX.0,
    );
    /// `RTE_ETH_RSS_TCP`
    pub const TCP: HashFunctions =
        HashFunctions(Self::NONFRAG_IPV4_TCP.0 | Self::NONFRAG_IPV6_TCP.0 | Self::IPV6_TCP_EX.0);
    /// `RTE_ETH_RSS_UDP`
    pub const UDP: HashFunctions =
        HashFunctions(Self::NONFRAG_IPV4_UDP.0 | Self::NONFRAG_IPV6_UDP.0 | Self::IPV6_UDP_EX.0);
    /// `RTE_ETH_RSS_SCTP`
    pub const SCTP: HashFunctions =
        HashFunctions(Self::NONFRAG_IPV4_SCTP.0 | Self::NONFRAG_IPV6_SCTP.0);

    /// Field selection modifiers: they restrict the fields of other hash functions
    pub const MODIFIERS: HashFunctions = HashFunctions(
        Self::L2_DST_ONLY.0
            | Self::L2_SRC_ONLY.0
            | Self::L4_DST_ONLY.0
            | Self::L4_SRC_ONLY.0
            | Self::L3_DST_ONLY.0
            | Self::L3_SRC_ONLY.0,
    );

    /// Every bit with a known meaning
    pub const KNOWN: HashFunctions = HashFunctions(
        ((1u64 << 38) - 1) & !(1 << 22) & !0b11 | Self::MODIFIERS.0,
    );

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Test if all bits of `other` are set
    #[inline]
    pub const fn contains(self, other: HashFunctions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Test if any bit of `other` is set
    #[inline]
    pub const fn intersects(self, other: HashFunctions) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn intersection(self, other: HashFunctions) -> HashFunctions {
        HashFunctions(self.0 & other.0)
    }

    #[inline]
    pub const fn difference(self, other: HashFunctions) -> HashFunctions {
        HashFunctions(self.0 & !other.0)
    }

    /// Hash functions without field selection modifiers
    #[inline]
    pub const fn base(self) -> HashFunctions {
        self.difference(Self::MODIFIERS)
    }

    /// Field selection modifiers only
    #[inline]
    pub const fn modifiers(self) -> HashFunctions {
        self.intersection(Self::MODIFIERS)
    }

    /// Check that the mask only uses known bits
    pub fn validate(self) -> Result<HashFunctions, RssError> {
        let unknown = self.difference(Self::KNOWN);
        if unknown.is_empty() {
            Ok(self)
        } else {
            Err(RssError::MalformedHashFunctions(unknown.0))
        }
    }

    /// Parse a comma-separated list of hash function names
    ///
    /// Names are case-insensitive, and `_` can be used instead of `-`. Aggregates
    /// (`ip`, `tcp`, `udp`, `sctp`) and numeric masks (`0x...`) are accepted.
    pub fn from_names(s: &str) -> Result<HashFunctions, RssError> {
        let mut hf = HashFunctions::NONE;
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let lower = name.to_ascii_lowercase().replace('_', "-");
            if let Some(hex) = lower.strip_prefix("0x") {
                let bits = u64::from_str_radix(hex, 16)
                    .map_err(|_| RssError::UnknownHashFunction(name.to_owned()))?;
                hf |= HashFunctions(bits);
                continue;
            }
            let f = match lower.as_str() {
                "none" => HashFunctions::NONE,
                "ip" => HashFunctions::IP,
                "tcp" => HashFunctions::TCP,
                "udp" => HashFunctions::UDP,
                "sctp" => HashFunctions::SCTP,
                _ => HASH_FUNCTION_NAMES
                    .iter()
                    .find(|(n, _)| *n == lower)
                    .map(|(_, f)| *f)
                    .ok_or_else(|| RssError::UnknownHashFunction(name.to_owned()))?,
            };
            hf |= f;
        }
        hf.validate()
    }

    /// Names of the individual hash functions set in this mask
    pub fn names(self) -> Vec<&'static str> {
        HASH_FUNCTION_NAMES
            .iter()
            .filter(|(_, f)| self.contains(*f))
            .map(|(n, _)| *n)
            .collect()
    }
}

static HASH_FUNCTION_NAMES: &[(&str, HashFunctions)] = &[
    ("ipv4", HashFunctions::IPV4),
    ("frag-ipv4", HashFunctions::FRAG_IPV4),
    ("nonfrag-ipv4-tcp", HashFunctions::NONFRAG_IPV4_TCP),
    ("nonfrag-ipv4-udp", HashFunctions::NONFRAG_IPV4_UDP),
    ("nonfrag-ipv4-sctp", HashFunctions::NONFRAG_IPV4_SCTP),
    ("nonfrag-ipv4-other", HashFunctions::NONFRAG_IPV4_OTHER),
    ("ipv6", HashFunctions::IPV6),
    ("frag-ipv6", HashFunctions::FRAG_IPV6),
    ("nonfrag-ipv6-tcp", HashFunctions::NONFRAG_IPV6_TCP),
    ("nonfrag-ipv6-udp", HashFunctions::NONFRAG_IPV6_UDP),
    ("nonfrag-ipv6-sctp", HashFunctions::NONFRAG_IPV6_SCTP),
    ("nonfrag-ipv6-other", HashFunctions::NONFRAG_IPV6_OTHER),
    ("l2-payload", HashFunctions::L2_PAYLOAD),
    ("ipv6-ex", HashFunctions::IPV6_EX),
    ("ipv6-tcp-ex", HashFunctions::IPV6_TCP_EX),
    ("ipv6-udp-ex", HashFunctions::IPV6_UDP_EX),
    ("port", HashFunctions::PORT),
    ("vxlan", HashFunctions::VXLAN),
    ("geneve", HashFunctions::GENEVE),
    ("nvgre", HashFunctions::NVGRE),
    ("gtpu", HashFunctions::GTPU),
    ("eth", HashFunctions::ETH),
    ("s-vlan", HashFunctions::S_VLAN),
    ("c-vlan", HashFunctions::C_VLAN),
    ("esp", HashFunctions::ESP),
    ("ah", HashFunctions::AH),
    ("l2tpv3", HashFunctions::L2TPV3),
    ("pfcp", HashFunctions::PFCP),
    ("pppoe", HashFunctions::PPPOE),
    ("ecpri", HashFunctions::ECPRI),
    ("mpls", HashFunctions::MPLS),
    ("ipv4-chksum", HashFunctions::IPV4_CHKSUM),
    ("l4-chksum", HashFunctions::L4_CHKSUM),
    ("l2tpv2", HashFunctions::L2TPV2),
    ("ipv6-flow-label", HashFunctions::IPV6_FLOW_LABEL),
    ("l2-dst-only", HashFunctions::L2_DST_ONLY),
    ("l2-src-only", HashFunctions::L2_SRC_ONLY),
    ("l4-dst-only", HashFunctions::L4_DST_ONLY),
    ("l4-src-only", HashFunctions::L4_SRC_ONLY),
    ("l3-dst-only", HashFunctions::L3_DST_ONLY),
    ("l3-src-only", HashFunctions::L3_SRC_ONLY),
];

impl BitOr for HashFunctions {
    type Output = HashFunctions;

    fn bitor(self, rhs: HashFunctions) -> HashFunctions {
        HashFunctions(self.0 | rhs.0)
    }
}

impl BitOrAssign for HashFunctions {
    fn bitor_assign(&mut self, rhs: HashFunctions) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for HashFunctions {
    type Output = HashFunctions;

    fn bitand(self, rhs: HashFunctions) -> HashFunctions {
        HashFunctions(self.0 & rhs.0)
    }
}

impl fmt::Display for HashFunctions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names = self.names();
        let unknown = self.difference(HashFunctions::KNOWN);
        write!(f, "{}", names.join(","))?;
        if !unknown.is_empty() {
            if !names.is_empty() {
                f.write_str(",")?;
            }
            write!(f, "{:#x}", unknown.0)?;
        }
        Ok(())
    }
}

impl Serialize for HashFunctions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// Address family a hash function applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrFamily {
    Ipv4,
    Ipv6,
}

/// Transport protocols known to RSS hash functions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum L4Proto {
    Tcp,
    Udp,
    Sctp,
    /// Any other protocol number (ICMP, GRE, ...)
    Other(u8),
}

impl L4Proto {
    pub const fn from_ip_proto(proto: u8) -> L4Proto {
        match proto {
            6 => L4Proto::Tcp,
            17 => L4Proto::Udp,
            132 => L4Proto::Sctp,
            p => L4Proto::Other(p),
        }
    }

    pub const fn ip_proto(self) -> u8 {
        match self {
            L4Proto::Tcp => 6,
            L4Proto::Udp => 17,
            L4Proto::Sctp => 132,
            L4Proto::Other(p) => p,
        }
    }

    /// Does this protocol carry ports used by RSS?
    pub const fn has_ports(self) -> bool {
        !matches!(self, L4Proto::Other(_))
    }
}

/// Layer 4 selection of a hash function
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L4Match {
    /// Addresses only, whatever the payload
    Any,
    /// Addresses and ports, for this protocol only
    Ports(L4Proto),
    /// Addresses only, for payloads other than TCP, UDP and SCTP
    Other,
}

/// Fragment selection of a hash function
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentMatch {
    Any,
    Fragment,
    NonFragment,
}

/// Fields hashed by one hash function
#[derive(Clone, Copy, Debug)]
pub struct HashFieldDescriptor {
    pub flag: HashFunctions,
    pub family: AddrFamily,
    pub l4: L4Match,
    pub fragment: FragmentMatch,
}

impl HashFieldDescriptor {
    const fn new(
        flag: HashFunctions,
        family: AddrFamily,
        l4: L4Match,
        fragment: FragmentMatch,
    ) -> Self {
        HashFieldDescriptor {
            flag,
            family,
            l4,
            fragment,
        }
    }
}

/// Hash functions contributing to the input tuple, and the fields they select.
///
/// IPv6 extension header variants are treated like their plain counterparts: the
/// home address and routing header destination are not substituted.
pub static HASH_FIELD_TABLE: [HashFieldDescriptor; 15] = {
    use AddrFamily::*;
    use FragmentMatch as F;
    use HashFieldDescriptor as D;
    type H = HashFunctions;
    [
        D::new(H::IPV4, Ipv4, L4Match::Any, F::Any),
        D::new(H::FRAG_IPV4, Ipv4, L4Match::Any, F::Fragment),
        D::new(H::NONFRAG_IPV4_TCP, Ipv4, L4Match::Ports(L4Proto::Tcp), F::NonFragment),
        D::new(H::NONFRAG_IPV4_UDP, Ipv4, L4Match::Ports(L4Proto::Udp), F::NonFragment),
        D::new(H::NONFRAG_IPV4_SCTP, Ipv4, L4Match::Ports(L4Proto::Sctp), F::NonFragment),
        D::new(H::NONFRAG_IPV4_OTHER, Ipv4, L4Match::Other, F::NonFragment),
        D::new(H::IPV6, Ipv6, L4Match::Any, F::Any),
        D::new(H::FRAG_IPV6, Ipv6, L4Match::Any, F::Fragment),
        D::new(H::NONFRAG_IPV6_TCP, Ipv6, L4Match::Ports(L4Proto::Tcp), F::NonFragment),
        D::new(H::NONFRAG_IPV6_UDP, Ipv6, L4Match::Ports(L4Proto::Udp), F::NonFragment),
        D::new(H::NONFRAG_IPV6_SCTP, Ipv6, L4Match::Ports(L4Proto::Sctp), F::NonFragment),
        D::new(H::NONFRAG_IPV6_OTHER, Ipv6, L4Match::Other, F::NonFragment),
        D::new(H::IPV6_EX, Ipv6, L4Match::Any, F::Any),
        D::new(H::IPV6_TCP_EX, Ipv6, L4Match::Ports(L4Proto::Tcp), F::NonFragment),
        D::new(H::IPV6_UDP_EX, Ipv6, L4Match::Ports(L4Proto::Udp), F::NonFragment),
    ]
};
