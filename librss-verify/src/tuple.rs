use crate::error::RssError;
use crate::hash_functions::{FragmentMatch, HashFunctions, L4Match, HASH_FIELD_TABLE};
use crate::packet_fields::PacketFields;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Canonicalization of the symmetric input tuple
///
/// Both rules make the tuple of `A -> B` identical to the tuple of `B -> A`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymmetricRule {
    /// Smaller address first, then smaller port first (byte-wise comparison of the
    /// network-order values, address pair and port pair sorted independently)
    #[default]
    Sort,
    /// Both addresses replaced by `src ^ dst`, both ports by `sport ^ dport`
    Xor,
}

impl FromStr for SymmetricRule {
    type Err = RssError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sort" => Ok(SymmetricRule::Sort),
            "xor" => Ok(SymmetricRule::Xor),
            _ => Err(RssError::Config(format!(
                "invalid symmetric rule '{s}' (expected sort|xor)"
            ))),
        }
    }
}

impl fmt::Display for SymmetricRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymmetricRule::Sort => f.write_str("sort"),
            SymmetricRule::Xor => f.write_str("xor"),
        }
    }
}

/// Packet fields selected for the input tuple
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SelectedFields {
    pub src_addr: bool,
    pub dst_addr: bool,
    pub src_port: bool,
    pub dst_port: bool,
}

impl SelectedFields {
    fn is_one_sided(&self) -> bool {
        self.src_addr != self.dst_addr || self.src_port != self.dst_port
    }
}

/// Input tuples of the Toeplitz hash, for one packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashInput {
    /// Selected fields, in wire order (source address, destination address, source
    /// port, destination port)
    pub regular: Vec<u8>,
    /// Canonicalized tuple, if requested and if the selection covers both directions
    pub symmetric: Option<Vec<u8>>,
    pub fields: SelectedFields,
}

/// Build hash input tuples from packet fields, for a given set of hash functions
#[derive(Clone, Copy, Debug)]
pub struct TupleBuilder {
    hash_functions: HashFunctions,
    symmetric: Option<SymmetricRule>,
}

impl TupleBuilder {
    pub fn new(hash_functions: HashFunctions) -> Result<TupleBuilder, RssError> {
        Ok(TupleBuilder {
            hash_functions: hash_functions.validate()?,
            symmetric: None,
        })
    }

    /// Also build the symmetric tuple, using `rule`
    pub fn symmetric(mut self, rule: Option<SymmetricRule>) -> Self {
        self.symmetric = rule;
        self
    }

    pub fn hash_functions(&self) -> HashFunctions {
        self.hash_functions
    }

    /// Select the fields of `fields` covered by the hash functions
    ///
    /// Addresses are selected when any hash function of the packet's address family
    /// is set. Ports are selected only when a hash function names the packet's
    /// transport protocol and the packet carries ports: a TCP hash function applied
    /// to a UDP packet (or to a fragment) degrades to addresses only.
    pub fn select(&self, fields: &PacketFields) -> SelectedFields {
        let Some(family) = fields.family() else {
            return SelectedFields::default();
        };
        let base = self.hash_functions.base();
        let mut addrs = false;
        let mut ports = false;
        for d in HASH_FIELD_TABLE
            .iter()
            .filter(|d| d.family == family && base.contains(d.flag))
        {
            addrs = true;
            let fragment_ok = match d.fragment {
                FragmentMatch::Any => true,
                FragmentMatch::Fragment => fields.fragment,
                FragmentMatch::NonFragment => !fields.fragment,
            };
            if let L4Match::Ports(proto) = d.l4 {
                if fragment_ok && proto == fields.proto && fields.ports.is_some() {
                    ports = true;
                }
            }
        }
        let (src_l3, dst_l3) = sides(
            self.hash_functions,
            HashFunctions::L3_SRC_ONLY,
            HashFunctions::L3_DST_ONLY,
        );
        let (src_l4, dst_l4) = sides(
            self.hash_functions,
            HashFunctions::L4_SRC_ONLY,
            HashFunctions::L4_DST_ONLY,
        );
        SelectedFields {
            src_addr: addrs && src_l3,
            dst_addr: addrs && dst_l3,
            src_port: ports && src_l4,
            dst_port: ports && dst_l4,
        }
    }

    pub fn build(&self, fields: &PacketFields) -> Result<HashInput, RssError> {
        let sel = self.select(fields);
        if !(sel.src_addr || sel.dst_addr) {
            debug!(
                "no hashable field for {} with hash functions {}",
                fields, self.hash_functions
            );
            return Err(RssError::NoHashableFields);
        }
        let (src_port, dst_port) = fields.ports.map(|p| (p.src, p.dst)).unwrap_or((0, 0));

        let mut regular = Vec::with_capacity(36);
        if sel.src_addr {
            regular.extend_from_slice(&addr_octets(fields.src));
        }
        if sel.dst_addr {
            regular.extend_from_slice(&addr_octets(fields.dst));
        }
        if sel.src_port {
            regular.extend_from_slice(&src_port.to_be_bytes());
        }
        if sel.dst_port {
            regular.extend_from_slice(&dst_port.to_be_bytes());
        }

        let symmetric = match self.symmetric {
            Some(_) if sel.is_one_sided() => {
                debug!("selection {:?} is one-sided, no symmetric tuple", sel);
                None
            }
            Some(rule) => Some(symmetric_tuple(
                rule,
                addr_octets(fields.src),
                addr_octets(fields.dst),
                (src_port, dst_port),
                sel.src_port,
            )),
            None => None,
        };

        Ok(HashInput {
            regular,
            symmetric,
            fields: sel,
        })
    }
}

/// Build the input tuples of `fields` for `hash_functions`
///
/// The symmetric tuple is only built if `symmetric` is set.
pub fn build_tuple(
    fields: &PacketFields,
    hash_functions: HashFunctions,
    symmetric: Option<SymmetricRule>,
) -> Result<HashInput, RssError> {
    TupleBuilder::new(hash_functions)?
        .symmetric(symmetric)
        .build(fields)
}

// SRC_ONLY and DST_ONLY both set (or none) means both sides
fn sides(hf: HashFunctions, src_only: HashFunctions, dst_only: HashFunctions) -> (bool, bool) {
    match (hf.contains(src_only), hf.contains(dst_only)) {
        (true, false) => (true, false),
        (false, true) => (false, true),
        _ => (true, true),
    }
}

fn addr_octets(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn symmetric_tuple(
    rule: SymmetricRule,
    src: Vec<u8>,
    dst: Vec<u8>,
    (src_port, dst_port): (u16, u16),
    with_ports: bool,
) -> Vec<u8> {
    let mut v = Vec::with_capacity(36);
    match rule {
        SymmetricRule::Sort => {
            let (lo, hi) = if src <= dst { (src, dst) } else { (dst, src) };
            v.extend_from_slice(&lo);
            v.extend_from_slice(&hi);
            if with_ports {
                v.extend_from_slice(&src_port.min(dst_port).to_be_bytes());
                v.extend_from_slice(&src_port.max(dst_port).to_be_bytes());
            }
        }
        SymmetricRule::Xor => {
            let x: Vec<u8> = src.iter().zip(dst.iter()).map(|(a, b)| a ^ b).collect();
            v.extend_from_slice(&x);
            v.extend_from_slice(&x);
            if with_ports {
                let p = (src_port ^ dst_port).to_be_bytes();
                v.extend_from_slice(&p);
                v.extend_from_slice(&p);
            }
        }
    }
    v
}
