use crate::error::RssError;
use crate::hash_functions::{AddrFamily, L4Proto};
use librss_tools::{FiveTuple, ToFiveTuple};
use pnet_packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::tcp::TcpPacket;
use pnet_packet::udp::UdpPacket;
use pnet_packet::vlan::VlanPacket;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

const IPV4_FLAG_MORE_FRAGMENTS: u8 = 0b001;

const IPV6_HOP_BY_HOP: u8 = 0;
const IPV6_ROUTING: u8 = 43;
const IPV6_FRAGMENT: u8 = 44;
const IPV6_AH: u8 = 51;
const IPV6_DEST_OPTIONS: u8 = 60;
const IPV6_MAX_EXT_HEADERS: usize = 8;

/// Source and destination ports of a transport header
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct L4Ports {
    pub src: u16,
    pub dst: u16,
}

/// Header fields of a packet, as used by RSS hash functions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PacketFields {
    pub src: IpAddr,
    pub dst: IpAddr,
    /// Transport protocol (after IPv6 extension headers)
    pub proto: L4Proto,
    /// Ports, if the packet carries a TCP/UDP/SCTP header (never set for fragments)
    pub ports: Option<L4Ports>,
    /// Packet is an IP fragment
    pub fragment: bool,
}

/// Link layer of raw packet data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// No link layer: data starts with the IPv4 or IPv6 header
    RawIp,
}

impl PacketFields {
    /// Fields of a packet with addresses only (protocol 0, not a fragment)
    pub fn new(src: IpAddr, dst: IpAddr) -> Self {
        PacketFields {
            src,
            dst,
            proto: L4Proto::Other(0),
            ports: None,
            fragment: false,
        }
    }

    /// Set transport protocol and ports
    ///
    /// Ports are ignored if the protocol does not carry ports.
    pub fn with_ports(mut self, proto: L4Proto, src_port: u16, dst_port: u16) -> Self {
        self.proto = proto;
        self.ports = if proto.has_ports() && !self.fragment {
            Some(L4Ports {
                src: src_port,
                dst: dst_port,
            })
        } else {
            None
        };
        self
    }

    pub fn with_proto(mut self, proto: L4Proto) -> Self {
        self.proto = proto;
        if !proto.has_ports() {
            self.ports = None;
        }
        self
    }

    /// Mark the packet as a fragment. Ports are dropped.
    pub fn fragmented(mut self) -> Self {
        self.fragment = true;
        self.ports = None;
        self
    }

    /// Address family, or `None` if source and destination families differ
    pub fn family(&self) -> Option<AddrFamily> {
        match (self.src, self.dst) {
            (IpAddr::V4(_), IpAddr::V4(_)) => Some(AddrFamily::Ipv4),
            (IpAddr::V6(_), IpAddr::V6(_)) => Some(AddrFamily::Ipv6),
            _ => None,
        }
    }

    /// Same packet, seen from the other direction
    pub fn reversed(&self) -> Self {
        PacketFields {
            src: self.dst,
            dst: self.src,
            ports: self.ports.map(|p| L4Ports {
                src: p.dst,
                dst: p.src,
            }),
            ..*self
        }
    }
}

impl From<&FiveTuple> for PacketFields {
    fn from(t5: &FiveTuple) -> Self {
        PacketFields::new(t5.src, t5.dst).with_ports(
            L4Proto::from_ip_proto(t5.proto),
            t5.src_port,
            t5.dst_port,
        )
    }
}

impl ToFiveTuple for PacketFields {
    fn get_five_tuple(&self) -> FiveTuple {
        let (src_port, dst_port) = self.ports.map(|p| (p.src, p.dst)).unwrap_or((0, 0));
        FiveTuple {
            proto: self.proto.ip_proto(),
            src: self.src,
            dst: self.dst,
            src_port,
            dst_port,
        }
    }
}

impl fmt::Display for PacketFields {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.get_five_tuple())?;
        if self.fragment {
            f.write_str(" (fragment)")?;
        }
        Ok(())
    }
}

/// Extract RSS fields from raw packet data
///
/// VLAN tags (802.1Q, 802.1ad and QinQ) are skipped. Ports are read for TCP, UDP and
/// SCTP, unless the packet is a fragment.
pub fn extract_fields(data: &[u8], link: LinkLayer) -> Result<PacketFields, RssError> {
    match link {
        LinkLayer::Ethernet => {
            let eth = EthernetPacket::new(data).ok_or(RssError::Truncated("Ethernet"))?;
            let mut ethertype = eth.get_ethertype();
            let mut offset = EthernetPacket::minimum_packet_size();
            while is_vlan(ethertype) {
                let vlan =
                    VlanPacket::new(&data[offset..]).ok_or(RssError::Truncated("VLAN"))?;
                ethertype = vlan.get_ethertype();
                offset += VlanPacket::minimum_packet_size();
            }
            match ethertype {
                EtherTypes::Ipv4 => parse_ipv4(&data[offset..]),
                EtherTypes::Ipv6 => parse_ipv6(&data[offset..]),
                _ => {
                    trace!("no IP layer (ethertype 0x{:04x})", ethertype.0);
                    Err(RssError::NoIpLayer)
                }
            }
        }
        LinkLayer::RawIp => match data.first().map(|b| b >> 4) {
            Some(4) => parse_ipv4(data),
            Some(6) => parse_ipv6(data),
            Some(_) => Err(RssError::NoIpLayer),
            None => Err(RssError::Truncated("IP")),
        },
    }
}

fn is_vlan(ethertype: EtherType) -> bool {
    ethertype == EtherTypes::Vlan || ethertype == EtherTypes::PBridge || ethertype == EtherTypes::QinQ
}

fn parse_ipv4(data: &[u8]) -> Result<PacketFields, RssError> {
    let ipv4 = Ipv4Packet::new(data).ok_or(RssError::Truncated("IPv4"))?;
    let header_len = usize::from(ipv4.get_header_length()) * 4;
    if header_len < Ipv4Packet::minimum_packet_size() || header_len > data.len() {
        return Err(RssError::Truncated("IPv4"));
    }
    let fragment = ipv4.get_flags() & IPV4_FLAG_MORE_FRAGMENTS != 0
        || ipv4.get_fragment_offset() != 0;
    let fields = PacketFields::new(
        IpAddr::V4(ipv4.get_source()),
        IpAddr::V4(ipv4.get_destination()),
    );
    let proto = L4Proto::from_ip_proto(ipv4.get_next_level_protocol().0);
    finish_l4(fields, proto, fragment, &data[header_len..])
}

fn parse_ipv6(data: &[u8]) -> Result<PacketFields, RssError> {
    let ipv6 = Ipv6Packet::new(data).ok_or(RssError::Truncated("IPv6"))?;
    let fields = PacketFields::new(
        IpAddr::V6(ipv6.get_source()),
        IpAddr::V6(ipv6.get_destination()),
    );
    let mut next_header = ipv6.get_next_header().0;
    let mut offset = Ipv6Packet::minimum_packet_size();
    let mut fragment = false;
    for _ in 0..IPV6_MAX_EXT_HEADERS {
        let ext = &data[offset..];
        let len = match next_header {
            IPV6_HOP_BY_HOP | IPV6_ROUTING | IPV6_DEST_OPTIONS => {
                if ext.len() < 2 {
                    return Err(RssError::Truncated("IPv6 extension"));
                }
                (usize::from(ext[1]) + 1) * 8
            }
            IPV6_AH => {
                if ext.len() < 2 {
                    return Err(RssError::Truncated("IPv6 extension"));
                }
                (usize::from(ext[1]) + 2) * 4
            }
            IPV6_FRAGMENT => {
                fragment = true;
                8
            }
            _ => break,
        };
        if ext.len() < len {
            return Err(RssError::Truncated("IPv6 extension"));
        }
        next_header = ext[0];
        offset += len;
    }
    finish_l4(
        fields,
        L4Proto::from_ip_proto(next_header),
        fragment,
        &data[offset..],
    )
}

fn finish_l4(
    fields: PacketFields,
    proto: L4Proto,
    fragment: bool,
    l4_data: &[u8],
) -> Result<PacketFields, RssError> {
    if fragment {
        return Ok(fields.with_proto(proto).fragmented());
    }
    let ports = match proto {
        L4Proto::Tcp => {
            let tcp = TcpPacket::new(l4_data).ok_or(RssError::Truncated("TCP"))?;
            (tcp.get_source(), tcp.get_destination())
        }
        L4Proto::Udp => {
            let udp = UdpPacket::new(l4_data).ok_or(RssError::Truncated("UDP"))?;
            (udp.get_source(), udp.get_destination())
        }
        L4Proto::Sctp => {
            // common header: source port, destination port, verification tag, checksum
            if l4_data.len() < 12 {
                return Err(RssError::Truncated("SCTP"));
            }
            (
                u16::from_be_bytes([l4_data[0], l4_data[1]]),
                u16::from_be_bytes([l4_data[2], l4_data[3]]),
            )
        }
        L4Proto::Other(_) => return Ok(fields.with_proto(proto)),
    };
    Ok(fields.with_ports(proto, ports.0, ports.1))
}
