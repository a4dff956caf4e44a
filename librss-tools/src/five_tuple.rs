use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Flow identifier of a packet: protocol number, addresses and ports
///
/// Ports are 0 for protocols without ports.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct FiveTuple {
    pub proto: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

pub trait ToFiveTuple {
    fn get_five_tuple(&self) -> FiveTuple;
}

impl FiveTuple {
    /// Same flow, seen from the other direction
    pub fn get_reverse(&self) -> FiveTuple {
        FiveTuple {
            proto: self.proto,
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

impl Default for FiveTuple {
    fn default() -> Self {
        FiveTuple {
            proto: 0,
            src: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            dst: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            src_port: 0,
            dst_port: 0,
        }
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.src, self.dst) {
            (IpAddr::V6(src), IpAddr::V6(dst)) => write!(
                f,
                "[{}]:{} -> [{}]:{} [{}]",
                src, self.src_port, dst, self.dst_port, self.proto
            ),
            _ => write!(
                f,
                "{}:{} -> {}:{} [{}]",
                self.src, self.src_port, self.dst, self.dst_port, self.proto
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn five_tuple_reverse() {
        let t5 = FiveTuple {
            proto: 6,
            src: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            src_port: 1234,
            dst_port: 80,
        };
        let rev = t5.get_reverse();
        assert_eq!(rev.src, t5.dst);
        assert_eq!(rev.src_port, 80);
        assert_eq!(rev.get_reverse(), t5);
    }

    #[test]
    fn five_tuple_display() {
        let t5 = FiveTuple {
            proto: 17,
            src: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            src_port: 53,
            dst_port: 4000,
        };
        assert_eq!(t5.to_string(), "10.0.0.1:53 -> 10.0.0.2:4000 [17]");
        let t6 = FiveTuple {
            src: IpAddr::V6(Ipv6Addr::LOCALHOST),
            dst: IpAddr::V6(Ipv6Addr::LOCALHOST),
            ..t5
        };
        assert_eq!(t6.to_string(), "[::1]:53 -> [::1]:4000 [17]");
    }
}
