use crate::config::Config;
use crate::error::Error;
use pcap_parser::{Block, Linktype, PcapBlockOwned, PcapError};
use std::cmp::min;
use std::io::Read;

/// A packet read from a capture file, with the link type of its interface
#[derive(Debug)]
pub struct CapturedPacket<'a> {
    /// Index of the packet in the capture (starting at 1)
    pub index: usize,
    pub linktype: Linktype,
    /// Number of bytes captured
    pub caplen: u32,
    /// Length of the packet on the wire, larger than `caplen` if the capture was truncated
    pub origlen: u32,
    /// Captured bytes, starting at the link layer
    pub data: &'a [u8],
}

/// pcap/pcap-ng reader
///
/// `CaptureReader` hides the file format (legacy pcap or pcap-ng, endianness,
/// multiple interfaces) and calls a function for every captured packet.
pub struct CaptureReader {
    capacity: usize,
}

impl Default for CaptureReader {
    fn default() -> Self {
        CaptureReader {
            capacity: 128 * 1024,
        }
    }
}

impl CaptureReader {
    pub fn new(config: &Config) -> Self {
        let capacity = config
            .get_usize("buffer_initial_capacity")
            .unwrap_or(128 * 1024);
        CaptureReader { capacity }
    }

    /// Read all packets from `input`, calling `f` for each of them
    ///
    /// Any error returned by `f` stops the iteration. Returns the number of packets read.
    pub fn run<R, F>(&self, input: R, mut f: F) -> Result<usize, Error>
    where
        R: Read + Send,
        F: FnMut(&CapturedPacket) -> Result<(), Error>,
    {
        let mut reader = pcap_parser::create_reader(self.capacity, input)?;
        let mut legacy_linktype = None;
        let mut interfaces: Vec<Linktype> = Vec::new();
        let mut block_index = 0;
        let mut packet_index = 0;
        let mut last_incomplete_index = None;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    block_index += 1;
                    let packet = match block {
                        PcapBlockOwned::LegacyHeader(hdr) => {
                            debug!(
                                "pcap version {}.{}, linktype {:?}",
                                hdr.version_major, hdr.version_minor, hdr.network
                            );
                            legacy_linktype = Some(hdr.network);
                            None
                        }
                        PcapBlockOwned::Legacy(b) => match legacy_linktype {
                            Some(linktype) => Some((
                                linktype,
                                b.caplen,
                                b.origlen,
                                &b.data[..min(b.caplen as usize, b.data.len())],
                            )),
                            None => {
                                warn!("pcap block without file header (block {})", block_index);
                                None
                            }
                        },
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            interfaces.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            debug!("new interface {}: linktype {:?}", interfaces.len(), idb.linktype);
                            interfaces.push(idb.linktype);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            match interfaces.get(epb.if_id as usize) {
                                Some(&linktype) => Some((
                                    linktype,
                                    epb.caplen,
                                    epb.origlen,
                                    &epb.data[..min(epb.caplen as usize, epb.data.len())],
                                )),
                                None => {
                                    warn!(
                                        "packet references unknown interface {} (block {})",
                                        epb.if_id, block_index
                                    );
                                    None
                                }
                            }
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => match interfaces.first() {
                            Some(&linktype) => {
                                let caplen = min(spb.origlen as usize, spb.data.len());
                                Some((linktype, caplen as u32, spb.origlen, &spb.data[..caplen]))
                            }
                            None => {
                                warn!("simple packet without interface (block {})", block_index);
                                None
                            }
                        },
                        PcapBlockOwned::NG(_) => None,
                    };
                    if let Some((linktype, caplen, origlen, data)) = packet {
                        packet_index += 1;
                        let packet = CapturedPacket {
                            index: packet_index,
                            linktype,
                            caplen,
                            origlen,
                            data,
                        };
                        f(&packet)?;
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => {
                    if last_incomplete_index == Some(block_index) && reader.reader_exhausted() {
                        warn!("Could not read complete data block (block_index={block_index})");
                        warn!("Hint: the reader buffer size may be too small, or the input file may be truncated.");
                        break;
                    }
                    last_incomplete_index = Some(block_index);
                    reader.refill()?;
                }
                Err(e) => {
                    error!("error while reading block {}: {:?}", block_index, e);
                    return Err(e.into());
                }
            }
        }

        Ok(packet_index)
    }
}
