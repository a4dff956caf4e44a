use librss_tools::CapturedPacket;
use librss_verify::*;
use pcap_parser::Linktype;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

/// Locate the IP or Ethernet header in captured data
pub fn frame_data(linktype: Linktype, data: &[u8]) -> Option<(LinkLayer, &[u8])> {
    match linktype {
        Linktype::ETHERNET => Some((LinkLayer::Ethernet, data)),
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => Some((LinkLayer::RawIp, data)),
        // BSD loopback: 4-byte address family in host order
        Linktype::NULL => data.get(4..).map(|d| (LinkLayer::RawIp, d)),
        Linktype::LINUX_SLL => data.get(16..).map(|d| (LinkLayer::RawIp, d)),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Predicted {
        fields: PacketFields,
        prediction: Prediction,
        #[serde(skip_serializing_if = "Option::is_none")]
        verdict: Option<Verdict>,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Serialize)]
pub struct PacketReport {
    pub index: usize,
    /// The capture holds fewer bytes than the packet had on the wire
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl PacketReport {
    pub fn new(predictor: &RssPredictor, packet: &CapturedPacket, expect_queue: Option<u16>) -> Self {
        let outcome = match frame_data(packet.linktype, packet.data) {
            Some((link, data)) => match predictor.predict_frame(data, link) {
                Ok((fields, prediction)) => {
                    let verdict = expect_queue.map(|q| verify(&prediction, &Observation::new(q)));
                    Outcome::Predicted {
                        fields,
                        prediction,
                        verdict,
                    }
                }
                Err(e) => {
                    debug!("packet {}: {}", packet.index, e);
                    Outcome::Skipped {
                        reason: e.to_string(),
                    }
                }
            },
            None => Outcome::Skipped {
                reason: format!("unsupported link type {:?}", packet.linktype),
            },
        };
        let truncated = packet.caplen < packet.origlen;
        if truncated {
            debug!(
                "packet {}: truncated, {} of {} bytes",
                packet.index, packet.caplen, packet.origlen
            );
        }
        PacketReport {
            index: packet.index,
            truncated,
            outcome,
        }
    }

    pub fn write<W: Write>(&self, out: &mut W, json: bool) -> io::Result<()> {
        if json {
            serde_json::to_writer(&mut *out, self)?;
            return writeln!(out);
        }
        match &self.outcome {
            Outcome::Predicted {
                fields,
                prediction,
                verdict,
            } => {
                write!(out, "{}: {} -> {}", self.index, fields, prediction)?;
                if let Some(verdict) = verdict {
                    write!(out, " [{verdict}]")?;
                }
            }
            Outcome::Skipped { reason } => write!(out, "{}: skipped ({})", self.index, reason)?,
        }
        if self.truncated {
            write!(out, " (truncated)")?;
        }
        writeln!(out)
    }
}

/// Counters over a capture
#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub packets: usize,
    pub predicted: usize,
    pub skipped: usize,
    pub truncated: usize,
    pub matches: usize,
    pub mismatches: usize,
    /// Number of packets per expected queue (regular hash)
    pub queues: BTreeMap<u16, usize>,
}

impl Summary {
    pub fn add(&mut self, report: &PacketReport) {
        self.packets += 1;
        if report.truncated {
            self.truncated += 1;
        }
        match &report.outcome {
            Outcome::Predicted {
                prediction,
                verdict,
                ..
            } => {
                self.predicted += 1;
                *self.queues.entry(prediction.regular.queue).or_default() += 1;
                match verdict {
                    Some(v) if v.is_match() => self.matches += 1,
                    Some(_) => self.mismatches += 1,
                    None => (),
                }
            }
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn write<W: Write>(&self, out: &mut W, json: bool) -> io::Result<()> {
        if json {
            #[derive(Serialize)]
            struct Wrapper<'a> {
                summary: &'a Summary,
            }
            serde_json::to_writer(&mut *out, &Wrapper { summary: self })?;
            return writeln!(out);
        }
        writeln!(out, "{self}")
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} packets, {} predicted, {} skipped",
            self.packets, self.predicted, self.skipped
        )?;
        if self.truncated > 0 {
            write!(f, ", {} truncated", self.truncated)?;
        }
        if self.matches + self.mismatches > 0 {
            write!(f, ", {} matches, {} mismatches", self.matches, self.mismatches)?;
        }
        for (queue, count) in &self.queues {
            write!(f, "\n  queue {queue:3}: {count}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_frame() -> Vec<u8> {
        let mut v = vec![0x45, 0, 0, 28, 0, 0, 0, 0, 64, 17, 0, 0];
        v.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
        v.extend_from_slice(&[0x30, 0x39, 0x00, 0x35, 0, 8, 0, 0]);
        v
    }

    fn predictor() -> RssPredictor {
        RssPredictor::new(
            RssKey::default(),
            HashFunctions::IP | HashFunctions::UDP,
            RedirectionTable::from_entries(vec![0, 1, 2, 3]).expect("reta"),
            None,
        )
        .expect("predictor")
    }

    #[test]
    fn frame_data_linktypes() {
        let data = [0u8; 20];
        assert!(matches!(
            frame_data(Linktype::ETHERNET, &data),
            Some((LinkLayer::Ethernet, _))
        ));
        assert_eq!(frame_data(Linktype::NULL, &data).map(|(_, d)| d.len()), Some(16));
        assert_eq!(frame_data(Linktype::IPV6, &data).map(|(_, d)| d.len()), Some(20));
        assert_eq!(frame_data(Linktype::IPV4, &data).map(|(_, d)| d.len()), Some(20));
        assert!(frame_data(Linktype::LINUX_SLL, &data[..8]).is_none());
        assert!(frame_data(Linktype(147), &data).is_none());
    }

    #[test]
    fn report_and_summary() {
        let p = predictor();
        let data = udp_frame();
        let mut summary = Summary::default();
        let packet = CapturedPacket {
            index: 1,
            linktype: Linktype::RAW,
            caplen: data.len() as u32,
            origlen: data.len() as u32,
            data: &data,
        };
        let report = PacketReport::new(&p, &packet, None);
        let Outcome::Predicted { prediction, .. } = &report.outcome else {
            panic!("packet not predicted: {report:?}")
        };
        let expected = prediction.regular.queue;
        summary.add(&report);
        summary.add(&PacketReport::new(&p, &packet, Some(expected)));
        summary.add(&PacketReport::new(&p, &packet, Some((expected + 1) % 4)));
        let arp = CapturedPacket {
            linktype: Linktype(147),
            ..packet
        };
        summary.add(&PacketReport::new(&p, &arp, None));
        assert_eq!(summary.packets, 4);
        assert_eq!(summary.predicted, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.matches, 1);
        assert_eq!(summary.mismatches, 1);
        assert_eq!(summary.queues.get(&expected), Some(&3));

        let mut out = Vec::new();
        report.write(&mut out, true).expect("write");
        let js: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(js["status"], "predicted");
        assert_eq!(js["index"], 1);
        assert_eq!(js["prediction"]["regular"]["queue"], expected);

        let mut out = Vec::new();
        summary.write(&mut out, false).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("4 packets, 3 predicted, 1 skipped, 1 matches, 1 mismatches"));
    }

    #[test]
    fn report_truncated_packet() {
        let p = predictor();
        let data = udp_frame();
        let packet = CapturedPacket {
            index: 7,
            linktype: Linktype::IPV4,
            caplen: data.len() as u32,
            origlen: 1500,
            data: &data,
        };
        let report = PacketReport::new(&p, &packet, None);
        assert!(report.truncated);
        assert!(matches!(report.outcome, Outcome::Predicted { .. }));

        let mut out = Vec::new();
        report.write(&mut out, false).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("7: 10.0.0.1:12345 -> 10.0.0.2:53"), "{text}");
        assert!(text.ends_with(" (truncated)\n"), "{text}");

        let mut out = Vec::new();
        report.write(&mut out, true).expect("write");
        let js: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(js["truncated"], true);

        // complete packets carry no flag
        let complete = CapturedPacket {
            origlen: data.len() as u32,
            ..packet
        };
        let report = PacketReport::new(&p, &complete, None);
        let mut out = Vec::new();
        report.write(&mut out, true).expect("write");
        let js: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert!(js.get("truncated").is_none());

        let mut summary = Summary::default();
        summary.add(&PacketReport::new(&p, &packet, None));
        summary.add(&report);
        assert_eq!(summary.truncated, 1);
        assert!(summary.to_string().starts_with("2 packets, 2 predicted, 0 skipped, 1 truncated"));
    }
}
