use crate::capability::{negotiate_hash_functions, Capability, DeviceSnapshot, RssDevice};
use crate::error::RssError;
use crate::hash_functions::HashFunctions;
use crate::packet_fields::{extract_fields, LinkLayer, PacketFields};
use crate::reta::RedirectionTable;
use crate::toeplitz::RssKey;
use crate::tuple::{HashInput, SymmetricRule, TupleBuilder};
use crate::verify::{ExpectedTarget, Prediction};
use librss_tools::Config;

/// Predicts the RSS hash and receive queue of packets, for a fixed device state
#[derive(Clone, Debug)]
pub struct RssPredictor {
    key: RssKey,
    builder: TupleBuilder,
    reta: RedirectionTable,
    symmetric: Option<SymmetricRule>,
}

impl RssPredictor {
    pub fn new(
        key: RssKey,
        hash_functions: HashFunctions,
        reta: RedirectionTable,
        symmetric: Option<SymmetricRule>,
    ) -> Result<RssPredictor, RssError> {
        let builder = TupleBuilder::new(hash_functions)?.symmetric(symmetric);
        Ok(RssPredictor {
            key,
            builder,
            reta,
            symmetric,
        })
    }

    /// Build a predictor from the state of a device
    ///
    /// The hash functions used are the `requested` ones the device supports. A device
    /// that does not report its offloads is assumed to support all of them.
    pub fn from_device<D: RssDevice + ?Sized>(
        device: &D,
        requested: HashFunctions,
        symmetric: Option<SymmetricRule>,
    ) -> Result<RssPredictor, RssError> {
        let key = device.hash_key()?.require("hash key")?;
        let hash_functions = match device.hash_offloads()? {
            Capability::Supported(offloads) => {
                negotiate_hash_functions(offloads, requested)?.require("hash functions")?
            }
            Capability::Unsupported => requested,
        };
        let reta = device
            .redirection_table()?
            .supported()
            .ok_or(RssError::RetaUnsupported)?;
        debug!(
            "predictor: key {}, hash functions {}, RETA size {}, symmetric {:?}",
            key,
            hash_functions,
            reta.size(),
            symmetric
        );
        RssPredictor::new(key, hash_functions, reta, symmetric)
    }

    /// Build a predictor from the `[rss]` section of a configuration
    pub fn from_config(config: &Config) -> Result<RssPredictor, RssError> {
        let device = DeviceSnapshot::from_config(config)?;
        let symmetric = symmetric_rule_from_config(config)?;
        RssPredictor::from_device(&device, device.hash_functions(), symmetric)
    }

    pub fn key(&self) -> &RssKey {
        &self.key
    }

    pub fn hash_functions(&self) -> HashFunctions {
        self.builder.hash_functions()
    }

    pub fn reta(&self) -> &RedirectionTable {
        &self.reta
    }

    pub fn symmetric(&self) -> Option<SymmetricRule> {
        self.symmetric
    }

    /// Input tuples of a packet
    pub fn hash_input(&self, fields: &PacketFields) -> Result<HashInput, RssError> {
        self.builder.build(fields)
    }

    fn target(&self, input: &[u8]) -> Result<ExpectedTarget, RssError> {
        let hash = self.key.hash(input)?;
        let queue = self.reta.queue_for_hash(hash)?;
        Ok(ExpectedTarget { hash, queue })
    }

    /// Expected hash and queue of a packet
    pub fn predict(&self, fields: &PacketFields) -> Result<Prediction, RssError> {
        let input = self.hash_input(fields)?;
        let regular = self.target(&input.regular)?;
        let symmetric = match input.symmetric {
            Some(ref sym) => Some(self.target(sym)?),
            None => None,
        };
        trace!("{fields}: regular {regular:?} symmetric {symmetric:?}");
        Ok(Prediction { regular, symmetric })
    }

    /// Extract the fields of a raw packet, and predict its hash and queue
    pub fn predict_frame(
        &self,
        data: &[u8],
        link: LinkLayer,
    ) -> Result<(PacketFields, Prediction), RssError> {
        let fields = extract_fields(data, link)?;
        let prediction = self.predict(&fields)?;
        Ok((fields, prediction))
    }
}

/// Symmetric rule configured by `rss.symmetric`
///
/// The entry is either a boolean (`true` for the default rule) or one of `sort`,
/// `xor` and `none`.
pub fn symmetric_rule_from_config(config: &Config) -> Result<Option<SymmetricRule>, RssError> {
    if let Some(b) = config.get_bool("rss.symmetric") {
        return Ok(b.then(SymmetricRule::default));
    }
    match config.get("rss.symmetric") {
        None | Some("none") => Ok(None),
        Some(s) => s.parse().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_functions::L4Proto;
    use crate::packet_fields::tests::{ethernet, ipv4, tcp, udp};
    use crate::toeplitz::{DEFAULT_KEY, SYMMETRIC_KEY};
    use crate::verify::{verify, HashVariant, Observation, Verdict};
    use std::net::{IpAddr, Ipv4Addr};

    fn predictor(key: &[u8], symmetric: Option<SymmetricRule>) -> RssPredictor {
        RssPredictor::new(
            RssKey::new(key.to_vec()).expect("key"),
            HashFunctions::IP | HashFunctions::TCP | HashFunctions::UDP,
            RedirectionTable::with_default_spread(128, 4).expect("reta"),
            symmetric,
        )
        .expect("predictor")
    }

    fn reference_fields() -> PacketFields {
        PacketFields::new(
            IpAddr::V4(Ipv4Addr::new(66, 9, 149, 187)),
            IpAddr::V4(Ipv4Addr::new(161, 142, 100, 80)),
        )
        .with_ports(L4Proto::Tcp, 2794, 1766)
    }

    #[test]
    fn predict_reference_packet() {
        let p = predictor(&DEFAULT_KEY, None);
        let prediction = p.predict(&reference_fields()).expect("prediction");
        // 0x78 = 120, entry 120 of the default spread over 4 queues
        assert_eq!(
            prediction.regular,
            ExpectedTarget {
                hash: 0x51cc_c178,
                queue: 0
            }
        );
        assert_eq!(prediction.symmetric, None);
    }

    #[test]
    fn predict_frame_matches_fields() {
        let p = predictor(&DEFAULT_KEY, Some(SymmetricRule::Sort));
        let frame = ethernet(
            0x0800,
            &ipv4([66, 9, 149, 187], [161, 142, 100, 80], 6, 0, &tcp(2794, 1766)),
        );
        let (fields, prediction) = p.predict_frame(&frame, LinkLayer::Ethernet).expect("frame");
        assert_eq!(fields, reference_fields());
        assert_eq!(prediction, p.predict(&reference_fields()).expect("prediction"));
        assert!(prediction.symmetric.is_some());

        let raw = ipv4([199, 92, 111, 2], [65, 69, 140, 83], 17, 0, &udp(14230, 4739));
        let (_, prediction) = p.predict_frame(&raw, LinkLayer::RawIp).expect("frame");
        let fields = PacketFields::new(
            IpAddr::V4(Ipv4Addr::new(199, 92, 111, 2)),
            IpAddr::V4(Ipv4Addr::new(65, 69, 140, 83)),
        )
        .with_ports(L4Proto::Udp, 14230, 4739);
        let input = p.hash_input(&fields).expect("input");
        assert_eq!(prediction.regular.hash, p.key().hash(&input.regular).expect("hash"));

        assert_eq!(
            p.predict_frame(&ethernet(0x0806, &[0; 28]), LinkLayer::Ethernet),
            Err(RssError::NoIpLayer)
        );
    }

    #[test]
    fn predict_symmetric_both_directions() {
        for key in [&DEFAULT_KEY, &SYMMETRIC_KEY] {
            let p = predictor(key, Some(SymmetricRule::Sort));
            let fwd = p.predict(&reference_fields()).expect("prediction");
            let rev = p.predict(&reference_fields().reversed()).expect("prediction");
            assert_eq!(fwd.symmetric, rev.symmetric);
            // the reply, received on the symmetric queue, is a match
            let observed = Observation::new(fwd.symmetric.expect("symmetric").queue);
            assert!(verify(&rev, &observed).is_match());
        }
        // the symmetric key makes the regular hash symmetric too
        let p = predictor(&SYMMETRIC_KEY, None);
        let fwd = p.predict(&reference_fields()).expect("prediction");
        let rev = p.predict(&reference_fields().reversed()).expect("prediction");
        assert_eq!(fwd.regular, rev.regular);
        assert_eq!(
            verify(&rev, &Observation::with_hash(fwd.regular.queue, fwd.regular.hash)),
            Verdict::Match {
                variant: HashVariant::Regular
            }
        );
    }

    #[test]
    fn predict_key_too_short() {
        let p = predictor(&DEFAULT_KEY[..8], None);
        assert_eq!(
            p.predict(&reference_fields()),
            Err(RssError::KeyTooShort {
                key_len: 8,
                input_len: 12
            })
        );
    }

    #[test]
    fn predictor_from_device() {
        let device = DeviceSnapshot::new(4).expect("device");
        let p = RssPredictor::from_device(&device, HashFunctions::IP | HashFunctions::SCTP, None)
            .expect("predictor");
        assert_eq!(p.hash_functions(), HashFunctions::IP);
        assert_eq!(p.reta().size(), 128);

        let no_reta = device.clone().with_reta(None);
        assert_eq!(
            RssPredictor::from_device(&no_reta, HashFunctions::IP, None).err(),
            Some(RssError::RetaUnsupported)
        );
        let no_key = device.clone().with_key(None);
        assert_eq!(
            RssPredictor::from_device(&no_key, HashFunctions::IP, None).err(),
            Some(RssError::Unsupported("hash key"))
        );
        assert_eq!(
            RssPredictor::from_device(&device, HashFunctions::SCTP, None).err(),
            Some(RssError::Unsupported("hash functions"))
        );
        // offloads unknown: requested functions are used as is
        let unknown = device.with_hash_offloads(None);
        let p = RssPredictor::from_device(&unknown, HashFunctions::SCTP, None).expect("predictor");
        assert_eq!(p.hash_functions(), HashFunctions::SCTP);
    }

    #[test]
    fn predictor_from_config() {
        let mut config = Config::default();
        config
            .load_config(
                "[rss]\nnb_queues = 4\nreta = [3, 1, 2, 0]\nhash_functions = \"ipv4\"\nsymmetric = \"xor\"\n"
                    .as_bytes(),
            )
            .expect("config");
        let p = RssPredictor::from_config(&config).expect("predictor");
        assert_eq!(p.symmetric(), Some(SymmetricRule::Xor));
        assert_eq!(p.hash_functions(), HashFunctions::IPV4);
        let prediction = p.predict(&reference_fields()).expect("prediction");
        // IPv4 only: 0x323e8fc2 & 3 = 2, entry 2 is queue 2
        assert_eq!(prediction.regular, ExpectedTarget { hash: 0x323e_8fc2, queue: 2 });

        config.set("rss.symmetric", true);
        assert_eq!(symmetric_rule_from_config(&config), Ok(Some(SymmetricRule::Sort)));
        config.set("rss.symmetric", "none");
        assert_eq!(symmetric_rule_from_config(&config), Ok(None));
        config.set("rss.symmetric", "min");
        assert!(symmetric_rule_from_config(&config).is_err());
    }
}
