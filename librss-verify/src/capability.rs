use crate::error::RssError;
use crate::hash_functions::HashFunctions;
use crate::reta::{RedirectionTable, RetaGroup};
use crate::toeplitz::{RssKey, RSS_KEYSIZE};
use librss_tools::Config;
use serde::Serialize;

/// Result of a device capability query
///
/// Queries return `Result<Capability<T>, RssError>`: a value, a device that does not
/// support the feature, or a failure to query it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Capability<T> {
    Supported(T),
    Unsupported,
}

impl<T> Capability<T> {
    #[inline]
    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported(_))
    }

    pub fn supported(self) -> Option<T> {
        match self {
            Capability::Supported(t) => Some(t),
            Capability::Unsupported => None,
        }
    }

    pub fn as_ref(&self) -> Capability<&T> {
        match self {
            Capability::Supported(t) => Capability::Supported(t),
            Capability::Unsupported => Capability::Unsupported,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Capability<U> {
        match self {
            Capability::Supported(t) => Capability::Supported(f(t)),
            Capability::Unsupported => Capability::Unsupported,
        }
    }

    /// Convert to a `Result`, `Unsupported` becoming an error naming `what`
    pub fn require(self, what: &'static str) -> Result<T, RssError> {
        self.supported().ok_or(RssError::Unsupported(what))
    }
}

impl<T> From<Option<T>> for Capability<T> {
    fn from(o: Option<T>) -> Self {
        match o {
            Some(t) => Capability::Supported(t),
            None => Capability::Unsupported,
        }
    }
}

/// RSS state of a device under test
pub trait RssDevice {
    /// Current hash key
    fn hash_key(&self) -> Result<Capability<RssKey>, RssError>;

    /// Current redirection table
    fn redirection_table(&self) -> Result<Capability<RedirectionTable>, RssError>;

    /// Hash functions supported by the device
    fn hash_offloads(&self) -> Result<Capability<HashFunctions>, RssError>;

    /// Number of configured receive queues
    fn nb_rx_queues(&self) -> Result<u16, RssError>;
}

/// Hash functions to use on a device: the requested ones it supports
///
/// Modifiers of `requested` are kept as is. If no requested hash function is
/// supported, the result is `Unsupported`.
pub fn negotiate_hash_functions(
    offloads: HashFunctions,
    requested: HashFunctions,
) -> Result<Capability<HashFunctions>, RssError> {
    let requested = requested.validate()?;
    let base = requested.base().intersection(offloads.base());
    if base.is_empty() {
        debug!("no requested hash function ({requested}) in device offloads ({offloads})");
        return Ok(Capability::Unsupported);
    }
    let dropped = requested.base().difference(base);
    if !dropped.is_empty() {
        debug!("hash functions not supported by device: {dropped}");
    }
    Ok(Capability::Supported(base | requested.modifiers()))
}

/// Default number of redirection table entries
pub const DEFAULT_RETA_SIZE: u32 = 128;

/// Static RSS state, built from values read from a device or from a configuration
#[derive(Clone, Debug)]
pub struct DeviceSnapshot {
    key: Option<RssKey>,
    reta: Option<RedirectionTable>,
    hash_offloads: Option<HashFunctions>,
    hash_functions: HashFunctions,
    nb_rx_queues: u16,
}

impl DeviceSnapshot {
    /// Snapshot with the default key and redirection table, and `IP|TCP|UDP` hash functions
    pub fn new(nb_rx_queues: u16) -> Result<DeviceSnapshot, RssError> {
        let reta = RedirectionTable::with_default_spread(DEFAULT_RETA_SIZE, nb_rx_queues)?;
        let hf = HashFunctions::IP | HashFunctions::TCP | HashFunctions::UDP;
        Ok(DeviceSnapshot {
            key: Some(RssKey::default()),
            reta: Some(reta),
            hash_offloads: Some(hf),
            hash_functions: hf,
            nb_rx_queues,
        })
    }

    pub fn with_key(mut self, key: Option<RssKey>) -> Self {
        self.key = key;
        self
    }

    pub fn with_reta(mut self, reta: Option<RedirectionTable>) -> Self {
        self.reta = reta;
        self
    }

    pub fn with_hash_offloads(mut self, hash_offloads: Option<HashFunctions>) -> Self {
        self.hash_offloads = hash_offloads;
        if let Some(offloads) = hash_offloads {
            self.hash_functions = self.hash_functions.intersection(offloads);
        }
        self
    }

    /// Build a snapshot from the `[rss]` section of a configuration
    ///
    /// Keys: `nb_queues` (default 1), `key` (hex, default key if absent), `key_size`
    /// (0 for a device without key), `hash_functions` (names, default `ip,tcp,udp`),
    /// `reta` (explicit entries) or `reta_size` (default spread, 0 for a device
    /// without redirection table).
    pub fn from_config(config: &Config) -> Result<DeviceSnapshot, RssError> {
        let nb_queues = config.get_usize("rss.nb_queues").unwrap_or(1);
        let nb_queues = u16::try_from(nb_queues)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| RssError::Config(format!("invalid rss.nb_queues {nb_queues}")))?;
        let mut snapshot = DeviceSnapshot::new(nb_queues)?;

        let key_size = config.get_usize("rss.key_size");
        snapshot.key = match (config.get("rss.key"), key_size) {
            (_, Some(0)) => None,
            (Some(hex), size) => {
                let key = RssKey::from_hex(hex)?;
                if let Some(expected) = size {
                    if key.len() != expected {
                        return Err(RssError::KeyLengthMismatch {
                            expected,
                            got: key.len(),
                        });
                    }
                }
                Some(key)
            }
            (None, Some(size)) if size != RSS_KEYSIZE => {
                return Err(RssError::Config(format!(
                    "rss.key_size is {size} but no rss.key is given"
                )));
            }
            (None, _) => Some(RssKey::default()),
        };

        if let Some(names) = config.get("rss.hash_functions") {
            let hf = HashFunctions::from_names(names)?;
            snapshot.hash_offloads = Some(hf);
            snapshot.hash_functions = hf;
        }

        snapshot.reta = match config.get_usize_array("rss.reta") {
            Some(entries) => {
                let entries = entries
                    .into_iter()
                    .map(|q| match u16::try_from(q) {
                        Ok(q) if q < nb_queues => Ok(q),
                        _ => Err(RssError::InvalidQueue {
                            queue: u16::try_from(q).unwrap_or(u16::MAX),
                            nb_queues,
                        }),
                    })
                    .collect::<Result<Vec<u16>, RssError>>()?;
                Some(RedirectionTable::from_entries(entries)?)
            }
            None => match config.get_usize("rss.reta_size") {
                Some(0) => None,
                Some(size) => {
                    let size = u32::try_from(size)
                        .map_err(|_| RssError::Config(format!("invalid rss.reta_size {size}")))?;
                    Some(RedirectionTable::with_default_spread(size, nb_queues)?)
                }
                None => snapshot.reta.take(),
            },
        };
        debug!(
            "device snapshot: {} queues, key {}, hash functions {}, RETA size {:?}",
            nb_queues,
            snapshot.key.as_ref().map_or("none".to_owned(), RssKey::to_string),
            snapshot.hash_functions,
            snapshot.reta.as_ref().map(RedirectionTable::size)
        );
        Ok(snapshot)
    }

    /// Active hash functions
    pub fn hash_functions(&self) -> HashFunctions {
        self.hash_functions
    }

    /// Change the hash configuration, as `rte_eth_dev_rss_hash_update` does
    ///
    /// A new key must have the same length as the current one. Hash functions must
    /// be supported by the device.
    pub fn update_hash_conf(
        &mut self,
        key: Option<RssKey>,
        hash_functions: HashFunctions,
    ) -> Result<(), RssError> {
        let hash_functions = hash_functions.validate()?;
        if let Some(offloads) = self.hash_offloads {
            let unsupported = hash_functions.base().difference(offloads);
            if !unsupported.is_empty() {
                warn!("hash functions {unsupported} not supported by device");
                return Err(RssError::Unsupported("hash functions"));
            }
        }
        if let Some(key) = key {
            let current = self.key.as_ref().ok_or(RssError::Unsupported("hash key"))?;
            if key.len() != current.len() {
                return Err(RssError::KeyLengthMismatch {
                    expected: current.len(),
                    got: key.len(),
                });
            }
            self.key = Some(key);
        }
        self.hash_functions = hash_functions;
        Ok(())
    }

    /// Update the redirection table, as `rte_eth_dev_rss_reta_update` does
    pub fn update_reta(&mut self, groups: &[RetaGroup]) -> Result<(), RssError> {
        let nb_queues = self.nb_rx_queues;
        self.reta
            .as_mut()
            .ok_or(RssError::RetaUnsupported)?
            .update(groups, Some(nb_queues))
    }
}

impl RssDevice for DeviceSnapshot {
    fn hash_key(&self) -> Result<Capability<RssKey>, RssError> {
        Ok(self.key.clone().into())
    }

    fn redirection_table(&self) -> Result<Capability<RedirectionTable>, RssError> {
        Ok(self.reta.clone().into())
    }

    fn hash_offloads(&self) -> Result<Capability<HashFunctions>, RssError> {
        Ok(self.hash_offloads.into())
    }

    fn nb_rx_queues(&self) -> Result<u16, RssError> {
        Ok(self.nb_rx_queues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toeplitz::SYMMETRIC_KEY;

    fn config(s: &str) -> Config {
        let mut config = Config::default();
        config.load_config(s.as_bytes()).expect("valid config");
        config
    }

    #[test]
    fn capability_helpers() {
        let c = Capability::Supported(4u16);
        assert!(c.is_supported());
        assert_eq!(c.as_ref().map(|v| v * 2), Capability::Supported(8));
        assert_eq!(c.require("queues"), Ok(4));
        let u: Capability<u16> = None.into();
        assert_eq!(u.require("RETA"), Err(RssError::Unsupported("RETA")));
    }

    #[test]
    fn negotiate() {
        let offloads = HashFunctions::IP | HashFunctions::NONFRAG_IPV4_TCP;
        let requested = HashFunctions::NONFRAG_IPV4_TCP
            | HashFunctions::NONFRAG_IPV4_UDP
            | HashFunctions::L3_SRC_ONLY;
        assert_eq!(
            negotiate_hash_functions(offloads, requested),
            Ok(Capability::Supported(
                HashFunctions::NONFRAG_IPV4_TCP | HashFunctions::L3_SRC_ONLY
            ))
        );
        assert_eq!(
            negotiate_hash_functions(offloads, HashFunctions::SCTP),
            Ok(Capability::Unsupported)
        );
        assert_eq!(
            negotiate_hash_functions(offloads, HashFunctions(1 << 22)),
            Err(RssError::MalformedHashFunctions(1 << 22))
        );
    }

    #[test]
    fn snapshot_defaults() {
        let dev = DeviceSnapshot::from_config(&Config::default()).expect("snapshot");
        assert_eq!(dev.nb_rx_queues(), Ok(1));
        assert_eq!(dev.hash_key(), Ok(Capability::Supported(RssKey::default())));
        let reta = dev.redirection_table().expect("query").require("RETA").expect("RETA");
        assert_eq!(reta.size(), DEFAULT_RETA_SIZE);
        assert_eq!(reta.queues(), vec![0]);
    }

    #[test]
    fn snapshot_from_config() {
        let dev = DeviceSnapshot::from_config(&config(
            r#"
            [rss]
            nb_queues = 4
            key = "6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a:6d:5a"
            key_size = 40
            hash_functions = "ipv4,nonfrag-ipv4-udp"
            reta = [3, 1, 2, 0]
            "#,
        ))
        .expect("snapshot");
        assert_eq!(dev.nb_rx_queues(), Ok(4));
        assert_eq!(
            dev.hash_key(),
            Ok(Capability::Supported(RssKey::new(SYMMETRIC_KEY.to_vec()).expect("key")))
        );
        assert_eq!(
            dev.hash_functions(),
            HashFunctions::IPV4 | HashFunctions::NONFRAG_IPV4_UDP
        );
        let reta = dev.redirection_table().expect("query").require("RETA").expect("RETA");
        assert_eq!(reta.entries(), &[3, 1, 2, 0]);
    }

    #[test]
    fn snapshot_config_errors() {
        let res = DeviceSnapshot::from_config(&config("[rss]\nkey = \"6d5a56da\"\nkey_size = 40\n"));
        assert_eq!(
            res.err(),
            Some(RssError::KeyLengthMismatch {
                expected: 40,
                got: 4
            })
        );
        let res = DeviceSnapshot::from_config(&config("[rss]\nnb_queues = 2\nreta = [0, 1, 2, 1]\n"));
        assert_eq!(res.err(), Some(RssError::InvalidQueue { queue: 2, nb_queues: 2 }));
        let res = DeviceSnapshot::from_config(&config("[rss]\nreta_size = 96\n"));
        assert_eq!(res.err(), Some(RssError::InvalidRetaSize(96)));
        let res = DeviceSnapshot::from_config(&config("[rss]\nhash_functions = \"ipv5\"\n"));
        assert_eq!(res.err(), Some(RssError::UnknownHashFunction("ipv5".to_owned())));
    }

    #[test]
    fn snapshot_unsupported() {
        let dev = DeviceSnapshot::from_config(&config("[rss]\nkey_size = 0\nreta_size = 0\n"))
            .expect("snapshot");
        assert_eq!(dev.hash_key(), Ok(Capability::Unsupported));
        assert_eq!(dev.redirection_table(), Ok(Capability::Unsupported));
    }

    #[test]
    fn snapshot_update_hash_conf() {
        let mut dev = DeviceSnapshot::new(4).expect("snapshot");
        let short = RssKey::new(vec![0x6d; 16]).expect("key");
        assert_eq!(
            dev.update_hash_conf(Some(short), HashFunctions::IP),
            Err(RssError::KeyLengthMismatch {
                expected: 40,
                got: 16
            })
        );
        assert_eq!(
            dev.update_hash_conf(None, HashFunctions::SCTP),
            Err(RssError::Unsupported("hash functions"))
        );
        let key = RssKey::new(SYMMETRIC_KEY.to_vec()).expect("key");
        dev.update_hash_conf(Some(key.clone()), HashFunctions::IPV4)
            .expect("update");
        assert_eq!(dev.hash_key(), Ok(Capability::Supported(key)));
        assert_eq!(dev.hash_functions(), HashFunctions::IPV4);
    }

    #[test]
    fn snapshot_update_reta() {
        let mut dev = DeviceSnapshot::new(2).expect("snapshot");
        let mut group = RetaGroup::default();
        group.set(0, 1);
        dev.update_reta(&[group]).expect("update");
        group.set(1, 2);
        assert_eq!(
            dev.update_reta(&[group]),
            Err(RssError::InvalidQueue { queue: 2, nb_queues: 2 })
        );
        let reta = dev.redirection_table().expect("query").require("RETA").expect("RETA");
        assert_eq!(&reta.entries()[..4], &[1, 1, 0, 1]);
    }
}
