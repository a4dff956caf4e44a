use crate::error::RssError;
use serde::Serialize;
use std::fmt;

/// Number of entries in one redirection table group (`RTE_ETH_RETA_GROUP_SIZE`)
pub const RETA_GROUP_SIZE: usize = 64;

/// One group of redirection table entries, as exchanged with a device
///
/// Only entries whose bit is set in `mask` are meaningful (for an update, only these
/// entries are written).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetaGroup {
    pub mask: u64,
    pub reta: [u16; RETA_GROUP_SIZE],
}

impl Default for RetaGroup {
    fn default() -> Self {
        RetaGroup {
            mask: 0,
            reta: [0; RETA_GROUP_SIZE],
        }
    }
}

impl RetaGroup {
    /// Set entry `pos` to `queue`, and mark it in the mask
    pub fn set(&mut self, pos: usize, queue: u16) {
        if pos < RETA_GROUP_SIZE {
            self.reta[pos] = queue;
            self.mask |= 1 << pos;
        }
    }
}

impl AsRef<[u16]> for RetaGroup {
    fn as_ref(&self) -> &[u16] {
        &self.reta
    }
}

/// Queue expected for `hash`
///
/// `reta` is the redirection table as a list of groups of `group_size` entries, of
/// which the first `reta_size` are used. The entry is selected by the low bits of the
/// hash: `index = hash & (reta_size - 1)`.
pub fn expected_queue<G: AsRef<[u16]>>(
    hash: u32,
    reta: &[G],
    group_size: u32,
    reta_size: u32,
) -> Result<u16, RssError> {
    if reta_size == 0 {
        return Err(RssError::RetaUnsupported);
    }
    if !reta_size.is_power_of_two() {
        return Err(RssError::InvalidRetaSize(reta_size));
    }
    if group_size == 0 {
        return Err(RssError::InvalidRetaGroupSize(group_size));
    }
    let index = hash & (reta_size - 1);
    let group = (index / group_size) as usize;
    let pos = (index % group_size) as usize;
    reta.get(group)
        .and_then(|g| g.as_ref().get(pos))
        .copied()
        .ok_or_else(|| RssError::RetaOutOfBounds {
            index,
            len: reta
                .iter()
                .map(|g| g.as_ref().len().min(group_size as usize))
                .sum(),
        })
}

/// Redirection table of a device
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RedirectionTable {
    entries: Vec<u16>,
    group_size: u32,
}

impl RedirectionTable {
    /// Table of `size` entries, all pointing to queue 0
    pub fn new(size: u32, group_size: u32) -> Result<RedirectionTable, RssError> {
        check_size(size)?;
        if group_size == 0 {
            return Err(RssError::InvalidRetaGroupSize(group_size));
        }
        Ok(RedirectionTable {
            entries: vec![0; size as usize],
            group_size,
        })
    }

    /// Table spreading entries over queues in round-robin order (entry `i` is queue
    /// `i % nb_queues`), the default programmed by DPDK at device configuration
    pub fn with_default_spread(size: u32, nb_queues: u16) -> Result<RedirectionTable, RssError> {
        if nb_queues == 0 {
            return Err(RssError::InvalidQueue {
                queue: 0,
                nb_queues,
            });
        }
        let mut table = RedirectionTable::new(size, RETA_GROUP_SIZE as u32)?;
        for (i, e) in table.entries.iter_mut().enumerate() {
            *e = (i % nb_queues as usize) as u16;
        }
        Ok(table)
    }

    /// Table with the given entries, in groups of `RETA_GROUP_SIZE`
    pub fn from_entries<V: Into<Vec<u16>>>(entries: V) -> Result<RedirectionTable, RssError> {
        let entries = entries.into();
        let size = u32::try_from(entries.len()).map_err(|_| RssError::InvalidRetaSize(u32::MAX))?;
        check_size(size)?;
        Ok(RedirectionTable {
            entries,
            group_size: RETA_GROUP_SIZE as u32,
        })
    }

    /// Use `group_size` entries per group for lookups
    pub fn with_group_size(mut self, group_size: u32) -> Result<RedirectionTable, RssError> {
        if group_size == 0 {
            return Err(RssError::InvalidRetaGroupSize(group_size));
        }
        self.group_size = group_size;
        Ok(self)
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    #[inline]
    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    pub fn entry(&self, index: usize) -> Option<u16> {
        self.entries.get(index).copied()
    }

    pub fn entries(&self) -> &[u16] {
        &self.entries
    }

    /// Entries, split in groups of `group_size`
    pub fn groups(&self) -> Vec<&[u16]> {
        self.entries.chunks(self.group_size as usize).collect()
    }

    /// Queue a packet with hash `hash` is expected to be delivered to
    pub fn queue_for_hash(&self, hash: u32) -> Result<u16, RssError> {
        expected_queue(hash, &self.groups(), self.group_size, self.size())
    }

    /// Distinct queues referenced by the table, in ascending order
    pub fn queues(&self) -> Vec<u16> {
        let mut v = self.entries.clone();
        v.sort_unstable();
        v.dedup();
        v
    }

    /// Apply a device update: only entries selected by each group's mask are written
    ///
    /// If `nb_queues` is given, queues must be lower than it. The update is checked
    /// completely before being applied, so the table is unchanged on error.
    pub fn update(&mut self, groups: &[RetaGroup], nb_queues: Option<u16>) -> Result<(), RssError> {
        let mut writes = Vec::new();
        for (gi, group) in groups.iter().enumerate() {
            for pos in (0..RETA_GROUP_SIZE).filter(|pos| group.mask & (1 << pos) != 0) {
                let index = gi * RETA_GROUP_SIZE + pos;
                if index >= self.entries.len() {
                    return Err(RssError::RetaOutOfBounds {
                        index: index as u32,
                        len: self.entries.len(),
                    });
                }
                let queue = group.reta[pos];
                if let Some(nb_queues) = nb_queues {
                    if queue >= nb_queues {
                        return Err(RssError::InvalidQueue { queue, nb_queues });
                    }
                }
                writes.push((index, queue));
            }
        }
        debug!("RETA update: {} entries", writes.len());
        for (index, queue) in writes {
            self.entries[index] = queue;
        }
        Ok(())
    }

    /// Table as device groups, all entries selected
    pub fn to_reta_groups(&self) -> Vec<RetaGroup> {
        self.entries
            .chunks(RETA_GROUP_SIZE)
            .map(|chunk| {
                let mut group = RetaGroup::default();
                for (pos, queue) in chunk.iter().enumerate() {
                    group.set(pos, *queue);
                }
                group
            })
            .collect()
    }
}

fn check_size(size: u32) -> Result<(), RssError> {
    if size == 0 {
        Err(RssError::RetaUnsupported)
    } else if !size.is_power_of_two() {
        Err(RssError::InvalidRetaSize(size))
    } else {
        Ok(())
    }
}

impl fmt::Display for RedirectionTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RETA[{}]", self.entries.len())?;
        for (i, chunk) in self.entries.chunks(16).enumerate() {
            write!(f, "\n  {:4}:", i * 16)?;
            for q in chunk {
                write!(f, " {q:3}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn reta_lookup_group_of_one() {
        let reta: Vec<[u16; 1]> = vec![[3], [1], [2], [0]];
        assert_eq!(expected_queue(6, &reta, 1, 4), Ok(2));
        assert_eq!(expected_queue(0, &reta, 1, 4), Ok(3));
        assert_eq!(expected_queue(u32::MAX, &reta, 1, 4), Ok(0));
    }

    #[test]
    fn reta_lookup_errors() {
        let reta = [RetaGroup::default()];
        assert_eq!(expected_queue(1, &reta, 64, 0), Err(RssError::RetaUnsupported));
        assert_eq!(expected_queue(1, &reta, 64, 48), Err(RssError::InvalidRetaSize(48)));
        assert_eq!(expected_queue(1, &reta, 0, 64), Err(RssError::InvalidRetaGroupSize(0)));
        // device reports 128 entries, only one group read back
        assert_eq!(
            expected_queue(100, &reta, 64, 128),
            Err(RssError::RetaOutOfBounds { index: 100, len: 64 })
        );
        assert!(expected_queue(63, &reta, 64, 128).is_ok());
    }

    #[test]
    fn reta_round_trip() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5245_5441);
        for reta_size in [1u32, 2, 4, 64, 128, 512] {
            let entries: Vec<u16> = (0..reta_size).map(|_| rng.random_range(0..16)).collect();
            let table = RedirectionTable::from_entries(entries.clone()).expect("table");
            let groups = table.to_reta_groups();
            for hash in (0..256)
                .map(|_| rng.random::<u32>())
                .chain([0, u32::MAX, reta_size - 1, reta_size])
            {
                let index = (hash & (reta_size - 1)) as usize;
                assert_eq!(table.queue_for_hash(hash), Ok(entries[index]));
                assert_eq!(
                    expected_queue(hash, &groups, RETA_GROUP_SIZE as u32, reta_size),
                    Ok(entries[index])
                );
            }
        }
    }

    #[test]
    fn reta_group_size() {
        let table = RedirectionTable::from_entries(vec![3, 1, 2, 0])
            .and_then(|t| t.with_group_size(1))
            .expect("table");
        assert_eq!(table.groups().len(), 4);
        assert_eq!(table.queue_for_hash(6), Ok(2));
        assert!(RedirectionTable::from_entries(vec![0; 4])
            .and_then(|t| t.with_group_size(0))
            .is_err());
    }

    #[test]
    fn reta_default_spread() {
        let table = RedirectionTable::with_default_spread(128, 3).expect("table");
        assert_eq!(table.size(), 128);
        assert_eq!(table.entry(0), Some(0));
        assert_eq!(table.entry(4), Some(1));
        assert_eq!(table.entry(127), Some(1));
        assert_eq!(table.entry(128), None);
        assert_eq!(table.queues(), vec![0, 1, 2]);
        assert!(RedirectionTable::with_default_spread(128, 0).is_err());
        assert_eq!(
            RedirectionTable::with_default_spread(100, 4),
            Err(RssError::InvalidRetaSize(100))
        );
    }

    #[test]
    fn reta_update_masked() {
        let mut table = RedirectionTable::with_default_spread(128, 4).expect("table");
        let mut groups = [RetaGroup::default(); 2];
        groups[0].set(1, 7);
        groups[1].set(63, 5);
        // not in mask, ignored
        groups[1].reta[0] = 6;
        table.update(&groups, Some(8)).expect("update");
        assert_eq!(table.entry(0), Some(0));
        assert_eq!(table.entry(1), Some(7));
        assert_eq!(table.entry(64), Some(0));
        assert_eq!(table.entry(127), Some(5));

        // rejected updates leave the table unchanged
        let before = table.clone();
        let mut bad = [RetaGroup::default(); 2];
        bad[0].set(0, 1);
        bad[1].set(0, 9);
        assert_eq!(
            table.update(&bad, Some(8)),
            Err(RssError::InvalidQueue { queue: 9, nb_queues: 8 })
        );
        let mut beyond = [RetaGroup::default(); 3];
        beyond[2].set(0, 1);
        assert_eq!(
            table.update(&beyond, None),
            Err(RssError::RetaOutOfBounds { index: 128, len: 128 })
        );
        assert_eq!(table, before);
    }

    #[test]
    fn reta_to_groups() {
        let table = RedirectionTable::from_entries(vec![3, 1, 2, 0]).expect("table");
        let groups = table.to_reta_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].mask, 0b1111);
        assert_eq!(&groups[0].reta[..4], &[3, 1, 2, 0]);
        let mut copy = RedirectionTable::new(4, 64).expect("table");
        copy.update(&groups, None).expect("update");
        assert_eq!(copy, table);
        assert_eq!(RedirectionTable::new(0, 64), Err(RssError::RetaUnsupported));
    }
}
