use serde::Serialize;
use std::fmt;

/// Which input tuple a prediction was computed from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashVariant {
    Regular,
    Symmetric,
}

impl fmt::Display for HashVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HashVariant::Regular => f.write_str("regular"),
            HashVariant::Symmetric => f.write_str("symmetric"),
        }
    }
}

/// Expected hash value and receive queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ExpectedTarget {
    pub hash: u32,
    pub queue: u16,
}

/// Expected targets of a packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Prediction {
    pub regular: ExpectedTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symmetric: Option<ExpectedTarget>,
}

impl Prediction {
    /// Target of a variant, if predicted
    pub fn target(&self, variant: HashVariant) -> Option<ExpectedTarget> {
        match variant {
            HashVariant::Regular => Some(self.regular),
            HashVariant::Symmetric => self.symmetric,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "hash 0x{:08x} queue {}",
            self.regular.hash, self.regular.queue
        )?;
        if let Some(sym) = self.symmetric {
            write!(f, " (symmetric: hash 0x{:08x} queue {})", sym.hash, sym.queue)?;
        }
        Ok(())
    }
}

/// Where a packet was actually received
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub queue: u16,
    /// RSS hash reported by the device in the packet metadata, if available
    pub hash: Option<u32>,
}

impl Observation {
    pub fn new(queue: u16) -> Self {
        Observation { queue, hash: None }
    }

    pub fn with_hash(queue: u16, hash: u32) -> Self {
        Observation {
            queue,
            hash: Some(hash),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub expected: Prediction,
    pub observed: Observation,
    /// Queues the packet was found on during diagnostics, if a scan was done
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landed_on: Option<Vec<u16>>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "expected {}, received on queue {}",
            self.expected, self.observed.queue
        )?;
        if let Some(hash) = self.observed.hash {
            write!(f, " with hash 0x{hash:08x}")?;
        }
        match self.landed_on.as_deref() {
            Some([]) => f.write_str(", not found on any queue")?,
            Some(queues) => write!(f, ", found on queues {queues:?}")?,
            None => (),
        }
        Ok(())
    }
}

/// Outcome of the comparison of a prediction and an observation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Verdict {
    Match { variant: HashVariant },
    Mismatch(Mismatch),
}

impl Verdict {
    #[inline]
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Match { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verdict::Match { variant } => write!(f, "match ({variant})"),
            Verdict::Mismatch(m) => write!(f, "MISMATCH: {m}"),
        }
    }
}

fn target_matches(target: ExpectedTarget, observed: &Observation) -> bool {
    target.queue == observed.queue && observed.hash.map_or(true, |h| h == target.hash)
}

/// Compare an observation to a prediction
///
/// The regular target is checked first, then the symmetric one. A target matches if
/// the queue is the same and, when the device reported a hash, the hash is the same.
pub fn verify(prediction: &Prediction, observed: &Observation) -> Verdict {
    for variant in [HashVariant::Regular, HashVariant::Symmetric] {
        if let Some(target) = prediction.target(variant) {
            if target_matches(target, observed) {
                return Verdict::Match { variant };
            }
        }
    }
    debug!("mismatch: expected {prediction}, observed {observed:?}");
    Verdict::Mismatch(Mismatch {
        expected: *prediction,
        observed: *observed,
        landed_on: None,
    })
}

/// Check whether the test packet was received on a queue
pub trait QueueProbe {
    type Error: fmt::Display;

    fn probe(&mut self, queue: u16) -> Result<bool, Self::Error>;
}

impl<F, E> QueueProbe for F
where
    F: FnMut(u16) -> Result<bool, E>,
    E: fmt::Display,
{
    type Error = E;

    fn probe(&mut self, queue: u16) -> Result<bool, E> {
        self(queue)
    }
}

/// Find the queues a packet landed on, probing queues `0..nb_queues`
///
/// Diagnostics are best effort: probe failures are logged and the queue is skipped.
pub fn diagnose<P: QueueProbe + ?Sized>(probe: &mut P, nb_queues: u16) -> Vec<u16> {
    let mut found = Vec::new();
    for queue in 0..nb_queues {
        match probe.probe(queue) {
            Ok(true) => found.push(queue),
            Ok(false) => (),
            Err(e) => warn!("diagnostics: could not probe queue {queue}: {e}"),
        }
    }
    found
}

/// Compare an observation to a prediction, and on mismatch scan all queues to report
/// where the packet actually landed
pub fn verify_with_diagnostics<P: QueueProbe + ?Sized>(
    prediction: &Prediction,
    observed: &Observation,
    probe: &mut P,
    nb_queues: u16,
) -> Verdict {
    match verify(prediction, observed) {
        Verdict::Mismatch(mut m) => {
            let queues = diagnose(probe, nb_queues);
            info!("packet found on queues {queues:?}");
            m.landed_on = Some(queues);
            Verdict::Mismatch(m)
        }
        verdict => verdict,
    }
}
