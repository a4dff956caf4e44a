use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RssError {
    #[error("hash key too short: {key_len} bytes cannot cover {input_len} input bytes")]
    KeyTooShort { key_len: usize, input_len: usize },
    #[error("empty hash input")]
    EmptyInput,
    #[error("invalid hash key: {0}")]
    InvalidKey(String),
    #[error("malformed hash functions mask: unknown bits {0:#x}")]
    MalformedHashFunctions(u64),
    #[error("unknown hash function '{0}'")]
    UnknownHashFunction(String),
    #[error("no hashable field selected for this packet")]
    NoHashableFields,
    #[error("packet has no IP layer")]
    NoIpLayer,
    #[error("truncated {0} header")]
    Truncated(&'static str),
    #[error("device does not report a redirection table")]
    RetaUnsupported,
    #[error("invalid redirection table size {0} (must be a power of two)")]
    InvalidRetaSize(u32),
    #[error("invalid redirection table group size {0}")]
    InvalidRetaGroupSize(u32),
    #[error("redirection table index {index} out of bounds (table has {len} entries)")]
    RetaOutOfBounds { index: u32, len: usize },
    #[error("queue {queue} out of range (device has {nb_queues} queues)")]
    InvalidQueue { queue: u16, nb_queues: u16 },
    #[error("hash key length {got} does not match device key size {expected}")]
    KeyLengthMismatch { expected: usize, got: usize },
    #[error("{0} not supported by device")]
    Unsupported(&'static str),
    #[error("configuration error: {0}")]
    Config(String),
}
