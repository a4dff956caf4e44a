//! Toeplitz (RSS) hash
//!
//! The hash is computed over an input tuple, one bit at a time (most significant bit
//! first). For each bit set in the input, the 32-bit window of the key starting at the
//! same bit offset is XORed into the result. The key must therefore hold at least
//! `input bits + 31` bits: a shorter key is an error, it is never padded or wrapped.

use crate::error::RssError;
use std::fmt;

/// Usual key size reported by devices.  It's OK for hardware to use only the
/// first 16 bytes, which is all that's required for IPv4.
pub const RSS_KEYSIZE: usize = 40;

// original Microsoft's key
#[rustfmt::skip]
pub const DEFAULT_KEY: [u8; RSS_KEYSIZE] = [
    0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2,
    0x41, 0x67, 0x25, 0x3d, 0x43, 0xa3, 0x8f, 0xb0,
    0xd0, 0xca, 0x2b, 0xcb, 0xae, 0x7b, 0x30, 0xb4,
    0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30, 0xf2, 0x0c,
    0x6a, 0x42, 0xb7, 0x3b, 0xbe, 0xac, 0x01, 0xfa,
];

// key from http://www.ndsl.kaist.edu/~shinae/papers/TR-symRSS.pdf
//
// Let’s assume we have a frame IP source: 1.1.1.1, IP destination: 2.2.2.2 and UDP port 22 to udp
// port 55. This means that the input for the hash function of the 4 tuples will be:
// [1.1.1.1][2.2.2.2][22][55] and for the opposite direction: [2.2.2.2][1.1.1.1][55][22]. To
// support the same hash value for these two inputs, the first 32bit of the key need to be
// identical to the second 32bit, and the 16bit afterwards should be identical to the next 16bit.
#[rustfmt::skip]
pub const SYMMETRIC_KEY: [u8; RSS_KEYSIZE] = [
    0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a,
    0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a,
    0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a,
    0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a,
    0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a, 0x6d, 0x5a,
];

#[inline]
fn check_lengths(key_len: usize, input_len: usize) -> Result<(), RssError> {
    if input_len == 0 {
        return Err(RssError::EmptyInput);
    }
    let key_bits = key_len.saturating_mul(8);
    let needed_bits = input_len.saturating_mul(8).saturating_add(31);
    if key_bits < needed_bits {
        return Err(RssError::KeyTooShort { key_len, input_len });
    }
    Ok(())
}

/// Toeplitz (RSS) hash algorithm
///
/// `data` is the input tuple in network byte order.
pub fn toeplitz_hash(key: &[u8], data: &[u8]) -> Result<u32, RssError> {
    check_lengths(key.len(), data.len())?;
    let mut hash: u32 = 0;
    let mut v = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
    for (i, &byte) in data.iter().enumerate() {
        // key.len() >= data.len() + 4, so key[i + 4] is always valid
        let next = key[i + 4];
        for b in 0..8 {
            if byte & (1 << (7 - b)) != 0 {
                hash ^= v;
            }
            v <<= 1;
            if next & (1 << (7 - b)) != 0 {
                v |= 1;
            }
        }
    }
    Ok(hash)
}

/// Toeplitz (RSS) hash algorithm, over 32-bit words in host order
///
/// This is the calling convention of `rte_softrss`: word `j` of the tuple holds bytes
/// `4j..4j+4` of the network-order tuple. The result is identical to
/// [`toeplitz_hash`] over the big-endian image of `input`.
pub fn toeplitz_hash_words(key: &[u8], input: &[u32]) -> Result<u32, RssError> {
    check_lengths(key.len(), input.len().saturating_mul(4))?;
    let key_word = |j: usize| u32::from_be_bytes([key[4 * j], key[4 * j + 1], key[4 * j + 2], key[4 * j + 3]]);
    let mut hash: u32 = 0;
    for (j, &word) in input.iter().enumerate() {
        let window = (u64::from(key_word(j)) << 32) | u64::from(key_word(j + 1));
        let mut map = word;
        while map != 0 {
            let i = map.trailing_zeros();
            hash ^= (window >> (i + 1)) as u32;
            // remove the least significant bit
            map &= map - 1;
        }
    }
    Ok(hash)
}

/// A validated RSS hash key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RssKey(Vec<u8>);

impl RssKey {
    /// Build a key from raw bytes. Empty keys are rejected.
    pub fn new<B: Into<Vec<u8>>>(bytes: B) -> Result<RssKey, RssError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(RssError::InvalidKey("empty key".to_owned()));
        }
        Ok(RssKey(bytes))
    }

    /// Parse a key written in hexadecimal
    ///
    /// Bytes may be separated by `:`, `-` or whitespace (`6d:5a:56:da`), or written as a
    /// single string (`6d5a56da`), optionally prefixed by `0x`.
    pub fn from_hex(s: &str) -> Result<RssKey, RssError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let digits: Vec<u8> = s
            .bytes()
            .filter(|c| !matches!(c, b':' | b'-' | b' ' | b'\t' | b'\n'))
            .collect();
        if digits.len() % 2 != 0 {
            return Err(RssError::InvalidKey(format!(
                "odd number of hex digits ({})",
                digits.len()
            )));
        }
        let bytes = digits
            .chunks(2)
            .map(|pair| {
                let hi = hex_value(pair[0])?;
                let lo = hex_value(pair[1])?;
                Ok((hi << 4) | lo)
            })
            .collect::<Result<Vec<u8>, RssError>>()?;
        RssKey::new(bytes)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Largest input tuple (in bytes) this key can hash
    pub fn max_input_len(&self) -> usize {
        self.0.len().saturating_sub(4)
    }

    pub fn hash(&self, input: &[u8]) -> Result<u32, RssError> {
        toeplitz_hash(&self.0, input)
    }

    pub fn hash_words(&self, input: &[u32]) -> Result<u32, RssError> {
        toeplitz_hash_words(&self.0, input)
    }
}

fn hex_value(c: u8) -> Result<u8, RssError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(RssError::InvalidKey(format!(
            "invalid hex digit '{}'",
            char::from(c)
        ))),
    }
}

impl Default for RssKey {
    fn default() -> Self {
        RssKey(DEFAULT_KEY.to_vec())
    }
}

impl AsRef<[u8]> for RssKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RssKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RssKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RssKey({self})")
    }
}
