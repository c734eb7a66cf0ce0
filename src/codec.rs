//! Hashing and the fixed-width numeric codec.
//!
//! Every numeric field on the wire (amounts, heights, nonces) is a 32-byte
//! ASCII decimal string, zero-padded on the left. Arithmetic operates on that
//! encoding directly so the bytes that are hashed are exactly the bytes that
//! travel on the wire, independent of host integer width and endianness.

use crate::error::{ChainError, Result};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest.
pub type Hash32 = [u8; 32];

/// An opaque 32-byte account tag. Not a verified public key.
pub type Address = [u8; 32];

/// Width of every fixed-size field in the protocol.
pub const TAG_WIDTH: usize = 32;

/// Hash a byte buffer with SHA-256.
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn hash_to_string(hash: &Hash32) -> String {
    hex::encode(hash)
}

/// Genesis blocks carry an all-zero prior hash.
pub fn is_zero_hash(hash: &Hash32) -> bool {
    hash.iter().all(|b| *b == 0)
}

/// Short printable form of an address tag for logs.
pub fn tag_to_string(tag: &Address) -> String {
    hex::encode(&tag[..6])
}

/// Build an address tag from a CLI string: either 64 hex characters or an
/// arbitrary label left-aligned into the 32 bytes.
pub fn tag_from_str(s: &str) -> Address {
    let mut tag = [0u8; TAG_WIDTH];
    if s.len() == 2 * TAG_WIDTH {
        if let Ok(bytes) = hex::decode(s) {
            tag.copy_from_slice(&bytes);
            return tag;
        }
    }
    let bytes = s.as_bytes();
    let n = bytes.len().min(TAG_WIDTH);
    tag[..n].copy_from_slice(&bytes[..n]);
    tag
}

/// A fixed-width unsigned integer encoded as 32 ASCII decimal digits.
///
/// Comparison derives from the byte encoding: with a fixed width and leading
/// zeros, lexicographic order equals numeric order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Numeral([u8; TAG_WIDTH]);

impl Numeral {
    pub fn zero() -> Self {
        Numeral([b'0'; TAG_WIDTH])
    }

    pub fn one() -> Self {
        Self::from_u64(1)
    }

    pub fn from_u64(mut value: u64) -> Self {
        let mut digits = [b'0'; TAG_WIDTH];
        let mut i = TAG_WIDTH;
        loop {
            i -= 1;
            digits[i] = b'0' + (value % 10) as u8;
            value /= 10;
            if value == 0 {
                break;
            }
        }
        Numeral(digits)
    }

    /// Collapse to a native integer for in-memory indexing. Values that
    /// exceed `u64::MAX` (heights and nonces never do) wrap.
    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, d| {
            acc.wrapping_mul(10).wrapping_add(u64::from(d - b'0'))
        })
    }

    /// Decode a wire field, rejecting anything that is not 32 decimal digits.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TAG_WIDTH {
            return Err(ChainError::MalformedMessage(format!(
                "numeral field is {} bytes, expected {}",
                bytes.len(),
                TAG_WIDTH
            )));
        }
        let mut digits = [0u8; TAG_WIDTH];
        for (i, b) in bytes.iter().enumerate() {
            if !b.is_ascii_digit() {
                return Err(ChainError::MalformedMessage(
                    "numeral field contains a non-digit byte".to_string(),
                ));
            }
            digits[i] = *b;
        }
        Ok(Numeral(digits))
    }

    pub fn as_bytes(&self) -> &[u8; TAG_WIDTH] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|d| *d == b'0')
    }

    pub fn smaller_than(&self, other: &Numeral) -> bool {
        self < other
    }

    /// Digit-wise addition. A carry out of the most significant digit is
    /// dropped; 32 decimal digits comfortably exceed any balance or height
    /// this protocol produces.
    pub fn add(&self, other: &Numeral) -> Numeral {
        let mut out = [b'0'; TAG_WIDTH];
        let mut carry = 0u8;
        for i in (0..TAG_WIDTH).rev() {
            let sum = (self.0[i] - b'0') + (other.0[i] - b'0') + carry;
            out[i] = b'0' + sum % 10;
            carry = sum / 10;
        }
        Numeral(out)
    }

    /// Digit-wise subtraction. Precondition: `other <= self`; callers must
    /// check `smaller_than` first. Underflow is a logic error, not a
    /// recoverable condition.
    pub fn sub(&self, other: &Numeral) -> Numeral {
        debug_assert!(!self.smaller_than(other), "numeral subtraction underflow");
        let mut out = [b'0'; TAG_WIDTH];
        let mut borrow = 0i8;
        for i in (0..TAG_WIDTH).rev() {
            let mut diff = (self.0[i] as i8 - b'0' as i8) - (other.0[i] as i8 - b'0' as i8) - borrow;
            if diff < 0 {
                diff += 10;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out[i] = b'0' + diff as u8;
        }
        Numeral(out)
    }

    /// Add one in place-free form. Cheaper than `add` in the mining loop.
    pub fn incremented(&self) -> Numeral {
        let mut out = self.0;
        for i in (0..TAG_WIDTH).rev() {
            if out[i] == b'9' {
                out[i] = b'0';
            } else {
                out[i] += 1;
                break;
            }
        }
        Numeral(out)
    }
}

impl Default for Numeral {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Numeral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.iter().position(|d| *d != b'0') {
            Some(i) => write!(f, "{}", String::from_utf8_lossy(&self.0[i..])),
            None => write!(f, "0"),
        }
    }
}

impl fmt::Debug for Numeral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Numeral({self})")
    }
}
