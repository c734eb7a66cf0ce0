//! Transfer transactions.
//!
//! A transaction moves an amount between two opaque address tags. There is no
//! signature field: the protocol does not authenticate senders, by design.

use crate::codec::{sha256, Address, Hash32, Numeral, TAG_WIDTH};
use crate::error::{ChainError, Result};

/// Packed wire size: sender, receiver, amount, timestamp.
pub const TRANSACTION_WIRE_LEN: usize = 4 * TAG_WIDTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub sender: Address,
    pub receiver: Address,
    pub amount: Numeral,
    pub timestamp: Numeral,
}

impl Transaction {
    pub fn new(sender: Address, receiver: Address, amount: Numeral) -> Self {
        let timestamp = Numeral::from_u64(chrono::Utc::now().timestamp_millis() as u64);
        Transaction {
            sender,
            receiver,
            amount,
            timestamp,
        }
    }

    /// Identity is the content hash of the packed form.
    pub fn hash(&self) -> Hash32 {
        sha256(&self.pack())
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash())
    }

    pub fn pack(&self) -> [u8; TRANSACTION_WIRE_LEN] {
        let mut out = [0u8; TRANSACTION_WIRE_LEN];
        out[..TAG_WIDTH].copy_from_slice(&self.sender);
        out[TAG_WIDTH..2 * TAG_WIDTH].copy_from_slice(&self.receiver);
        out[2 * TAG_WIDTH..3 * TAG_WIDTH].copy_from_slice(self.amount.as_bytes());
        out[3 * TAG_WIDTH..].copy_from_slice(self.timestamp.as_bytes());
        out
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TRANSACTION_WIRE_LEN {
            return Err(ChainError::MalformedMessage(format!(
                "transaction payload is {} bytes, expected {}",
                bytes.len(),
                TRANSACTION_WIRE_LEN
            )));
        }
        let mut sender = [0u8; TAG_WIDTH];
        let mut receiver = [0u8; TAG_WIDTH];
        sender.copy_from_slice(&bytes[..TAG_WIDTH]);
        receiver.copy_from_slice(&bytes[TAG_WIDTH..2 * TAG_WIDTH]);
        let amount = Numeral::from_bytes(&bytes[2 * TAG_WIDTH..3 * TAG_WIDTH])?;
        let timestamp = Numeral::from_bytes(&bytes[3 * TAG_WIDTH..])?;
        Ok(Transaction {
            sender,
            receiver,
            amount,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tag_from_str;

    #[test]
    fn test_pack_unpack_round_trip() {
        let tx = Transaction::new(
            tag_from_str("alice"),
            tag_from_str("bob"),
            Numeral::from_u64(42),
        );
        let packed = tx.pack();
        assert_eq!(packed.len(), TRANSACTION_WIRE_LEN);
        assert_eq!(Transaction::unpack(&packed).unwrap(), tx);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = Transaction::new(tag_from_str("alice"), tag_from_str("bob"), Numeral::from_u64(1));
        let mut b = a;
        b.amount = Numeral::from_u64(2);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.hash());
    }

    #[test]
    fn test_unpack_rejects_bad_amount() {
        let tx = Transaction::new(tag_from_str("alice"), tag_from_str("bob"), Numeral::zero());
        let mut packed = tx.pack().to_vec();
        packed[2 * TAG_WIDTH] = b'-';
        assert!(Transaction::unpack(&packed).is_err());
        assert!(Transaction::unpack(&packed[..100]).is_err());
    }
}
