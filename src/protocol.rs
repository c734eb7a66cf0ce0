//! Wire protocol: a single-byte opcode followed by a fixed-size payload.
//!
//! Every numeric field is a 32-byte decimal string, so message layouts are
//! identical across architectures. Block messages always carry exactly
//! `txs_per_block` transaction slots; unused slots are zeroed and a zero
//! sender tag marks padding. Both sides of a connection must therefore agree
//! on `txs_per_block` (it is part of network configuration, like difficulty).

use crate::block::{Block, BlockHeader, BLOCK_HEADER_WIRE_LEN};
use crate::codec::{Address, Hash32, Numeral, TAG_WIDTH};
use crate::error::{ChainError, Result};
use crate::transaction::{Transaction, TRANSACTION_WIRE_LEN};

pub const OPCODE_SEND_TRANSACTION: u8 = b'0';
pub const OPCODE_SEND_BLOCK: u8 = b'1';
pub const OPCODE_GET_BLOCK: u8 = b'2';
pub const OPCODE_GET_HASH: u8 = b'3';
pub const OPCODE_SEND_PORTS: u8 = b'4';

/// Listen port as 6 ASCII digits on the wire.
pub const PORT_FIELD_LEN: usize = 6;
pub const PEER_ENTRY_WIRE_LEN: usize = PORT_FIELD_LEN + TAG_WIDTH;

pub fn block_wire_len(txs_per_block: usize) -> usize {
    BLOCK_HEADER_WIRE_LEN + txs_per_block * TRANSACTION_WIRE_LEN
}

/// One entry of the bootstrap port exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEntry {
    pub port: u16,
    pub node_tag: Address,
}

impl PeerEntry {
    pub fn pack(&self) -> [u8; PEER_ENTRY_WIRE_LEN] {
        let mut out = [0u8; PEER_ENTRY_WIRE_LEN];
        let digits = format!("{:06}", self.port);
        out[..PORT_FIELD_LEN].copy_from_slice(digits.as_bytes());
        out[PORT_FIELD_LEN..].copy_from_slice(&self.node_tag);
        out
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PEER_ENTRY_WIRE_LEN {
            return Err(ChainError::MalformedMessage(format!(
                "peer entry is {} bytes, expected {}",
                bytes.len(),
                PEER_ENTRY_WIRE_LEN
            )));
        }
        let digits = std::str::from_utf8(&bytes[..PORT_FIELD_LEN])
            .map_err(|_| ChainError::MalformedMessage("port field is not ASCII".to_string()))?;
        let port: u32 = digits
            .parse()
            .map_err(|_| ChainError::MalformedMessage("port field is not numeric".to_string()))?;
        if port > u32::from(u16::MAX) {
            return Err(ChainError::MalformedMessage(format!(
                "port {port} out of range"
            )));
        }
        let mut node_tag = [0u8; TAG_WIDTH];
        node_tag.copy_from_slice(&bytes[PORT_FIELD_LEN..]);
        Ok(PeerEntry {
            port: port as u16,
            node_tag,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// New transaction announcement.
    Transaction(Transaction),
    /// New or candidate block.
    Block(Block),
    /// Request the full block at a height.
    GetBlock(Numeral),
    /// Request the block hash at a height.
    GetHash(Numeral),
    /// Bootstrap peer/port exchange; count-prefixed entry list.
    Ports(Vec<PeerEntry>),
}

impl Message {
    pub fn opcode(&self) -> u8 {
        match self {
            Message::Transaction(_) => OPCODE_SEND_TRANSACTION,
            Message::Block(_) => OPCODE_SEND_BLOCK,
            Message::GetBlock(_) => OPCODE_GET_BLOCK,
            Message::GetHash(_) => OPCODE_GET_HASH,
            Message::Ports(_) => OPCODE_SEND_PORTS,
        }
    }

    /// Frame the message: opcode byte followed by the fixed payload.
    pub fn encode(&self, txs_per_block: usize) -> Vec<u8> {
        let mut out = vec![self.opcode()];
        match self {
            Message::Transaction(tx) => out.extend_from_slice(&tx.pack()),
            Message::Block(block) => {
                debug_assert!(block.transactions.len() <= txs_per_block);
                out.extend_from_slice(block.header.nonce.as_bytes());
                out.extend_from_slice(&block.header.prior_hash);
                out.extend_from_slice(&block.header.hash);
                out.extend_from_slice(block.header.height.as_bytes());
                out.extend_from_slice(&block.header.miner);
                for tx in block.transactions.iter().take(txs_per_block) {
                    out.extend_from_slice(&tx.pack());
                }
                let padding = txs_per_block.saturating_sub(block.transactions.len());
                out.extend(std::iter::repeat(0u8).take(padding * TRANSACTION_WIRE_LEN));
            }
            Message::GetBlock(height) | Message::GetHash(height) => {
                out.extend_from_slice(height.as_bytes())
            }
            Message::Ports(entries) => {
                out.extend_from_slice(Numeral::from_u64(entries.len() as u64).as_bytes());
                for entry in entries {
                    out.extend_from_slice(&entry.pack());
                }
            }
        }
        out
    }

    /// Decode an already-framed payload for the given opcode.
    pub fn decode(opcode: u8, payload: &[u8], txs_per_block: usize) -> Result<Message> {
        match opcode {
            OPCODE_SEND_TRANSACTION => Ok(Message::Transaction(Transaction::unpack(payload)?)),
            OPCODE_SEND_BLOCK => Ok(Message::Block(decode_block(payload, txs_per_block)?)),
            OPCODE_GET_BLOCK => Ok(Message::GetBlock(Numeral::from_bytes(payload)?)),
            OPCODE_GET_HASH => Ok(Message::GetHash(Numeral::from_bytes(payload)?)),
            OPCODE_SEND_PORTS => Ok(Message::Ports(decode_ports(payload)?)),
            other => Err(ChainError::MalformedMessage(format!(
                "unknown opcode {other:#04x}"
            ))),
        }
    }
}

fn decode_block(payload: &[u8], txs_per_block: usize) -> Result<Block> {
    let expected = block_wire_len(txs_per_block);
    if payload.len() != expected {
        return Err(ChainError::MalformedMessage(format!(
            "block payload is {} bytes, expected {}",
            payload.len(),
            expected
        )));
    }
    let nonce = Numeral::from_bytes(&payload[..TAG_WIDTH])?;
    let mut prior_hash: Hash32 = [0u8; 32];
    prior_hash.copy_from_slice(&payload[TAG_WIDTH..2 * TAG_WIDTH]);
    let mut hash: Hash32 = [0u8; 32];
    hash.copy_from_slice(&payload[2 * TAG_WIDTH..3 * TAG_WIDTH]);
    let height = Numeral::from_bytes(&payload[3 * TAG_WIDTH..4 * TAG_WIDTH])?;
    let mut miner: Address = [0u8; TAG_WIDTH];
    miner.copy_from_slice(&payload[4 * TAG_WIDTH..5 * TAG_WIDTH]);

    let mut transactions = Vec::new();
    for slot in payload[BLOCK_HEADER_WIRE_LEN..].chunks_exact(TRANSACTION_WIRE_LEN) {
        // A zero sender tag marks an unused padding slot.
        if slot[..TAG_WIDTH].iter().all(|b| *b == 0) {
            continue;
        }
        transactions.push(Transaction::unpack(slot)?);
    }

    Ok(Block {
        header: BlockHeader {
            nonce,
            prior_hash,
            hash,
            height,
            miner,
        },
        transactions,
    })
}

fn decode_ports(payload: &[u8]) -> Result<Vec<PeerEntry>> {
    if payload.len() < TAG_WIDTH {
        return Err(ChainError::MalformedMessage(
            "ports payload shorter than its count prefix".to_string(),
        ));
    }
    let count = Numeral::from_bytes(&payload[..TAG_WIDTH])?.to_u64() as usize;
    let body = &payload[TAG_WIDTH..];
    if body.len() != count * PEER_ENTRY_WIRE_LEN {
        return Err(ChainError::MalformedMessage(format!(
            "ports payload is {} bytes, expected {} entries",
            body.len(),
            count
        )));
    }
    body.chunks_exact(PEER_ENTRY_WIRE_LEN)
        .map(PeerEntry::unpack)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tag_from_str;

    const TXS_PER_BLOCK: usize = 4;

    fn round_trip(msg: Message) -> Message {
        let frame = msg.encode(TXS_PER_BLOCK);
        Message::decode(frame[0], &frame[1..], TXS_PER_BLOCK).unwrap()
    }

    #[test]
    fn test_transaction_round_trip() {
        let tx = Transaction::new(
            tag_from_str("alice"),
            tag_from_str("bob"),
            Numeral::from_u64(5),
        );
        assert_eq!(round_trip(Message::Transaction(tx)), Message::Transaction(tx));
    }

    #[test]
    fn test_block_round_trip_skips_padding() {
        let tx = Transaction::new(
            tag_from_str("alice"),
            tag_from_str("bob"),
            Numeral::from_u64(5),
        );
        let block = Block::new(
            Numeral::from_u64(3),
            [0xCD; 32],
            tag_from_str("miner"),
            vec![tx],
        );
        let frame = Message::Block(block.clone()).encode(TXS_PER_BLOCK);
        assert_eq!(frame.len(), 1 + block_wire_len(TXS_PER_BLOCK));

        match Message::decode(frame[0], &frame[1..], TXS_PER_BLOCK).unwrap() {
            Message::Block(decoded) => {
                assert_eq!(decoded.transactions.len(), 1);
                assert_eq!(decoded, block);
            }
            other => panic!("expected a block, got {other:?}"),
        }
    }

    #[test]
    fn test_height_request_round_trip() {
        let h = Numeral::from_u64(42);
        assert_eq!(round_trip(Message::GetHash(h)), Message::GetHash(h));
        assert_eq!(round_trip(Message::GetBlock(h)), Message::GetBlock(h));
    }

    #[test]
    fn test_ports_round_trip() {
        let entries = vec![
            PeerEntry {
                port: 8444,
                node_tag: tag_from_str("a"),
            },
            PeerEntry {
                port: 65535,
                node_tag: tag_from_str("b"),
            },
        ];
        assert_eq!(
            round_trip(Message::Ports(entries.clone())),
            Message::Ports(entries)
        );
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert!(Message::decode(b'9', &[], TXS_PER_BLOCK).is_err());
    }

    #[test]
    fn test_truncated_block_rejected() {
        let block = Block::new(Numeral::zero(), [0u8; 32], tag_from_str("m"), vec![]);
        let frame = Message::Block(block).encode(TXS_PER_BLOCK);
        assert!(Message::decode(frame[0], &frame[1..frame.len() - 1], TXS_PER_BLOCK).is_err());
    }
}
