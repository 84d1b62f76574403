use crate::fingerprint::{Hash, ZERO_HASH};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub prev_block_hash: Hash,
    pub tx_root: Hash,
    pub timestamp_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Stored record bytes, in commit order.
    #[serde(serialize_with = "ser_txs", deserialize_with = "de_txs")]
    pub txs: Vec<Vec<u8>>,
}

impl Block {
    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.txs.iter().map(|t| tx_hash(t)).collect()
    }
}

pub fn tx_hash(tx: &[u8]) -> Hash {
    let mut h = Sha256::new();
    h.update(tx);
    h.finalize().into()
}

/// Pairwise SHA-256 up to a single root; an odd node is paired with itself.
/// The root of no leaves is `ZERO_HASH`.
pub fn merkle_root_hashes(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return ZERO_HASH;
    }
    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        let mut next: Vec<Hash> = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0;
        while i < level.len() {
            let a = level[i];
            let b = if i + 1 < level.len() { level[i + 1] } else { level[i] };
            let mut h = Sha256::new();
            h.update(a);
            h.update(b);
            next.push(h.finalize().into());
            i += 2;
        }
        level = next;
    }
    level[0]
}

pub fn header_bytes(h: &BlockHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 32 + 32 + 8);
    out.extend_from_slice(&h.height.to_le_bytes());
    out.extend_from_slice(&h.prev_block_hash);
    out.extend_from_slice(&h.tx_root);
    out.extend_from_slice(&h.timestamp_ms.to_le_bytes());
    out
}

pub fn block_hash(header: &BlockHeader) -> Hash {
    let mut h = Sha256::new();
    h.update(header_bytes(header));
    h.finalize().into()
}

fn ser_txs<S: Serializer>(txs: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
    let hexed: Vec<String> = txs.iter().map(hex::encode).collect();
    hexed.serialize(s)
}

fn de_txs<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
    let hexed = Vec::<String>::deserialize(d)?;
    hexed
        .iter()
        .map(|t| hex::decode(t).map_err(serde::de::Error::custom))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merkle_root_edge_cases() {
        assert_eq!(merkle_root_hashes(&[]), ZERO_HASH);
        let a = tx_hash(b"a");
        assert_eq!(merkle_root_hashes(&[a]), a);

        let b = tx_hash(b"b");
        let ab = merkle_root_hashes(&[a, b]);
        assert_ne!(ab, merkle_root_hashes(&[b, a]), "leaf order is committed");
        // Odd leaf is paired with itself.
        let c = tx_hash(b"c");
        assert_eq!(
            merkle_root_hashes(&[a, b, c]),
            merkle_root_hashes(&[ab, merkle_root_hashes(&[c, c])])
        );
    }

    #[test]
    fn block_json_keeps_tx_bytes() {
        let block = Block {
            header: BlockHeader {
                height: 1,
                prev_block_hash: ZERO_HASH,
                tx_root: merkle_root_hashes(&[tx_hash(&[1, 2, 3])]),
                timestamp_ms: 42,
            },
            txs: vec![vec![1, 2, 3]],
        };
        let json = serde_json::to_string(&block).expect("ser");
        assert!(json.contains("\"010203\""));
        let back: Block = serde_json::from_str(&json).expect("de");
        assert_eq!(back, block);
    }
}
