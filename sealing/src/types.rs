//! Types shared between the circuits, the sealing code and the ledger.

use crate::constants::CLEAR_VALUE_WORD_BYTES;
use crate::groth16::ZkError;
use ark_bn254::Fr;
use ark_ff::PrimeField;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{Deserialize, Serialize};

/// JSON-friendly representation of a field element.
///
/// Fr values travel as hex strings of their canonical compressed encoding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrHex {
    pub hex: String,
}

impl FrHex {
    pub fn from_fr(x: &Fr) -> Self {
        let mut bytes = Vec::new();
        x.serialize_compressed(&mut bytes)
            .expect("in-memory serialization");
        Self { hex: hex::encode(bytes) }
    }

    pub fn to_fr(&self) -> Result<Fr, ZkError> {
        let bytes = hex::decode(&self.hex).map_err(|e| ZkError::Encoding(format!("invalid hex: {e}")))?;
        Fr::deserialize_compressed(&bytes[..]).map_err(|e| ZkError::Encoding(format!("invalid field bytes: {e}")))
    }
}

/// The encrypted form of one value, as submitted to the ledger.
///
/// `commitment` is what the validity proof talks about. The masked fields can
/// only be opened by the holder of the sealing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub commitment: FrHex,
    pub nonce: FrHex,
    pub masked_value: FrHex,
    pub masked_blind: FrHex,
}

/// Map a public string (contract address, submitter address) into the field.
pub fn field_from_str(s: &str) -> Fr {
    Fr::from_le_bytes_mod_order(s.as_bytes())
}

/// Read a field element back as a u64, if it is small enough.
pub fn fr_to_u64(x: &Fr) -> Option<u64> {
    let limbs = x.into_bigint().0;
    if limbs[1..].iter().any(|l| *l != 0) {
        return None;
    }
    Some(limbs[0])
}

/// Encode clear values as concatenated 32-byte big-endian words, `0x`-prefixed.
pub fn encode_clear_values(values: &[u64]) -> String {
    let mut bytes = Vec::with_capacity(values.len() * CLEAR_VALUE_WORD_BYTES);
    for v in values {
        let mut word = [0u8; CLEAR_VALUE_WORD_BYTES];
        word[CLEAR_VALUE_WORD_BYTES - 8..].copy_from_slice(&v.to_be_bytes());
        bytes.extend_from_slice(&word);
    }
    format!("0x{}", hex::encode(bytes))
}

/// Inverse of [`encode_clear_values`].
pub fn decode_clear_values(encoded: &str) -> Result<Vec<u64>, ZkError> {
    let raw = encoded.strip_prefix("0x").unwrap_or(encoded);
    let bytes = hex::decode(raw).map_err(|e| ZkError::Encoding(format!("invalid hex: {e}")))?;

    if bytes.is_empty() || bytes.len() % CLEAR_VALUE_WORD_BYTES != 0 {
        return Err(ZkError::Encoding(format!(
            "clear values must be a non-empty multiple of {CLEAR_VALUE_WORD_BYTES} bytes, got {}",
            bytes.len()
        )));
    }

    let mut out = Vec::with_capacity(bytes.len() / CLEAR_VALUE_WORD_BYTES);
    for word in bytes.chunks_exact(CLEAR_VALUE_WORD_BYTES) {
        let (high, low) = word.split_at(CLEAR_VALUE_WORD_BYTES - 8);
        if high.iter().any(|b| *b != 0) {
            return Err(ZkError::Encoding("clear value does not fit in 64 bits".to_string()));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(low);
        out.push(u64::from_be_bytes(buf));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_values_are_abi_words() {
        let encoded = encode_clear_values(&[65]);
        assert_eq!(encoded.len(), 2 + 64);
        assert!(encoded.ends_with("41"));
        assert_eq!(decode_clear_values(&encoded).unwrap(), vec![65]);
    }

    #[test]
    fn decode_rejects_truncated_words() {
        assert!(decode_clear_values("0x0041").is_err());
        assert!(decode_clear_values("0x").is_err());
        assert!(decode_clear_values("zz").is_err());
    }

    #[test]
    fn decode_rejects_values_above_u64() {
        let mut word = "00".repeat(32);
        word.replace_range(0..2, "01");
        assert!(decode_clear_values(&word).is_err());
    }

    #[test]
    fn fr_hex_and_small_values() {
        let x = Fr::from(1234u64);
        let h = FrHex::from_fr(&x);
        assert_eq!(h.to_fr().unwrap(), x);
        assert_eq!(fr_to_u64(&x), Some(1234));
        assert_eq!(fr_to_u64(&-Fr::from(1u64)), None);
    }

    #[test]
    fn field_from_str_separates_contexts() {
        assert_ne!(field_from_str("0xabc"), field_from_str("0xabd"));
        assert_eq!(field_from_str("alice"), field_from_str("alice"));
    }
}
