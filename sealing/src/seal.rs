//! Native commitments and value sealing.
//!
//! A value is committed as `Poseidon([value, blind], [binding, COMMITMENT_DOMAIN])`
//! where `binding = Poseidon(target, submitter)`. The opening `(value, blind)` is
//! then masked with two field elements squeezed from `Poseidon([sk, nonce], [SEALING_DOMAIN, 0])`,
//! so only the holder of `sk` can recover it.
//!
//! The commitment equation MUST match `circuit::commitment_gadget`.

use crate::constants::{poseidon_config, COMMITMENT_DOMAIN, HANDLE_DOMAIN, SEALING_DOMAIN, VALUE_BITS};
use crate::groth16::ZkError;
use crate::types::{field_from_str, fr_to_u64, EncryptedPayload, FrHex};
use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::PoseidonSponge;
use ark_crypto_primitives::sponge::CryptographicSponge;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::UniformRand;
use rand::RngCore;

/// Context binding for a (target contract, submitter) pair.
pub fn binding(target: &str, submitter: &str) -> Fr {
    let cfg = poseidon_config();
    let mut sponge = PoseidonSponge::<Fr>::new(&cfg);
    sponge.absorb(&[field_from_str(target), field_from_str(submitter)].as_slice());
    sponge.squeeze_field_elements::<Fr>(1)[0]
}

/// Commit to `value` under `blind`, bound to `binding`.
pub fn commit(value: u32, blind: Fr, binding: Fr) -> Fr {
    let cfg = poseidon_config();
    let mut sponge = PoseidonSponge::<Fr>::new(&cfg);
    sponge.absorb(&[Fr::from(value as u64), blind].as_slice());
    sponge.absorb(&[binding, Fr::from(COMMITMENT_DOMAIN)].as_slice());
    sponge.squeeze_field_elements::<Fr>(1)[0]
}

/// Ledger-side handle for a stored ciphertext.
pub fn handle_for(commitment: Fr, binding: Fr) -> Fr {
    let cfg = poseidon_config();
    let mut sponge = PoseidonSponge::<Fr>::new(&cfg);
    sponge.absorb(&[commitment, binding].as_slice());
    sponge.absorb(&[Fr::from(HANDLE_DOMAIN), Fr::from(0u64)].as_slice());
    sponge.squeeze_field_elements::<Fr>(1)[0]
}

/// The secret half of a commitment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Opening {
    pub value: u32,
    pub blind: Fr,
}

/// Service-held secret used to seal and unseal openings.
#[derive(Clone)]
pub struct SealingKey {
    sk: Fr,
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(..)")
    }
}

impl SealingKey {
    pub fn generate(rng: &mut impl RngCore) -> Self {
        Self { sk: Fr::rand(rng) }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ZkError> {
        let mut out = Vec::new();
        self.sk
            .serialize_compressed(&mut out)
            .map_err(|e| ZkError::Serialization(format!("{e}")))?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ZkError> {
        let sk = Fr::deserialize_compressed(bytes).map_err(|e| ZkError::Serialization(format!("{e}")))?;
        Ok(Self { sk })
    }

    fn masks(&self, nonce: Fr) -> (Fr, Fr) {
        let cfg = poseidon_config();
        let mut sponge = PoseidonSponge::<Fr>::new(&cfg);
        sponge.absorb(&[self.sk, nonce].as_slice());
        sponge.absorb(&[Fr::from(SEALING_DOMAIN), Fr::from(0u64)].as_slice());
        let out = sponge.squeeze_field_elements::<Fr>(2);
        (out[0], out[1])
    }

    /// Commit to `value` and seal its opening.
    ///
    /// Blind and nonce are fresh on every call, so sealing the same value twice
    /// gives unrelated payloads.
    pub fn seal(&self, rng: &mut impl RngCore, value: u32, binding: Fr) -> (EncryptedPayload, Opening) {
        let blind = Fr::rand(rng);
        let nonce = Fr::rand(rng);
        let commitment = commit(value, blind, binding);
        let (mask_v, mask_b) = self.masks(nonce);

        let payload = EncryptedPayload {
            commitment: FrHex::from_fr(&commitment),
            nonce: FrHex::from_fr(&nonce),
            masked_value: FrHex::from_fr(&(Fr::from(value as u64) + mask_v)),
            masked_blind: FrHex::from_fr(&(blind + mask_b)),
        };

        (payload, Opening { value, blind })
    }

    /// Recover the opening of `payload` and check it against the commitment.
    pub fn unseal(&self, payload: &EncryptedPayload, binding: Fr) -> Result<Opening, ZkError> {
        let nonce = payload.nonce.to_fr()?;
        let (mask_v, mask_b) = self.masks(nonce);

        let value_fr = payload.masked_value.to_fr()? - mask_v;
        let blind = payload.masked_blind.to_fr()? - mask_b;

        let value = fr_to_u64(&value_fr)
            .filter(|v| *v < (1u64 << VALUE_BITS))
            .ok_or(ZkError::CommitmentMismatch)? as u32;

        if commit(value, blind, binding) != payload.commitment.to_fr()? {
            return Err(ZkError::CommitmentMismatch);
        }

        Ok(Opening { value, blind })
    }
}
