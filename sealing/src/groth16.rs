//! Groth16 prover/verifier orchestration for the sealed-value circuits.
//!
//! SECURITY NOTE (prototype): Groth16 requires a trusted setup that produces a proving key (PK)
//! and verifying key (VK). This prototype generates keys locally. A deployment talking to a real
//! confidential-computation network gets its verifying keys from that network instead.

use crate::circuit::{DecryptionOpeningCircuit, InputValidityCircuit};
use crate::seal::{commit, Opening};
use ark_bn254::{Bn254, Fr};
use ark_crypto_primitives::snark::SNARK;
use ark_groth16::{Groth16, Proof, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZkError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("commitment does not match its opening")]
    CommitmentMismatch,

    #[error("proof verification failed")]
    VerificationFailed,

    #[error("arkworks error: {0}")]
    Ark(String),
}

/// Public inputs of the input validity circuit.
///
/// ORDERING MUST MATCH the circuit's `new_input` allocation order.
pub fn input_public_inputs(commitment: Fr, binding: Fr) -> Vec<Fr> {
    vec![commitment, binding]
}

/// Public inputs of the decryption opening circuit.
///
/// ORDERING MUST MATCH the circuit's `new_input` allocation order.
pub fn opening_public_inputs(commitment: Fr, binding: Fr, value: u32) -> Vec<Fr> {
    vec![commitment, binding, Fr::from(value as u64)]
}

/// Generate a Groth16 keypair for the input validity circuit.
pub fn setup_input_keys(rng: &mut impl RngCore) -> Result<(ProvingKey<Bn254>, VerifyingKey<Bn254>), ZkError> {
    // Constraints do not depend on the witness.
    let binding = Fr::from(0u64);
    let blind = Fr::from(0u64);
    let circuit = InputValidityCircuit {
        value: 0,
        blind,
        commitment: commit(0, blind, binding),
        binding,
    };

    let pk = Groth16::<Bn254>::generate_random_parameters_with_reduction(circuit, rng)
        .map_err(|e| ZkError::Ark(format!("{e}")))?;

    let vk = pk.vk.clone();
    Ok((pk, vk))
}

/// Generate a Groth16 keypair for the decryption opening circuit.
pub fn setup_opening_keys(rng: &mut impl RngCore) -> Result<(ProvingKey<Bn254>, VerifyingKey<Bn254>), ZkError> {
    let binding = Fr::from(0u64);
    let blind = Fr::from(0u64);
    let circuit = DecryptionOpeningCircuit {
        blind,
        commitment: commit(0, blind, binding),
        binding,
        value: 0,
    };

    let pk = Groth16::<Bn254>::generate_random_parameters_with_reduction(circuit, rng)
        .map_err(|e| ZkError::Ark(format!("{e}")))?;

    let vk = pk.vk.clone();
    Ok((pk, vk))
}

/// Prove that `commitment(opening, binding)` hides a well-formed value.
///
/// Returns the proof and the commitment it talks about.
pub fn prove_input(
    rng: &mut impl RngCore,
    pk: &ProvingKey<Bn254>,
    opening: &Opening,
    binding: Fr,
) -> Result<(Proof<Bn254>, Fr), ZkError> {
    let commitment = commit(opening.value, opening.blind, binding);

    let circuit = InputValidityCircuit {
        value: opening.value,
        blind: opening.blind,
        commitment,
        binding,
    };

    let proof = Groth16::<Bn254>::create_random_proof_with_reduction(circuit, pk, rng)
        .map_err(|e| ZkError::Ark(format!("{e}")))?;

    Ok((proof, commitment))
}

/// Prove that `opening.value` is the cleartext behind `commitment(opening, binding)`.
pub fn prove_opening(
    rng: &mut impl RngCore,
    pk: &ProvingKey<Bn254>,
    opening: &Opening,
    binding: Fr,
) -> Result<Proof<Bn254>, ZkError> {
    let circuit = DecryptionOpeningCircuit {
        blind: opening.blind,
        commitment: commit(opening.value, opening.blind, binding),
        binding,
        value: opening.value,
    };

    Groth16::<Bn254>::create_random_proof_with_reduction(circuit, pk, rng)
        .map_err(|e| ZkError::Ark(format!("{e}")))
}

fn verify(vk: &VerifyingKey<Bn254>, proof: &Proof<Bn254>, public_inputs: &[Fr]) -> Result<(), ZkError> {
    let pvk = Groth16::<Bn254>::process_vk(vk).map_err(|e| ZkError::Ark(format!("{e}")))?;
    let ok = Groth16::<Bn254>::verify_proof(&pvk, proof, public_inputs)
        .map_err(|e| ZkError::Ark(format!("{e}")))?;
    if !ok {
        return Err(ZkError::VerificationFailed);
    }
    Ok(())
}

/// Verify an input validity proof.
pub fn verify_input_proof(
    vk: &VerifyingKey<Bn254>,
    proof: &Proof<Bn254>,
    commitment: Fr,
    binding: Fr,
) -> Result<(), ZkError> {
    verify(vk, proof, &input_public_inputs(commitment, binding))
}

/// Verify a decryption opening proof.
pub fn verify_opening_proof(
    vk: &VerifyingKey<Bn254>,
    proof: &Proof<Bn254>,
    commitment: Fr,
    binding: Fr,
    value: u32,
) -> Result<(), ZkError> {
    verify(vk, proof, &opening_public_inputs(commitment, binding, value))
}

/// Serialize a proving key to bytes.
pub fn serialize_pk(pk: &ProvingKey<Bn254>) -> Result<Vec<u8>, ZkError> {
    let mut out = Vec::new();
    pk.serialize_compressed(&mut out)
        .map_err(|e| ZkError::Serialization(format!("{e}")))?;
    Ok(out)
}

pub fn deserialize_pk(bytes: &[u8]) -> Result<ProvingKey<Bn254>, ZkError> {
    ProvingKey::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ZkError::Serialization(format!("{e}")))
}

pub fn serialize_vk(vk: &VerifyingKey<Bn254>) -> Result<Vec<u8>, ZkError> {
    let mut out = Vec::new();
    vk.serialize_compressed(&mut out)
        .map_err(|e| ZkError::Serialization(format!("{e}")))?;
    Ok(out)
}

pub fn deserialize_vk(bytes: &[u8]) -> Result<VerifyingKey<Bn254>, ZkError> {
    VerifyingKey::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ZkError::Serialization(format!("{e}")))
}

/// Proofs travel as base64 of their compressed encoding.
pub fn proof_to_b64(proof: &Proof<Bn254>) -> Result<String, ZkError> {
    let mut out = Vec::new();
    proof
        .serialize_compressed(&mut out)
        .map_err(|e| ZkError::Serialization(format!("{e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(out))
}

pub fn proof_from_b64(b64: &str) -> Result<Proof<Bn254>, ZkError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| ZkError::Encoding(format!("invalid base64: {e}")))?;
    Proof::<Bn254>::deserialize_compressed(&bytes[..]).map_err(|e| ZkError::Serialization(format!("{e}")))
}
