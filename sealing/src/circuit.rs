//! R1CS circuits for sealed values.
//!
//! Two statements are proven about a commitment `C` bound to a context `B`:
//! 1) Input validity: the prover knows a 32-bit `value` and a `blind` with
//!    `C = Poseidon([value, blind], [B, COMMITMENT_DOMAIN])`.
//! 2) Decryption opening: same equation, but `value` is public. This is what lets
//!    the ledger accept a cleartext without ever seeing the blind.

use crate::constants::{poseidon_config, COMMITMENT_DOMAIN, VALUE_BITS};
use ark_bn254::Fr;
use ark_crypto_primitives::sponge::constraints::CryptographicSpongeVar;
use ark_crypto_primitives::sponge::poseidon::constraints::PoseidonSpongeVar;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::*;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};

/// Convert little-endian boolean bits into an FpVar.
fn bits_le_to_fp(bits_le: &[Boolean<Fr>]) -> Result<FpVar<Fr>, SynthesisError> {
    let mut acc = FpVar::<Fr>::constant(Fr::from(0u64));
    let mut coeff = FpVar::<Fr>::constant(Fr::from(1u64));

    for b in bits_le {
        let term = b.select(&coeff, &FpVar::<Fr>::constant(Fr::from(0u64)))?;
        acc += term;
        coeff += coeff.clone();
    }

    Ok(acc)
}

/// Enforce that `v` fits in `VALUE_BITS` bits.
fn constrain_value(v: &FpVar<Fr>) -> Result<(), SynthesisError> {
    let bits = v.to_bits_le()?;
    let reconstructed = bits_le_to_fp(&bits[..VALUE_BITS])?;
    reconstructed.enforce_equal(v)
}

/// In-circuit version of `seal::commit`.
fn commitment_gadget(
    cs: ConstraintSystemRef<Fr>,
    value: &FpVar<Fr>,
    blind: &FpVar<Fr>,
    binding: &FpVar<Fr>,
) -> Result<FpVar<Fr>, SynthesisError> {
    let cfg = poseidon_config();
    let mut sponge = PoseidonSpongeVar::<Fr>::new(cs, &cfg);
    sponge.absorb(&[value.clone(), blind.clone()].as_slice())?;
    sponge.absorb(&[binding.clone(), FpVar::<Fr>::constant(Fr::from(COMMITMENT_DOMAIN))].as_slice())?;
    Ok(sponge.squeeze_field_elements(1)?[0].clone())
}

/// Proves a commitment hides a well-formed 32-bit value for this context.
#[derive(Clone, Debug)]
pub struct InputValidityCircuit {
    /// Private opening.
    pub value: u32,
    pub blind: Fr,

    /// Public inputs.
    pub commitment: Fr,
    pub binding: Fr,
}

impl ConstraintSynthesizer<Fr> for InputValidityCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        // Public input ordering MUST match `groth16::input_public_inputs`.
        let commitment = FpVar::<Fr>::new_input(cs.clone(), || Ok(self.commitment))?;
        let binding = FpVar::<Fr>::new_input(cs.clone(), || Ok(self.binding))?;

        let value = FpVar::<Fr>::new_witness(cs.clone(), || Ok(Fr::from(self.value as u64)))?;
        let blind = FpVar::<Fr>::new_witness(cs.clone(), || Ok(self.blind))?;

        constrain_value(&value)?;

        let computed = commitment_gadget(cs, &value, &blind, &binding)?;
        computed.enforce_equal(&commitment)?;

        Ok(())
    }
}

/// Proves a public cleartext opens a stored commitment.
#[derive(Clone, Debug)]
pub struct DecryptionOpeningCircuit {
    /// Private blind.
    pub blind: Fr,

    /// Public inputs.
    pub commitment: Fr,
    pub binding: Fr,
    pub value: u32,
}

impl ConstraintSynthesizer<Fr> for DecryptionOpeningCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        // Public input ordering MUST match `groth16::opening_public_inputs`.
        let commitment = FpVar::<Fr>::new_input(cs.clone(), || Ok(self.commitment))?;
        let binding = FpVar::<Fr>::new_input(cs.clone(), || Ok(self.binding))?;
        let value = FpVar::<Fr>::new_input(cs.clone(), || Ok(Fr::from(self.value as u64)))?;

        let blind = FpVar::<Fr>::new_witness(cs.clone(), || Ok(self.blind))?;

        constrain_value(&value)?;

        let computed = commitment_gadget(cs, &value, &blind, &binding)?;
        computed.enforce_equal(&commitment)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seal::{binding, commit};
    use ark_relations::r1cs::ConstraintSystem;

    #[test]
    fn input_circuit_is_satisfied_by_a_real_opening() {
        let b = binding("0xledger", "0xalice");
        let blind = Fr::from(99u64);
        let circuit = InputValidityCircuit {
            value: 64,
            blind,
            commitment: commit(64, blind, b),
            binding: b,
        };

        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit.generate_constraints(cs.clone()).unwrap();
        assert!(cs.is_satisfied().unwrap());
    }

    #[test]
    fn opening_circuit_rejects_a_different_value() {
        let b = binding("0xledger", "0xalice");
        let blind = Fr::from(5u64);
        let circuit = DecryptionOpeningCircuit {
            blind,
            commitment: commit(64, blind, b),
            binding: b,
            value: 65,
        };

        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit.generate_constraints(cs.clone()).unwrap();
        assert!(!cs.is_satisfied().unwrap());
    }
}
