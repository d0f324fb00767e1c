//! Crate-wide constants shared by the circuits and the native sealing code.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{find_poseidon_ark_and_mds, PoseidonConfig};
use ark_ff::PrimeField;

/// Bit width of a sealed value.
///
/// Reports carry a single decibel reading, encrypted as a 32-bit integer.
pub const VALUE_BITS: usize = 32;

/// Domain tag absorbed next to the binding when committing to a value.
pub const COMMITMENT_DOMAIN: u64 = 0x4e4f_4953_4543_4d54; // "NOISECMT"

/// Domain tag absorbed when deriving sealing masks from the service secret.
pub const SEALING_DOMAIN: u64 = 0x4e4f_4953_4553_4c44; // "NOISESLD"

/// Domain tag for ledger-issued handles.
pub const HANDLE_DOMAIN: u64 = 0x4e4f_4953_4548_444c; // "NOISEHDL"

/// Size of one ABI word in an encoded clear-value list.
pub const CLEAR_VALUE_WORD_BYTES: usize = 32;

// Poseidon sponge configuration.
//
// Width-3 sponge (rate=2, capacity=1): every absorption in this crate is a pair.
pub const POSEIDON_RATE: usize = 2;
pub const POSEIDON_CAPACITY: usize = 1;

pub const POSEIDON_FULL_ROUNDS: usize = 8;
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;

/// Poseidon S-box exponent (alpha).
pub const POSEIDON_ALPHA: u64 = 5;

/// Deterministically derive Poseidon parameters for BN254::Fr.
///
/// The native sponge and the in-circuit gadget must agree on these constants,
/// so both sides call this function.
pub fn poseidon_config() -> PoseidonConfig<Fr> {
    let prime_bits = Fr::MODULUS_BIT_SIZE as u64;

    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        prime_bits,
        POSEIDON_RATE,
        POSEIDON_FULL_ROUNDS as u64,
        POSEIDON_PARTIAL_ROUNDS as u64,
        0,
    );

    PoseidonConfig::new(
        POSEIDON_FULL_ROUNDS,
        POSEIDON_PARTIAL_ROUNDS,
        POSEIDON_ALPHA,
        mds,
        ark,
        POSEIDON_RATE,
        POSEIDON_CAPACITY,
    )
}
