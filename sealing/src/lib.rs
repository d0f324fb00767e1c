//! Sealing layer for the confidential noise ledger.
//!
//! This crate is the local prototype of the confidential-computation service:
//! - Poseidon commitments binding a 32-bit value to a (target, submitter) context.
//! - Symmetric sealing of the committed opening so the service can decrypt later.
//! - Groth16 circuits proving input validity and decryption openings.
//! - Serialization helpers for transporting proofs, keys and payloads.

pub mod circuit;
pub mod constants;
pub mod groth16;
pub mod seal;
pub mod types;
