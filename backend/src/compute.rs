//! Contract of the confidential-computation capability.
//!
//! The workflow only ever talks to these traits; `coprocessor::LocalCoprocessor`
//! is the in-process implementation.

use crate::errors::ReportError;
use async_trait::async_trait;
use noise_sealing::types::{EncryptedPayload, FrHex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

impl ComputeStatus {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => ComputeStatus::Loading,
            2 => ComputeStatus::Ready,
            3 => ComputeStatus::Error,
            _ => ComputeStatus::Idle,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ComputeStatus::Idle => 0,
            ComputeStatus::Loading => 1,
            ComputeStatus::Ready => 2,
            ComputeStatus::Error => 3,
        }
    }
}

/// Encrypted value plus the proof that it is well-formed for its context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub payload: EncryptedPayload,
    /// Base64 Groth16 proof.
    pub validity_proof: String,
}

/// Cleartexts released by the service together with the proof the ledger checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicDecryption {
    pub clear_values: BTreeMap<String, u64>,
    /// ABI words, in the order the handles were requested.
    pub encoded_clear_values: String,
    /// JSON array of base64 opening proofs, same order.
    pub decryption_proof: String,
}

/// A ciphertext as stored on the ledger under its handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCiphertext {
    pub handle: String,
    pub payload: EncryptedPayload,
    pub binding: FrHex,
    /// Contract the ciphertext was bound to.
    pub target: String,
}

/// Where the service reads ciphertexts from when asked to decrypt a handle.
#[async_trait]
pub trait CiphertextSource: Send + Sync {
    async fn ciphertext(&self, handle: &str) -> Result<StoredCiphertext, ReportError>;
}

#[async_trait]
pub trait ConfidentialCompute: Send + Sync {
    fn status(&self) -> ComputeStatus;

    async fn initialize(&self) -> Result<(), ReportError>;

    async fn encrypt_u32(&self, target: &str, submitter: &str, value: u32) -> Result<EncryptedInput, ReportError>;

    async fn public_decrypt(&self, handles: &[String], target: &str) -> Result<PublicDecryption, ReportError>;
}
