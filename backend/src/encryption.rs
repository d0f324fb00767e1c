use crate::compute::{ComputeStatus, ConfidentialCompute, EncryptedInput};
use crate::errors::ReportError;
use std::sync::Arc;

/// Turns a plaintext reading into an encrypted payload plus validity proof.
///
/// Purely local: nothing is written anywhere.
#[derive(Clone)]
pub struct EncryptionClient {
    compute: Arc<dyn ConfidentialCompute>,
}

impl EncryptionClient {
    pub fn new(compute: Arc<dyn ConfidentialCompute>) -> Self {
        Self { compute }
    }

    pub async fn encrypt(&self, target: &str, submitter: &str, plaintext: i64) -> Result<EncryptedInput, ReportError> {
        if self.compute.status() != ComputeStatus::Ready {
            return Err(ReportError::EncryptionUnavailable);
        }

        let value = u32::try_from(plaintext).map_err(|_| ReportError::InvalidPlaintext(plaintext))?;

        self.compute.encrypt_u32(target, submitter, value).await
    }
}
