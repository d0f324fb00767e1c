use crate::compute::{
    CiphertextSource, ComputeStatus, ConfidentialCompute, EncryptedInput, PublicDecryption,
};
use crate::errors::ReportError;
use crate::keys::KeyStore;
use async_trait::async_trait;
use noise_sealing::groth16::{proof_to_b64, prove_input, prove_opening};
use noise_sealing::seal::binding;
use noise_sealing::types::encode_clear_values;
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// In-process confidential-computation service backed by `noise-sealing`.
pub struct LocalCoprocessor {
    keys: Arc<KeyStore>,
    source: Arc<dyn CiphertextSource>,
    status: AtomicU8,
}

impl LocalCoprocessor {
    pub fn new(keys: Arc<KeyStore>, source: Arc<dyn CiphertextSource>) -> Self {
        Self {
            keys,
            source,
            status: AtomicU8::new(ComputeStatus::Idle.as_u8()),
        }
    }

    fn set_status(&self, status: ComputeStatus) {
        self.status.store(status.as_u8(), Ordering::SeqCst);
    }

    fn require_ready(&self) -> Result<(), ReportError> {
        if self.status() != ComputeStatus::Ready {
            return Err(ReportError::EncryptionUnavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl ConfidentialCompute for LocalCoprocessor {
    fn status(&self) -> ComputeStatus {
        ComputeStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    async fn initialize(&self) -> Result<(), ReportError> {
        if self.status() == ComputeStatus::Ready {
            return Ok(());
        }
        self.set_status(ComputeStatus::Loading);

        let res = async {
            self.keys.ensure().await?;
            self.keys.sealing_key().await?;
            Ok::<(), ReportError>(())
        }
        .await;

        match &res {
            Ok(()) => {
                self.set_status(ComputeStatus::Ready);
                info!("confidential computation ready");
            }
            Err(e) => {
                self.set_status(ComputeStatus::Error);
                warn!(error = %e, "confidential computation initialization failed");
            }
        }
        res
    }

    async fn encrypt_u32(&self, target: &str, submitter: &str, value: u32) -> Result<EncryptedInput, ReportError> {
        self.require_ready()?;
        let keys = self.keys.ensure().await?;
        let sealing = self.keys.sealing_key().await?;
        let b = binding(target, submitter);

        tokio::task::spawn_blocking(move || {
            let mut rng = OsRng;
            let (payload, opening) = sealing.seal(&mut rng, value, b);
            let (proof, _commitment) = prove_input(&mut rng, keys.input_pk.as_ref(), &opening, b)
                .map_err(|e| ReportError::ComputeFailed(format!("{e}")))?;
            let validity_proof = proof_to_b64(&proof).map_err(|e| ReportError::ComputeFailed(format!("{e}")))?;

            Ok(EncryptedInput { payload, validity_proof })
        })
        .await
        .map_err(|e| ReportError::ComputeFailed(format!("encryption task: {e}")))?
    }

    async fn public_decrypt(&self, handles: &[String], target: &str) -> Result<PublicDecryption, ReportError> {
        self.require_ready()?;
        if handles.is_empty() {
            return Err(ReportError::ComputeFailed("no handles requested".to_string()));
        }

        let keys = self.keys.ensure().await?;
        let sealing = self.keys.sealing_key().await?;

        let mut stored = Vec::with_capacity(handles.len());
        for handle in handles {
            let ct = self.source.ciphertext(handle).await?;
            if ct.target != target {
                return Err(ReportError::ComputeFailed(format!(
                    "handle {handle} belongs to {}, not {target}",
                    ct.target
                )));
            }
            stored.push(ct);
        }

        tokio::task::spawn_blocking(move || {
            let mut rng = OsRng;
            let mut values = Vec::with_capacity(stored.len());
            let mut proofs = Vec::with_capacity(stored.len());
            let mut clear_values = BTreeMap::new();

            for ct in stored {
                let b = ct.binding.to_fr().map_err(|e| ReportError::ComputeFailed(format!("{e}")))?;
                let opening = sealing
                    .unseal(&ct.payload, b)
                    .map_err(|e| ReportError::ComputeFailed(format!("handle {}: {e}", ct.handle)))?;
                let proof = prove_opening(&mut rng, keys.opening_pk.as_ref(), &opening, b)
                    .map_err(|e| ReportError::ComputeFailed(format!("{e}")))?;

                values.push(opening.value as u64);
                proofs.push(proof_to_b64(&proof).map_err(|e| ReportError::ComputeFailed(format!("{e}")))?);
                clear_values.insert(ct.handle, opening.value as u64);
            }

            let decryption_proof =
                serde_json::to_string(&proofs).map_err(|e| ReportError::ComputeFailed(format!("{e}")))?;

            Ok(PublicDecryption {
                clear_values,
                encoded_clear_values: encode_clear_values(&values),
                decryption_proof,
            })
        })
        .await
        .map_err(|e| ReportError::ComputeFailed(format!("decryption task: {e}")))?
    }
}
