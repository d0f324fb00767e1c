use crate::compute::{ComputeStatus, ConfidentialCompute};
use crate::errors::{Rejection, ReportError};
use crate::gateway::PendingTx;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Cleartexts whose decryption proof the ledger has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedDecryption {
    pub clear_values: BTreeMap<String, u64>,
    pub tx_id: String,
}

/// Requests public decryption and pushes the resulting proof on-chain.
#[derive(Clone)]
pub struct DecryptionVerifier {
    compute: Arc<dyn ConfidentialCompute>,
}

/// Ledger verdicts on a decryption proof, in the verifier's vocabulary.
fn classify(e: ReportError) -> ReportError {
    match e {
        ReportError::Rejected(Rejection::AlreadyVerified) => ReportError::AlreadyVerified,
        ReportError::Rejected(reason) => ReportError::ProofRejected(reason.to_string()),
        other => other,
    }
}

impl DecryptionVerifier {
    pub fn new(compute: Arc<dyn ConfidentialCompute>) -> Self {
        Self { compute }
    }

    /// Decrypt `handles` and get the ledger to accept the cleartexts.
    ///
    /// `submit` receives the encoded clear values and the proof and must return the
    /// pending ledger write; cleartexts are only returned once it is confirmed.
    pub async fn verify_decryption<F, Fut>(
        &self,
        handles: &[String],
        target: &str,
        submit: F,
    ) -> Result<VerifiedDecryption, ReportError>
    where
        F: FnOnce(String, String) -> Fut,
        Fut: Future<Output = Result<PendingTx, ReportError>>,
    {
        if self.compute.status() != ComputeStatus::Ready {
            return Err(ReportError::EncryptionUnavailable);
        }

        let decryption = self.compute.public_decrypt(handles, target).await?;
        debug!(handles = handles.len(), "public decryption obtained");

        let pending = submit(decryption.encoded_clear_values, decryption.decryption_proof)
            .await
            .map_err(classify)?;
        let receipt = pending.wait().await.map_err(classify)?;

        Ok(VerifiedDecryption {
            clear_values: decryption.clear_values,
            tx_id: receipt.tx_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{LedgerGateway, TxReceipt};
    use crate::models::Identity;
    use crate::testutil::Harness;

    #[tokio::test]
    async fn cleartext_is_returned_after_confirmation() {
        let h = Harness::new().await;
        h.seed("noise-a", "0xalice", 58).await;
        let handle = h.ledger.get_encrypted_handle("noise-a").await.unwrap();
        let verifier = DecryptionVerifier::new(h.compute.clone());
        let signer = Identity { address: "0xbob".into() };

        let out = verifier
            .verify_decryption(&[handle.clone()], h.ledger.address(), |clear, proof| {
                let ledger = h.ledger.clone();
                let signer = signer.clone();
                async move { ledger.submit_decryption_proof(&signer, "noise-a", &clear, &proof).await }
            })
            .await
            .unwrap();

        assert_eq!(out.clear_values[&handle], 58);
        assert!(h.ledger.get_record("noise-a").await.unwrap().verified);
    }

    #[tokio::test]
    async fn ledger_verdicts_are_classified() {
        let h = Harness::new().await;
        h.seed("noise-a", "0xalice", 58).await;
        let handle = h.ledger.get_encrypted_handle("noise-a").await.unwrap();
        let verifier = DecryptionVerifier::new(h.compute.clone());

        let err = verifier
            .verify_decryption(&[handle.clone()], h.ledger.address(), |_, _| async {
                Ok(PendingTx::spawn(|_| async { Err(ReportError::Rejected(Rejection::AlreadyVerified)) }))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::AlreadyVerified));

        let err = verifier
            .verify_decryption(&[handle.clone()], h.ledger.address(), |_, _| async {
                Ok(PendingTx::spawn(|_| async { Err(ReportError::Rejected(Rejection::InvalidDecryptionProof)) }))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::ProofRejected(_)));

        let err = verifier
            .verify_decryption(&[handle], h.ledger.address(), |_, _| async {
                Err::<PendingTx, _>(ReportError::Rejected(Rejection::MalformedClearValues("expected one value, got 2".into())))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::ProofRejected(reason) if reason.contains("malformed clear values")));
    }

    #[tokio::test]
    async fn wrong_context_never_reaches_the_ledger() {
        let h = Harness::new().await;
        h.seed("noise-a", "0xalice", 58).await;
        let handle = h.ledger.get_encrypted_handle("noise-a").await.unwrap();
        let verifier = DecryptionVerifier::new(h.compute.clone());

        let err = verifier
            .verify_decryption(&[handle], "0xsomewhere-else", |_, _| async {
                Ok(PendingTx::spawn(|tx_id| async move {
                    Ok(TxReceipt { tx_id, record_id: "noise-a".into() })
                }))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::ComputeFailed(_)));
        assert_eq!(h.ledger.accepted_decryptions("noise-a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn uninitialized_service_cannot_decrypt() {
        let h = Harness::uninitialized().await;
        let verifier = DecryptionVerifier::new(h.compute.clone());
        assert!(!matches!(h.compute.status(), ComputeStatus::Ready));

        let err = verifier
            .verify_decryption(&["00".to_string()], h.ledger.address(), |_, _| async {
                Err::<PendingTx, _>(ReportError::NotAuthenticated)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::EncryptionUnavailable));
    }
}
