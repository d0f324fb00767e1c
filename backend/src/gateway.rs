//! Read and authenticated write access to the confidential-record contract.

use crate::errors::ReportError;
use crate::models::{Identity, LedgerRecord};
use async_trait::async_trait;
use noise_sealing::types::EncryptedPayload;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Arguments of `createRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecord {
    pub id: String,
    pub label: String,
    pub payload: EncryptedPayload,
    pub validity_proof: String,
    pub public_aux1: u32,
    pub public_aux2: u32,
    pub description: String,
}

/// Proof that the ledger durably accepted a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_id: String,
    pub record_id: String,
}

/// A submitted write whose outcome is not known yet.
#[derive(Debug)]
pub struct PendingTx {
    tx_id: String,
    rx: oneshot::Receiver<Result<TxReceipt, ReportError>>,
}

impl PendingTx {
    /// Run `execute` as one ledger-side transaction in the background.
    pub fn spawn<F>(execute: impl FnOnce(String) -> F) -> Self
    where
        F: Future<Output = Result<TxReceipt, ReportError>> + Send + 'static,
    {
        let tx_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let fut = execute(tx_id.clone());
        tokio::spawn(async move {
            // The submitter may have walked away; the write still happens.
            let _ = tx.send(fut.await);
        });
        Self { tx_id, rx }
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// Block until the ledger accepted or rejected the write.
    pub async fn wait(self) -> Result<TxReceipt, ReportError> {
        self.rx
            .await
            .map_err(|_| ReportError::LedgerUnreachable(format!("transaction {} dropped", self.tx_id)))?
    }
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Target context (contract address) that encryptions must be bound to.
    fn address(&self) -> &str;

    async fn list_record_ids(&self) -> Result<Vec<String>, ReportError>;

    async fn get_record(&self, id: &str) -> Result<LedgerRecord, ReportError>;

    async fn get_encrypted_handle(&self, id: &str) -> Result<String, ReportError>;

    async fn check_availability(&self) -> Result<bool, ReportError>;

    async fn create_record(&self, signer: &Identity, req: CreateRecord) -> Result<PendingTx, ReportError>;

    async fn submit_decryption_proof(
        &self,
        signer: &Identity,
        id: &str,
        clear_values: &str,
        decryption_proof: &str,
    ) -> Result<PendingTx, ReportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_tx_resolves_with_the_ledger_outcome() {
        let ok = PendingTx::spawn(|tx_id| async move {
            Ok(TxReceipt { tx_id, record_id: "noise-1".into() })
        });
        let id = ok.tx_id().to_string();
        assert_eq!(ok.wait().await.unwrap().tx_id, id);

        let rejected = PendingTx::spawn(|_| async move {
            Err(ReportError::Rejected(crate::errors::Rejection::DuplicateId))
        });
        assert!(matches!(rejected.wait().await, Err(ReportError::Rejected(_))));
    }
}
