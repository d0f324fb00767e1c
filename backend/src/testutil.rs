//! Shared fixtures for the in-crate tests.

use crate::compute::ConfidentialCompute;
use crate::coprocessor::LocalCoprocessor;
use crate::db::{connect_in_memory, init_schema, SqliteLedger};
use crate::gateway::{CreateRecord, LedgerGateway};
use crate::keys::{KeyStore, ZkKeys};
use crate::models::Identity;
use crate::notifier::StatusNotifier;
use crate::orchestrator::ReportOrchestrator;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::sync::{Arc, OnceLock};

pub const LEDGER_ADDRESS: &str = "0x4e6f6973654c65646765720000000000000000a1";

/// Groth16 setup is slow; every test shares one set of keys.
fn shared_keys() -> ZkKeys {
    static KEYS: OnceLock<ZkKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        ZkKeys::generate(&mut rng).unwrap()
    })
    .clone()
}

/// A private ledger plus a coprocessor wired to it.
pub struct Harness {
    pub keys: Arc<KeyStore>,
    pub ledger: Arc<SqliteLedger>,
    pub compute: Arc<dyn ConfidentialCompute>,
}

impl Harness {
    /// Ready to encrypt and decrypt.
    pub async fn new() -> Self {
        let h = Self::uninitialized().await;
        h.compute.initialize().await.unwrap();
        h
    }

    /// Ledger is up, computation service has not been initialized.
    pub async fn uninitialized() -> Self {
        let keys = Arc::new(KeyStore::preloaded(shared_keys()));
        let db = connect_in_memory().await.unwrap();
        init_schema(&db).await.unwrap();

        let ledger = Arc::new(SqliteLedger::new(db, LEDGER_ADDRESS, keys.clone()));
        let compute: Arc<dyn ConfidentialCompute> = Arc::new(LocalCoprocessor::new(keys.clone(), ledger.clone()));

        Self { keys, ledger, compute }
    }

    pub fn orchestrator(&self) -> ReportOrchestrator {
        ReportOrchestrator::new(self.ledger.clone(), self.compute.clone(), StatusNotifier::default())
    }

    /// Put a confirmed, unverified record on the ledger.
    pub async fn seed(&self, id: &str, submitter: &str, value: u32) {
        let input = self
            .compute
            .encrypt_u32(self.ledger.address(), submitter, value)
            .await
            .unwrap();
        let signer = Identity { address: submitter.to_string() };
        let req = CreateRecord {
            id: id.to_string(),
            label: format!("label {id}"),
            payload: input.payload,
            validity_proof: input.validity_proof,
            public_aux1: value % 10 + 1,
            public_aux2: 0,
            description: String::new(),
        };
        self.ledger.create_record(&signer, req).await.unwrap().wait().await.unwrap();
    }
}
