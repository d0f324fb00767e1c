//! Report lifecycle: creating confidential records and revealing them.
//!
//! Every mutating flow ends in a full re-fetch of the record set instead of a local
//! patch. The ledger is the only source of truth, and the cached set is only ever
//! replaced wholesale by `refresh`.

use crate::aggregate::{compute_stats_now, heatmap, AggregateStats, IntensityGrid};
use crate::compute::ConfidentialCompute;
use crate::decryption::DecryptionVerifier;
use crate::encryption::EncryptionClient;
use crate::errors::{Rejection, ReportError};
use crate::gateway::{CreateRecord, LedgerGateway};
use crate::models::{ConfidentialRecord, PreparedReport, ReportInput, RevealPath, RevealResponse, Session};
use crate::notifier::StatusNotifier;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Stages of a record-creation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStage {
    Idle,
    Encrypting,
    Submitting,
    Confirming,
    Done,
}

impl CreationStage {
    fn message(self) -> &'static str {
        match self {
            CreationStage::Encrypting => "Encrypting noise reading...",
            CreationStage::Submitting => "Submitting encrypted report...",
            CreationStage::Confirming => "Waiting for transaction confirmation...",
            CreationStage::Idle | CreationStage::Done => "",
        }
    }
}

/// Stages of a record-decryption operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionStage {
    Idle,
    CheckingOnChainState,
    ShortCircuitVerified,
    RequestingDecryption,
    SubmittingProof,
    Confirming,
    Done,
}

impl DecryptionStage {
    fn message(self) -> &'static str {
        match self {
            DecryptionStage::CheckingOnChainState => "Checking on-chain state...",
            DecryptionStage::RequestingDecryption => "Requesting decryption...",
            DecryptionStage::SubmittingProof => "Submitting decryption proof...",
            DecryptionStage::Confirming => "Verifying decryption on-chain...",
            DecryptionStage::Idle | DecryptionStage::ShortCircuitVerified | DecryptionStage::Done => "",
        }
    }
}

/// Result of a confirmed submission.
#[derive(Debug, Clone)]
pub struct SubmittedReport {
    pub id: String,
    pub tx_id: String,
    /// The record as the refreshed set shows it.
    pub record: Option<ConfidentialRecord>,
}

struct RecordSet {
    epoch: u64,
    records: Arc<Vec<ConfidentialRecord>>,
}

/// Fresh record id: creation time plus 32 random bits.
pub fn new_record_id() -> String {
    let mut suffix = [0u8; 4];
    OsRng.fill_bytes(&mut suffix);
    format!("noise-{}-{}", Utc::now().timestamp_millis(), hex::encode(suffix))
}

pub struct ReportOrchestrator {
    gateway: Arc<dyn LedgerGateway>,
    compute: Arc<dyn ConfidentialCompute>,
    encryption: EncryptionClient,
    verifier: DecryptionVerifier,
    notifier: StatusNotifier,
    records: RwLock<RecordSet>,
    refresh_tickets: AtomicU64,
}

impl ReportOrchestrator {
    pub fn new(gateway: Arc<dyn LedgerGateway>, compute: Arc<dyn ConfidentialCompute>, notifier: StatusNotifier) -> Self {
        Self {
            gateway,
            encryption: EncryptionClient::new(compute.clone()),
            verifier: DecryptionVerifier::new(compute.clone()),
            compute,
            notifier,
            records: RwLock::new(RecordSet {
                epoch: 0,
                records: Arc::new(Vec::new()),
            }),
            refresh_tickets: AtomicU64::new(0),
        }
    }

    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }

    pub fn compute(&self) -> &Arc<dyn ConfidentialCompute> {
        &self.compute
    }

    /// Immutable view of the currently known records.
    pub async fn snapshot(&self) -> Arc<Vec<ConfidentialRecord>> {
        self.records.read().await.records.clone()
    }

    pub async fn stats(&self) -> AggregateStats {
        compute_stats_now(&self.snapshot().await)
    }

    pub async fn heatmap(&self) -> IntensityGrid {
        heatmap(&self.snapshot().await)
    }

    /// Initialize the confidential-computation capability.
    pub async fn initialize_compute(&self) -> Result<(), ReportError> {
        if let Err(e) = self.compute.initialize().await {
            self.notifier.error("Confidential computation initialization failed");
            return Err(e);
        }
        Ok(())
    }

    /// Re-list and re-fetch every record from the ledger.
    ///
    /// A record that fails to load is skipped. A refresh that finishes after a newer
    /// one was applied is discarded, so the set never moves backwards.
    pub async fn refresh(&self) -> Result<Arc<Vec<ConfidentialRecord>>, ReportError> {
        let ticket = self.refresh_tickets.fetch_add(1, Ordering::SeqCst) + 1;

        let ids = match self.gateway.list_record_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                self.notifier.error("Failed to load data");
                return Err(e);
            }
        };

        let mut fresh = Vec::with_capacity(ids.len());
        for id in ids {
            match self.gateway.get_record(&id).await {
                Ok(rec) => fresh.push(ConfidentialRecord::from(rec)),
                Err(e) => warn!(record_id = %id, error = %e, "skipping record that failed to load"),
            }
        }

        let mut set = self.records.write().await;
        if ticket > set.epoch {
            set.epoch = ticket;
            set.records = Arc::new(fresh);
            debug!(ticket, records = set.records.len(), "record set refreshed");
        } else {
            debug!(ticket, applied = set.epoch, "discarding stale refresh");
        }
        Ok(set.records.clone())
    }

    /// Fix the record id for a report before anything touches the network.
    pub fn prepare_report(&self, input: ReportInput) -> PreparedReport {
        PreparedReport {
            id: new_record_id(),
            input,
        }
    }

    /// Encrypt and submit a report, then refresh.
    ///
    /// Retrying with the same `PreparedReport` targets the same ledger id, so a
    /// submission that did land is rejected as a duplicate instead of doubled.
    pub async fn submit_report(&self, session: &Session, report: &PreparedReport) -> Result<SubmittedReport, ReportError> {
        match self.submit_report_inner(session, report).await {
            Ok(out) => {
                self.notifier.success("Noise report submitted");
                Ok(out)
            }
            Err(e) => {
                let msg = match &e {
                    ReportError::NotAuthenticated => "Connect an authenticated identity first".to_string(),
                    ReportError::Rejected(Rejection::DuplicateId) => "Report already submitted".to_string(),
                    other => format!("Submission failed: {other}"),
                };
                self.notifier.error(msg);
                Err(e)
            }
        }
    }

    /// Prepare and submit in one go.
    #[cfg(test)]
    pub async fn report(&self, session: &Session, input: ReportInput) -> Result<SubmittedReport, ReportError> {
        let prepared = self.prepare_report(input);
        self.submit_report(session, &prepared).await
    }

    fn enter_creation(&self, id: &str, stage: CreationStage) {
        debug!(record_id = %id, ?stage, "creation stage");
        let msg = stage.message();
        if !msg.is_empty() {
            self.notifier.pending(msg);
        }
    }

    async fn submit_report_inner(&self, session: &Session, report: &PreparedReport) -> Result<SubmittedReport, ReportError> {
        let identity = session.identity()?;
        let id = report.id.as_str();
        self.enter_creation(id, CreationStage::Idle);

        self.enter_creation(id, CreationStage::Encrypting);
        let encrypted = self
            .encryption
            .encrypt(self.gateway.address(), &identity.address, report.input.decibel)
            .await?;

        self.enter_creation(id, CreationStage::Submitting);
        let pending = self
            .gateway
            .create_record(
                &identity,
                CreateRecord {
                    id: report.id.clone(),
                    label: report.input.label.clone(),
                    payload: encrypted.payload,
                    validity_proof: encrypted.validity_proof,
                    public_aux1: report.input.category,
                    public_aux2: report.input.public_aux2,
                    description: report.input.description.clone(),
                },
            )
            .await?;

        self.enter_creation(id, CreationStage::Confirming);
        debug!(record_id = %id, tx_id = pending.tx_id(), "create submitted");
        let receipt = pending.wait().await?;
        info!(record_id = %id, tx_id = %receipt.tx_id, submitter = %identity.address, "report confirmed");

        let records = self.refresh().await?;
        self.enter_creation(id, CreationStage::Done);

        Ok(SubmittedReport {
            id: report.id.clone(),
            tx_id: receipt.tx_id,
            record: records.iter().find(|r| r.id == report.id).cloned(),
        })
    }

    /// Reveal a record's value through an oracle-checked decryption.
    pub async fn reveal(&self, session: &Session, id: &str) -> Result<RevealResponse, ReportError> {
        match self.reveal_inner(session, id).await {
            Ok(out) => {
                let msg = match out.path {
                    RevealPath::Verified => "Decryption verified",
                    RevealPath::AlreadyOnLedger | RevealPath::VerifiedConcurrently => "Data already verified on-chain",
                };
                self.notifier.success(msg);
                Ok(out)
            }
            Err(e) => {
                let msg = match &e {
                    ReportError::NotAuthenticated => "Connect an authenticated identity first".to_string(),
                    other => format!("Decryption failed: {other}"),
                };
                self.notifier.error(msg);
                Err(e)
            }
        }
    }

    fn enter_decryption(&self, id: &str, stage: DecryptionStage) {
        debug!(record_id = %id, ?stage, "decryption stage");
        let msg = stage.message();
        if !msg.is_empty() {
            self.notifier.pending(msg);
        }
    }

    /// The ledger's verified value for `id` after a refresh.
    async fn confirmed_value(&self, id: &str) -> Result<u64, ReportError> {
        let records = self.refresh().await?;
        let record = records
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| ReportError::RecordNotFound(id.to_string()))?;

        match (record.verified, record.revealed_value) {
            (true, Some(v)) => Ok(v),
            _ => Err(ReportError::ProofRejected("ledger did not record the verification".to_string())),
        }
    }

    async fn reveal_inner(&self, session: &Session, id: &str) -> Result<RevealResponse, ReportError> {
        self.enter_decryption(id, DecryptionStage::Idle);

        self.enter_decryption(id, DecryptionStage::CheckingOnChainState);
        let current = self.gateway.get_record(id).await?;
        if current.verified {
            self.enter_decryption(id, DecryptionStage::ShortCircuitVerified);
            self.enter_decryption(id, DecryptionStage::Done);
            return Ok(RevealResponse {
                id: id.to_string(),
                value: current.revealed_value,
                path: RevealPath::AlreadyOnLedger,
            });
        }

        // Reading a verified value is open to anyone; submitting a proof is a signed write.
        let identity = session.identity()?;
        let handle = self.gateway.get_encrypted_handle(id).await?;

        self.enter_decryption(id, DecryptionStage::RequestingDecryption);
        let gateway = self.gateway.clone();
        let submit = |clear_values: String, proof: String| {
            self.enter_decryption(id, DecryptionStage::SubmittingProof);
            let identity = identity.clone();
            let record_id = id.to_string();
            async move {
                gateway
                    .submit_decryption_proof(&identity, &record_id, &clear_values, &proof)
                    .await
            }
        };

        let outcome = self
            .verifier
            .verify_decryption(std::slice::from_ref(&handle), self.gateway.address(), submit)
            .await;

        let (path, cleartext) = match outcome {
            Ok(verified) => {
                self.enter_decryption(id, DecryptionStage::Confirming);
                (RevealPath::Verified, verified.clear_values.get(&handle).copied())
            }
            Err(ReportError::AlreadyVerified) => {
                info!(record_id = %id, "record verified by another actor first");
                (RevealPath::VerifiedConcurrently, None)
            }
            Err(e) => return Err(e),
        };

        let value = self.confirmed_value(id).await?;
        if let Some(c) = cleartext {
            if c != value {
                warn!(record_id = %id, service = c, ledger = value, "cleartext disagrees with ledger, keeping ledger value");
            }
        }

        self.enter_decryption(id, DecryptionStage::Done);
        Ok(RevealResponse {
            id: id.to_string(),
            value,
            path,
        })
    }

    /// Ask the ledger whether it is accepting requests.
    pub async fn check_availability(&self) -> Result<bool, ReportError> {
        match self.gateway.check_availability().await {
            Ok(true) => {
                self.notifier.success("Contract availability check passed");
                Ok(true)
            }
            Ok(false) => {
                self.notifier.error("Contract is not available");
                Ok(false)
            }
            Err(e) => {
                self.notifier.error("Availability check failed");
                Err(e)
            }
        }
    }
}
