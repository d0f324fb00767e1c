//! SQLite-backed local ledger.
//!
//! Plays the confidential-record contract: it assigns handles, checks input proofs
//! on creation and decryption proofs on verification, and is the only place a record
//! can flip to verified.

use crate::compute::{CiphertextSource, StoredCiphertext};
use crate::errors::{Rejection, ReportError};
use crate::gateway::{CreateRecord, LedgerGateway, PendingTx, TxReceipt};
use crate::keys::KeyStore;
use crate::models::{Identity, LedgerRecord};
use async_trait::async_trait;
use chrono::Utc;
use noise_sealing::groth16::{proof_from_b64, verify_input_proof, verify_opening_proof};
use noise_sealing::seal::{binding, handle_for};
use noise_sealing::types::{decode_clear_values, EncryptedPayload, FrHex};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

pub type Db = Pool<Sqlite>;

fn ledger_err(e: sqlx::Error) -> ReportError {
    ReportError::LedgerUnreachable(format!("{e}"))
}

/// Like [`ledger_err`], but unique-key violations are the ledger declining the write.
fn write_err(e: sqlx::Error) -> ReportError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            if db.message().contains("records.handle") || db.message().contains("ciphertexts.handle") {
                ReportError::Rejected(Rejection::DuplicateCiphertext)
            } else {
                ReportError::Rejected(Rejection::DuplicateId)
            }
        }
        _ => ledger_err(e),
    }
}

pub async fn connect(db_url: &str) -> Result<Db, ReportError> {
    let options = SqliteConnectOptions::from_str(db_url)
        .map_err(ledger_err)?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(ledger_err)
}

#[cfg(test)]
/// A private in-memory database.
///
/// Every SQLite connection to `:memory:` is its own database, so the pool is pinned
/// to one connection that never expires.
#[cfg(test)]
pub async fn connect_in_memory() -> Result<Db, ReportError> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .map_err(ledger_err)
}

pub async fn init_schema(db: &Db) -> Result<(), ReportError> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS records (
  id TEXT PRIMARY KEY,
  label TEXT NOT NULL,
  handle TEXT NOT NULL UNIQUE,
  public_aux1 INTEGER NOT NULL,
  public_aux2 INTEGER NOT NULL,
  description TEXT NOT NULL,
  submitter TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  verified INTEGER NOT NULL DEFAULT 0,
  revealed_value INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS ciphertexts (
  handle TEXT PRIMARY KEY,
  payload_json TEXT NOT NULL,
  binding_hex TEXT NOT NULL,
  target TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS decryption_submissions (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  record_id TEXT NOT NULL,
  tx_id TEXT NOT NULL,
  submitter TEXT NOT NULL,
  accepted INTEGER NOT NULL,
  reason TEXT,
  submitted_at TEXT NOT NULL
);
"#,
    )
    .execute(db)
    .await
    .map_err(ledger_err)?;

    Ok(())
}

#[derive(Clone)]
pub struct SqliteLedger {
    db: Db,
    address: String,
    keys: Arc<KeyStore>,
}

impl SqliteLedger {
    pub fn new(db: Db, address: impl Into<String>, keys: Arc<KeyStore>) -> Self {
        Self {
            db,
            address: address.into(),
            keys,
        }
    }

    /// Number of decryption proofs accepted for `id`.
    #[cfg(test)]
    pub async fn accepted_decryptions(&self, id: &str) -> Result<u64, ReportError> {
        let row = sqlx::query(r#"SELECT COUNT(*) AS c FROM decryption_submissions WHERE record_id = ? AND accepted = 1"#)
            .bind(id)
            .fetch_one(&self.db)
            .await
            .map_err(ledger_err)?;
        let c: i64 = row.get("c");
        Ok(c as u64)
    }

    async fn execute_create(&self, tx_id: String, signer: Identity, req: CreateRecord) -> Result<TxReceipt, ReportError> {
        let ctx = binding(&self.address, &signer.address);
        let commitment = req
            .payload
            .commitment
            .to_fr()
            .map_err(|_| ReportError::Rejected(Rejection::InvalidInputProof))?;
        let proof = proof_from_b64(&req.validity_proof).map_err(|_| ReportError::Rejected(Rejection::InvalidInputProof))?;

        let keys = self.keys.ensure().await?;
        tokio::task::spawn_blocking(move || verify_input_proof(keys.input_vk.as_ref(), &proof, commitment, ctx))
            .await
            .map_err(|e| ReportError::LedgerUnreachable(format!("verifier task: {e}")))?
            .map_err(|_| ReportError::Rejected(Rejection::InvalidInputProof))?;

        let handle = FrHex::from_fr(&handle_for(commitment, ctx)).hex;
        let payload_json = serde_json::to_string(&req.payload).map_err(|_| ReportError::Rejected(Rejection::InvalidInputProof))?;

        let mut tx = self.db.begin().await.map_err(ledger_err)?;

        let exists = sqlx::query(r#"SELECT COUNT(*) AS c FROM records WHERE id = ?"#)
            .bind(&req.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(ledger_err)?;
        let c: i64 = exists.get("c");
        if c > 0 {
            return Err(ReportError::Rejected(Rejection::DuplicateId));
        }

        sqlx::query(
            r#"INSERT INTO records
               (id, label, handle, public_aux1, public_aux2, description, submitter, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&req.id)
        .bind(&req.label)
        .bind(&handle)
        .bind(req.public_aux1 as i64)
        .bind(req.public_aux2 as i64)
        .bind(&req.description)
        .bind(&signer.address)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        sqlx::query(r#"INSERT INTO ciphertexts (handle, payload_json, binding_hex, target) VALUES (?, ?, ?, ?)"#)
            .bind(&handle)
            .bind(payload_json)
            .bind(FrHex::from_fr(&ctx).hex)
            .bind(&self.address)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;

        tx.commit().await.map_err(write_err)?;

        info!(record_id = %req.id, %tx_id, "record created");
        Ok(TxReceipt { tx_id, record_id: req.id })
    }

    /// Validate a decryption submission without touching ledger state.
    async fn check_decryption(&self, id: &str, clear_values: &str, decryption_proof: &str) -> Result<u32, ReportError> {
        let row = sqlx::query(r#"SELECT verified, handle FROM records WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(ledger_err)?;
        let Some(row) = row else {
            return Err(ReportError::RecordNotFound(id.to_string()));
        };

        let verified: i64 = row.get(0);
        if verified == 1 {
            return Err(ReportError::Rejected(Rejection::AlreadyVerified));
        }
        let handle: String = row.get(1);
        let stored = self.ciphertext(&handle).await?;

        let values = decode_clear_values(clear_values)
            .map_err(|e| ReportError::Rejected(Rejection::MalformedClearValues(format!("{e}"))))?;
        let [value] = values[..] else {
            return Err(ReportError::Rejected(Rejection::MalformedClearValues(format!(
                "expected one value, got {}",
                values.len()
            ))));
        };
        let value = u32::try_from(value)
            .map_err(|_| ReportError::Rejected(Rejection::MalformedClearValues(format!("{value} exceeds 32 bits"))))?;

        let proofs: Vec<String> = serde_json::from_str(decryption_proof)
            .map_err(|_| ReportError::Rejected(Rejection::InvalidDecryptionProof))?;
        let [proof_b64] = &proofs[..] else {
            return Err(ReportError::Rejected(Rejection::InvalidDecryptionProof));
        };
        let proof = proof_from_b64(proof_b64).map_err(|_| ReportError::Rejected(Rejection::InvalidDecryptionProof))?;

        let commitment = stored
            .payload
            .commitment
            .to_fr()
            .map_err(|e| ReportError::LedgerUnreachable(format!("corrupt ciphertext: {e}")))?;
        let ctx = stored
            .binding
            .to_fr()
            .map_err(|e| ReportError::LedgerUnreachable(format!("corrupt ciphertext: {e}")))?;

        let keys = self.keys.ensure().await?;
        tokio::task::spawn_blocking(move || {
            verify_opening_proof(keys.opening_vk.as_ref(), &proof, commitment, ctx, value)
        })
        .await
        .map_err(|e| ReportError::LedgerUnreachable(format!("verifier task: {e}")))?
        .map_err(|_| ReportError::Rejected(Rejection::InvalidDecryptionProof))?;

        Ok(value)
    }

    /// Apply a decryption submission: the verified flip and its audit row commit together.
    async fn execute_verify(
        &self,
        tx_id: &str,
        signer: &Identity,
        id: &str,
        clear_values: &str,
        decryption_proof: &str,
    ) -> Result<u64, ReportError> {
        let checked = self.check_decryption(id, clear_values, decryption_proof).await;

        let mut tx = self.db.begin().await.map_err(ledger_err)?;

        let outcome = match checked {
            Ok(value) => {
                // Conditional on `verified = 0`: a record flips at most once.
                let res = sqlx::query(r#"UPDATE records SET verified = 1, revealed_value = ? WHERE id = ? AND verified = 0"#)
                    .bind(value as i64)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(ledger_err)?;
                if res.rows_affected() == 0 {
                    Err(ReportError::Rejected(Rejection::AlreadyVerified))
                } else {
                    Ok(value as u64)
                }
            }
            Err(e) => Err(e),
        };

        let reason = outcome.as_ref().err().map(|e| e.to_string());
        sqlx::query(
            r#"INSERT INTO decryption_submissions (record_id, tx_id, submitter, accepted, reason, submitted_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id)
        .bind(tx_id)
        .bind(&signer.address)
        .bind(if outcome.is_ok() { 1i64 } else { 0i64 })
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(ledger_err)?;

        tx.commit().await.map_err(ledger_err)?;

        outcome
    }
}

#[async_trait]
impl LedgerGateway for SqliteLedger {
    fn address(&self) -> &str {
        &self.address
    }

    async fn list_record_ids(&self) -> Result<Vec<String>, ReportError> {
        let rows = sqlx::query(r#"SELECT id FROM records ORDER BY rowid"#)
            .fetch_all(&self.db)
            .await
            .map_err(ledger_err)?;

        Ok(rows.into_iter().map(|row| row.get::<String, _>(0)).collect())
    }

    async fn get_record(&self, id: &str) -> Result<LedgerRecord, ReportError> {
        let row = sqlx::query(
            r#"SELECT id, label, handle, public_aux1, public_aux2, description, submitter, created_at, verified, revealed_value
               FROM records WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(ledger_err)?;

        let Some(row) = row else {
            return Err(ReportError::RecordNotFound(id.to_string()));
        };

        let public_aux1: i64 = row.get(3);
        let public_aux2: i64 = row.get(4);
        let verified: i64 = row.get(8);
        let revealed_value: i64 = row.get(9);

        Ok(LedgerRecord {
            id: row.get(0),
            label: row.get(1),
            encrypted_value_handle: row.get(2),
            public_aux1: public_aux1 as u32,
            public_aux2: public_aux2 as u32,
            description: row.get(5),
            submitter: row.get(6),
            created_at: row.get(7),
            verified: verified == 1,
            revealed_value: revealed_value as u64,
        })
    }

    async fn get_encrypted_handle(&self, id: &str) -> Result<String, ReportError> {
        let row = sqlx::query(r#"SELECT handle FROM records WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(ledger_err)?;

        row.map(|r| r.get::<String, _>(0))
            .ok_or_else(|| ReportError::RecordNotFound(id.to_string()))
    }

    async fn check_availability(&self) -> Result<bool, ReportError> {
        let row = sqlx::query(r#"SELECT 1 AS ok"#)
            .fetch_one(&self.db)
            .await
            .map_err(ledger_err)?;
        let ok: i64 = row.get("ok");
        Ok(ok == 1)
    }

    async fn create_record(&self, signer: &Identity, req: CreateRecord) -> Result<PendingTx, ReportError> {
        let ledger = self.clone();
        let signer = signer.clone();

        Ok(PendingTx::spawn(move |tx_id| async move { ledger.execute_create(tx_id, signer, req).await }))
    }

    async fn submit_decryption_proof(
        &self,
        signer: &Identity,
        id: &str,
        clear_values: &str,
        decryption_proof: &str,
    ) -> Result<PendingTx, ReportError> {
        let ledger = self.clone();
        let signer = signer.clone();
        let id = id.to_string();
        let clear_values = clear_values.to_string();
        let decryption_proof = decryption_proof.to_string();

        Ok(PendingTx::spawn(move |tx_id| async move {
            match ledger.execute_verify(&tx_id, &signer, &id, &clear_values, &decryption_proof).await {
                Ok(value) => {
                    info!(record_id = %id, %tx_id, value, "decryption verified");
                    Ok(TxReceipt { tx_id, record_id: id })
                }
                Err(e) => {
                    warn!(record_id = %id, %tx_id, error = %e, "decryption proof rejected");
                    Err(e)
                }
            }
        }))
    }
}

#[async_trait]
impl CiphertextSource for SqliteLedger {
    async fn ciphertext(&self, handle: &str) -> Result<StoredCiphertext, ReportError> {
        let row = sqlx::query(r#"SELECT payload_json, binding_hex, target FROM ciphertexts WHERE handle = ?"#)
            .bind(handle)
            .fetch_optional(&self.db)
            .await
            .map_err(ledger_err)?;

        let Some(row) = row else {
            return Err(ReportError::RecordNotFound(format!("handle {handle}")));
        };

        let payload_json: String = row.get(0);
        let payload: EncryptedPayload = serde_json::from_str(&payload_json)
            .map_err(|e| ReportError::LedgerUnreachable(format!("corrupt ciphertext: {e}")))?;

        Ok(StoredCiphertext {
            handle: handle.to_string(),
            payload,
            binding: FrHex { hex: row.get(1) },
            target: row.get(2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Harness;
    use noise_sealing::types::encode_clear_values;

    async fn create(h: &Harness, id: &str, submitter: &str, value: u32) -> Result<TxReceipt, ReportError> {
        let input = h.compute.encrypt_u32(h.ledger.address(), submitter, value).await?;
        let signer = Identity { address: submitter.to_string() };
        let req = CreateRecord {
            id: id.to_string(),
            label: "Station".into(),
            payload: input.payload,
            validity_proof: input.validity_proof,
            public_aux1: 3,
            public_aux2: 0,
            description: "night traffic".into(),
        };
        h.ledger.create_record(&signer, req).await?.wait().await
    }

    #[tokio::test]
    async fn created_records_are_listed_unverified() {
        let h = Harness::new().await;
        create(&h, "noise-a", "0xalice", 61).await.unwrap();
        create(&h, "noise-b", "0xbob", 62).await.unwrap();

        assert_eq!(h.ledger.list_record_ids().await.unwrap(), vec!["noise-a", "noise-b"]);

        let rec = h.ledger.get_record("noise-a").await.unwrap();
        assert!(!rec.verified);
        assert_eq!(rec.submitter, "0xalice");
        assert_eq!(rec.public_aux1, 3);
        assert_eq!(h.ledger.get_encrypted_handle("noise-a").await.unwrap(), rec.encrypted_value_handle);
        assert!(h.ledger.check_availability().await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let h = Harness::new().await;
        create(&h, "noise-a", "0xalice", 61).await.unwrap();
        let err = create(&h, "noise-a", "0xalice", 61).await.unwrap_err();
        assert!(matches!(err, ReportError::Rejected(Rejection::DuplicateId)));
    }

    #[tokio::test]
    async fn input_proof_must_match_the_signer() {
        let h = Harness::new().await;
        let input = h.compute.encrypt_u32(h.ledger.address(), "0xalice", 50).await.unwrap();
        let req = CreateRecord {
            id: "noise-x".into(),
            label: "x".into(),
            payload: input.payload,
            validity_proof: input.validity_proof,
            public_aux1: 0,
            public_aux2: 0,
            description: String::new(),
        };

        let mallory = Identity { address: "0xmallory".into() };
        let err = h.ledger.create_record(&mallory, req).await.unwrap().wait().await.unwrap_err();
        assert!(matches!(err, ReportError::Rejected(Rejection::InvalidInputProof)));
        assert!(h.ledger.list_record_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn decryption_proofs_are_checked_and_applied_once() {
        let h = Harness::new().await;
        create(&h, "noise-a", "0xalice", 77).await.unwrap();
        let handle = h.ledger.get_encrypted_handle("noise-a").await.unwrap();
        let signer = Identity { address: "0xbob".into() };

        let dec = h.compute.public_decrypt(&[handle.clone()], h.ledger.address()).await.unwrap();
        assert_eq!(dec.clear_values[&handle], 77);

        // A lie about the cleartext does not verify.
        let forged = encode_clear_values(&[78]);
        let err = h
            .ledger
            .submit_decryption_proof(&signer, "noise-a", &forged, &dec.decryption_proof)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Rejected(Rejection::InvalidDecryptionProof)));

        h.ledger
            .submit_decryption_proof(&signer, "noise-a", &dec.encoded_clear_values, &dec.decryption_proof)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let rec = h.ledger.get_record("noise-a").await.unwrap();
        assert!(rec.verified);
        assert_eq!(rec.revealed_value, 77);

        let err = h
            .ledger
            .submit_decryption_proof(&signer, "noise-a", &dec.encoded_clear_values, &dec.decryption_proof)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Rejected(Rejection::AlreadyVerified)));
        assert_eq!(h.ledger.accepted_decryptions("noise-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_records_are_not_found() {
        let h = Harness::new().await;
        assert!(matches!(h.ledger.get_record("nope").await, Err(ReportError::RecordNotFound(_))));
        assert!(matches!(h.ledger.get_encrypted_handle("nope").await, Err(ReportError::RecordNotFound(_))));

        let signer = Identity { address: "0xbob".into() };
        let err = h
            .ledger
            .submit_decryption_proof(&signer, "nope", &encode_clear_values(&[1]), "[]")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn reused_ciphertext_is_declined() {
        let h = Harness::new().await;
        let input = h.compute.encrypt_u32(h.ledger.address(), "0xalice", 61).await.unwrap();
        let signer = Identity { address: "0xalice".into() };
        let req = |id: &str| CreateRecord {
            id: id.to_string(),
            label: "Station".into(),
            payload: input.payload.clone(),
            validity_proof: input.validity_proof.clone(),
            public_aux1: 3,
            public_aux2: 0,
            description: String::new(),
        };

        h.ledger.create_record(&signer, req("noise-a")).await.unwrap().wait().await.unwrap();
        let err = h.ledger.create_record(&signer, req("noise-b")).await.unwrap().wait().await.unwrap_err();

        assert!(matches!(err, ReportError::Rejected(Rejection::DuplicateCiphertext)));
        assert_eq!(h.ledger.list_record_ids().await.unwrap(), vec!["noise-a"]);
    }

    #[tokio::test]
    async fn primary_key_collisions_are_duplicate_ids() {
        let h = Harness::new().await;
        let insert = |handle: &'static str| {
            sqlx::query(
                r#"INSERT INTO records
                   (id, label, handle, public_aux1, public_aux2, description, submitter, created_at)
                   VALUES ('noise-a', 'x', ?, 0, 0, '', '0xalice', 0)"#,
            )
            .bind(handle)
        };

        insert("h1").execute(&h.ledger.db).await.unwrap();
        let err = insert("h2").execute(&h.ledger.db).await.map_err(write_err).unwrap_err();
        assert!(matches!(err, ReportError::Rejected(Rejection::DuplicateId)));

        let err = sqlx::query("SELECT * FROM no_such_table")
            .execute(&h.ledger.db)
            .await
            .map_err(write_err)
            .unwrap_err();
        assert!(matches!(err, ReportError::LedgerUnreachable(_)));
    }

    #[tokio::test]
    async fn verification_and_audit_commit_together() {
        let h = Harness::new().await;
        create(&h, "noise-a", "0xalice", 44).await.unwrap();
        let handle = h.ledger.get_encrypted_handle("noise-a").await.unwrap();
        let dec = h.compute.public_decrypt(&[handle], h.ledger.address()).await.unwrap();
        let signer = Identity { address: "0xbob".into() };
        let submit = || async {
            h.ledger
                .submit_decryption_proof(&signer, "noise-a", &dec.encoded_clear_values, &dec.decryption_proof)
                .await
                .unwrap()
                .wait()
                .await
        };

        // Without the audit table the whole write fails and nothing flips.
        sqlx::query("DROP TABLE decryption_submissions").execute(&h.ledger.db).await.unwrap();
        assert!(matches!(submit().await, Err(ReportError::LedgerUnreachable(_))));
        assert!(!h.ledger.get_record("noise-a").await.unwrap().verified);

        init_schema(&h.ledger.db).await.unwrap();
        let forged = encode_clear_values(&[45]);
        h.ledger
            .submit_decryption_proof(&signer, "noise-a", &forged, &dec.decryption_proof)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        submit().await.unwrap();

        let rec = h.ledger.get_record("noise-a").await.unwrap();
        assert!(rec.verified);
        assert_eq!(rec.revealed_value, 44);
        assert_eq!(h.ledger.accepted_decryptions("noise-a").await.unwrap(), 1);

        let rejected: i64 = sqlx::query(r#"SELECT COUNT(*) FROM decryption_submissions WHERE accepted = 0"#)
            .fetch_one(&h.ledger.db)
            .await
            .unwrap()
            .get(0);
        assert_eq!(rejected, 1);
    }
}
