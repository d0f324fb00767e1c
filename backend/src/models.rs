use crate::errors::ReportError;
use serde::{Deserialize, Serialize};

/// Number of coarse areas a record can be attributed to.
pub const LOCATION_AREAS: u64 = 100;

/// One record as the ledger reports it.
///
/// `revealed_value` is whatever the ledger stores; it only means something when
/// `verified` is set. Use [`ConfidentialRecord`] for anything user-facing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: String,
    pub label: String,
    pub encrypted_value_handle: String,
    pub public_aux1: u32,
    pub public_aux2: u32,
    pub description: String,
    pub submitter: String,
    pub created_at: i64,
    pub verified: bool,
    pub revealed_value: u64,
}

/// One reporter's submission plus its public metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidentialRecord {
    pub id: String,
    pub label: String,
    pub encrypted_value_handle: String,
    /// Public classification hint ("category").
    pub public_aux1: u32,
    pub public_aux2: u32,
    pub description: String,
    pub submitter: String,
    /// Seconds since epoch, ledger time.
    pub created_at: i64,
    pub verified: bool,
    /// Ledger-confirmed cleartext. `None` unless `verified`.
    pub revealed_value: Option<u64>,
    /// Coarse, non-identifying area label.
    pub location_hint: String,
}

impl From<LedgerRecord> for ConfidentialRecord {
    fn from(r: LedgerRecord) -> Self {
        let location_hint = location_hint_for(&r.id);
        Self {
            revealed_value: r.verified.then_some(r.revealed_value),
            id: r.id,
            label: r.label,
            encrypted_value_handle: r.encrypted_value_handle,
            public_aux1: r.public_aux1,
            public_aux2: r.public_aux2,
            description: r.description,
            submitter: r.submitter,
            created_at: r.created_at,
            verified: r.verified,
            location_hint,
        }
    }
}

impl ConfidentialRecord {
    /// Value used by aggregates: the revealed value when verified, else `public_aux1`.
    pub fn effective_value(&self) -> u64 {
        match self.revealed_value {
            Some(v) if self.verified => v,
            _ => self.public_aux1 as u64,
        }
    }
}

/// 64-bit FNV-1a. Stable across builds, which `DefaultHasher` is not.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

/// Derive the area label for a record id.
///
/// Only the id goes in, so the label carries nothing about where the reporter is.
pub fn location_hint_for(id: &str) -> String {
    format!("Area {}", fnv1a(id.as_bytes()) % LOCATION_AREAS)
}

/// Output of the identity provider for one caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub connected: bool,
    pub address: Option<String>,
}

/// An authenticated identity allowed to sign ledger writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub address: String,
}

impl Session {
    #[cfg(test)]
    pub fn connected(address: impl Into<String>) -> Self {
        Self {
            connected: true,
            address: Some(address.into()),
        }
    }

    #[cfg(test)]
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Result<Identity, ReportError> {
        match (&self.connected, &self.address) {
            (true, Some(address)) if !address.trim().is_empty() => Ok(Identity {
                address: address.trim().to_string(),
            }),
            _ => Err(ReportError::NotAuthenticated),
        }
    }
}

/// What a reporter fills in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportInput {
    pub label: String,
    /// Sensitive reading. Encrypted before it leaves the process.
    pub decibel: i64,
    pub category: u32,
    pub public_aux2: u32,
    pub description: String,
}

/// A report with its id fixed, ready to be (re)submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedReport {
    pub id: String,
    pub input: ReportInput,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportRequest {
    pub label: String,
    pub decibel: i64,
    pub category: Option<u32>,
    pub public_aux2: Option<u32>,
    pub description: Option<String>,

    /// Reuse an id from a failed attempt to retry the same submission.
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    pub id: String,
    pub tx_id: String,
    pub record: Option<ConfidentialRecord>,
}

/// How a reveal reached its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealPath {
    /// The record was already verified; no cryptographic work was done.
    AlreadyOnLedger,
    /// This call's decryption proof was accepted.
    Verified,
    /// Another actor's proof landed first.
    VerifiedConcurrently,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealResponse {
    pub id: String,
    pub value: u64,
    pub path: RevealPath,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordListResponse {
    pub total: usize,
    pub records: Vec<ConfidentialRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_record(verified: bool, revealed: u64) -> LedgerRecord {
        LedgerRecord {
            id: "noise-1".into(),
            label: "Main St".into(),
            encrypted_value_handle: "ab".into(),
            public_aux1: 7,
            public_aux2: 0,
            description: String::new(),
            submitter: "0xalice".into(),
            created_at: 0,
            verified,
            revealed_value: revealed,
        }
    }

    #[test]
    fn unverified_records_hide_the_ledger_value() {
        let r = ConfidentialRecord::from(ledger_record(false, 99));
        assert_eq!(r.revealed_value, None);
        assert_eq!(r.effective_value(), 7);

        let r = ConfidentialRecord::from(ledger_record(true, 0));
        assert_eq!(r.revealed_value, Some(0));
        assert_eq!(r.effective_value(), 0);
    }

    #[test]
    fn location_hint_is_stable_and_coarse() {
        let a = location_hint_for("noise-1700000000000-0a0b0c0d");
        assert_eq!(a, location_hint_for("noise-1700000000000-0a0b0c0d"));
        let n: u64 = a.trim_start_matches("Area ").parse().unwrap();
        assert!(n < LOCATION_AREAS);
    }

    #[test]
    fn session_requires_an_address() {
        assert!(Session::connected("0xalice").identity().is_ok());
        assert!(matches!(Session::disconnected().identity(), Err(ReportError::NotAuthenticated)));
        let no_address = Session { connected: true, address: None };
        assert!(no_address.identity().is_err());
        assert!(Session::connected("  ").identity().is_err());
    }
}
