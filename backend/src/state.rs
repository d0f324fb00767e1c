use crate::compute::ConfidentialCompute;
use crate::config::Config;
use crate::coprocessor::LocalCoprocessor;
use crate::db::{Db, SqliteLedger};
use crate::keys::KeyStore;
use crate::notifier::StatusNotifier;
use crate::orchestrator::ReportOrchestrator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ReportOrchestrator>,
    pub api_key: Arc<str>,
}

impl AppState {
    /// Wire the ledger, the coprocessor and the orchestrator over one database.
    pub fn new(db: Db, keys: Arc<KeyStore>, config: &Config) -> Self {
        let ledger = Arc::new(SqliteLedger::new(db, config.ledger_address.clone(), keys.clone()));
        let compute: Arc<dyn ConfidentialCompute> = Arc::new(LocalCoprocessor::new(keys, ledger.clone()));
        let notifier = StatusNotifier::new(config.timings);

        Self::from_parts(Arc::new(ReportOrchestrator::new(ledger, compute, notifier)), &config.api_key)
    }

    pub fn from_parts(orchestrator: Arc<ReportOrchestrator>, api_key: &str) -> Self {
        Self {
            orchestrator,
            api_key: Arc::from(api_key),
        }
    }
}
