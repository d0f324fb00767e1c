use crate::errors::ApiError;
use crate::notifier::StatusTimings;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LEDGER_ADDRESS: &str = "0x4e6f6973654c65646765720000000000000000a1";

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub data_dir: PathBuf,
    pub api_key: String,
    pub ledger_address: String,
    pub timings: StatusTimings,
}

impl Config {
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let millis = |key: &str, default: u64| -> Result<Duration, ApiError> {
            match get(key) {
                None => Ok(Duration::from_millis(default)),
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| ApiError::Config(format!("{key} must be a number of milliseconds, got {v:?}"))),
            }
        };

        // In production, API_KEY must be a strong secret.
        Ok(Self {
            addr: get("BACKEND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            data_dir: PathBuf::from(get("NOISE_DATA_DIR").unwrap_or_else(|| "data".to_string())),
            api_key: get("API_KEY").unwrap_or_else(|| "dev-secret-key".to_string()),
            ledger_address: get("LEDGER_ADDRESS").unwrap_or_else(|| DEFAULT_LEDGER_ADDRESS.to_string()),
            timings: StatusTimings {
                success: millis("STATUS_SUCCESS_MS", 2000)?,
                error: millis("STATUS_ERROR_MS", 3000)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(c.addr, "127.0.0.1:8080");
        assert_eq!(c.data_dir, PathBuf::from("data"));
        assert_eq!(c.api_key, "dev-secret-key");
        assert_eq!(c.ledger_address, DEFAULT_LEDGER_ADDRESS);
        assert_eq!(c.timings.success, Duration::from_secs(2));
        assert_eq!(c.timings.error, Duration::from_secs(3));
    }

    #[test]
    fn overrides_and_bad_timings() {
        let c = Config::from_lookup(lookup(&[("STATUS_SUCCESS_MS", "500"), ("API_KEY", "s3cret")])).unwrap();
        assert_eq!(c.timings.success, Duration::from_millis(500));
        assert_eq!(c.api_key, "s3cret");

        let err = Config::from_lookup(lookup(&[("STATUS_ERROR_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }
}
