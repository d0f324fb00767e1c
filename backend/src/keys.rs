use crate::errors::ReportError;
use ark_bn254::Bn254;
use ark_groth16::{ProvingKey, VerifyingKey};
use noise_sealing::groth16::{
    deserialize_pk, deserialize_vk, serialize_pk, serialize_vk, setup_input_keys, setup_opening_keys, ZkError,
};
use noise_sealing::seal::SealingKey;
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Groth16 keys for both sealed-value circuits.
#[derive(Clone)]
pub struct ZkKeys {
    pub input_pk: Arc<ProvingKey<Bn254>>,
    pub input_vk: Arc<VerifyingKey<Bn254>>,
    pub opening_pk: Arc<ProvingKey<Bn254>>,
    pub opening_vk: Arc<VerifyingKey<Bn254>>,
}

impl ZkKeys {
    /// Run the prototype trusted setup for both circuits.
    pub fn generate(rng: &mut impl rand::RngCore) -> Result<Self, ZkError> {
        let (input_pk, input_vk) = setup_input_keys(rng)?;
        let (opening_pk, opening_vk) = setup_opening_keys(rng)?;
        Ok(Self {
            input_pk: Arc::new(input_pk),
            input_vk: Arc::new(input_vk),
            opening_pk: Arc::new(opening_pk),
            opening_vk: Arc::new(opening_vk),
        })
    }
}

/// Lazily materialized proof keys and sealing secret.
///
/// With a directory, keys are read from `<dir>/keys` when present and written there
/// after the first setup. Without one they live in memory for the process lifetime.
pub struct KeyStore {
    dir: Option<PathBuf>,
    keys: OnceCell<ZkKeys>,
    sealing: OnceCell<SealingKey>,
}

fn io_err(e: std::io::Error) -> ReportError {
    ReportError::ComputeFailed(format!("key storage: {e}"))
}

fn zk_err(e: ZkError) -> ReportError {
    ReportError::ComputeFailed(format!("{e}"))
}

impl KeyStore {
    pub fn persistent(data_dir: &Path) -> Self {
        Self {
            dir: Some(data_dir.join("keys")),
            keys: OnceCell::new(),
            sealing: OnceCell::new(),
        }
    }

    /// A store whose proof keys already exist, e.g. shared across tests.
    #[cfg(test)]
    pub fn preloaded(keys: ZkKeys) -> Self {
        Self {
            dir: None,
            keys: OnceCell::from(keys),
            sealing: OnceCell::new(),
        }
    }

    /// Ensure Groth16 keys exist on disk and in memory.
    ///
    /// This runs the trusted setup (prototype) on first use.
    pub async fn ensure(&self) -> Result<ZkKeys, ReportError> {
        let dir = self.dir.clone();

        self.keys
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || {
                    let Some(keys_dir) = dir else {
                        tracing::info!("running in-memory groth16 setup");
                        return ZkKeys::generate(&mut OsRng).map_err(zk_err);
                    };
                    std::fs::create_dir_all(&keys_dir).map_err(io_err)?;

                    let paths = [
                        keys_dir.join("input_pk.bin"),
                        keys_dir.join("input_vk.bin"),
                        keys_dir.join("opening_pk.bin"),
                        keys_dir.join("opening_vk.bin"),
                    ];

                    if paths.iter().all(|p| p.exists()) {
                        let read = |p: &PathBuf| std::fs::read(p).map_err(io_err);
                        return Ok(ZkKeys {
                            input_pk: Arc::new(deserialize_pk(&read(&paths[0])?).map_err(zk_err)?),
                            input_vk: Arc::new(deserialize_vk(&read(&paths[1])?).map_err(zk_err)?),
                            opening_pk: Arc::new(deserialize_pk(&read(&paths[2])?).map_err(zk_err)?),
                            opening_vk: Arc::new(deserialize_vk(&read(&paths[3])?).map_err(zk_err)?),
                        });
                    }

                    tracing::info!(dir = %keys_dir.display(), "running groth16 setup");
                    let keys = ZkKeys::generate(&mut OsRng).map_err(zk_err)?;

                    std::fs::write(&paths[0], serialize_pk(&keys.input_pk).map_err(zk_err)?).map_err(io_err)?;
                    std::fs::write(&paths[1], serialize_vk(&keys.input_vk).map_err(zk_err)?).map_err(io_err)?;
                    std::fs::write(&paths[2], serialize_pk(&keys.opening_pk).map_err(zk_err)?).map_err(io_err)?;
                    std::fs::write(&paths[3], serialize_vk(&keys.opening_vk).map_err(zk_err)?).map_err(io_err)?;

                    Ok(keys)
                })
                .await
                .map_err(|e| ReportError::ComputeFailed(format!("setup task: {e}")))?
            })
            .await
            .cloned()
    }

    /// Load or create the sealing secret.
    pub async fn sealing_key(&self) -> Result<SealingKey, ReportError> {
        let dir = self.dir.clone();

        self.sealing
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || {
                    let Some(keys_dir) = dir else {
                        return Ok(SealingKey::generate(&mut OsRng));
                    };
                    std::fs::create_dir_all(&keys_dir).map_err(io_err)?;

                    let path = keys_dir.join("sealing.key");
                    if path.exists() {
                        let bytes = std::fs::read(&path).map_err(io_err)?;
                        return SealingKey::from_bytes(&bytes).map_err(zk_err);
                    }

                    let key = SealingKey::generate(&mut OsRng);
                    std::fs::write(&path, key.to_bytes().map_err(zk_err)?).map_err(io_err)?;
                    Ok(key)
                })
                .await
                .map_err(|e| ReportError::ComputeFailed(format!("sealing key task: {e}")))?
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sealing_key_survives_a_restart() {
        let data_dir = std::env::temp_dir().join(format!("noise-keys-{}", uuid::Uuid::new_v4()));

        let first = KeyStore::persistent(&data_dir).sealing_key().await.unwrap();
        assert!(data_dir.join("keys").join("sealing.key").exists());

        let reloaded = KeyStore::persistent(&data_dir).sealing_key().await.unwrap();
        assert_eq!(first.to_bytes().unwrap(), reloaded.to_bytes().unwrap());

        std::fs::remove_dir_all(&data_dir).unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sealing_key_loads_on_a_single_threaded_runtime() {
        let data_dir = std::env::temp_dir().join(format!("noise-keys-{}", uuid::Uuid::new_v4()));
        let store = KeyStore::persistent(&data_dir);

        let (a, b) = tokio::join!(store.sealing_key(), store.sealing_key());
        assert_eq!(a.unwrap().to_bytes().unwrap(), b.unwrap().to_bytes().unwrap());

        std::fs::remove_dir_all(&data_dir).unwrap();
    }
}
