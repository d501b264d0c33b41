use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use fermctl_common::{validate_identities, RuntimeConfig, RUNTIME_OWNED_KEYS};

#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FERMCTL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.fermctl"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.into().join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn runtime_path(&self) -> &Path {
        self.runtime_path.as_path()
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        let raw = match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(RuntimeConfig::default()),
            Err(err) => return Err(err.into()),
        };
        let runtime = serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid {}", self.runtime_path.display()))?;
        validate_identities(&runtime)
            .with_context(|| format!("rejected {}", self.runtime_path.display()))?;
        Ok(runtime)
    }

    pub async fn load_snapshot(&self) -> anyhow::Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<Value>(&raw)
                .map(Some)
                .with_context(|| format!("invalid {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let payload = serde_json::to_vec_pretty(runtime)?;
        self.write(payload).await
    }

    /// Writes only the runtime-owned keys, so hand edits to the rest of the file
    /// survive until the next reload picks them up. A file that does not parse is
    /// never replaced here.
    pub async fn save_runtime_state(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let Value::Object(current) = serde_json::to_value(runtime)? else {
            anyhow::bail!("runtime state did not serialize to an object");
        };

        let mut document = match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => match serde_json::from_slice::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                _ => anyhow::bail!(
                    "{} is not a JSON object; leaving it for the user to fix",
                    self.runtime_path.display()
                ),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => current.clone(),
            Err(err) => return Err(err.into()),
        };
        merge_runtime_owned(&mut document, &current);

        let payload = serde_json::to_vec_pretty(&Value::Object(document))?;
        self.write(payload).await
    }

    async fn write(&self, payload: Vec<u8>) -> anyhow::Result<()> {
        let path = self.runtime_path.as_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, payload)
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

fn merge_runtime_owned(document: &mut Map<String, Value>, current: &Map<String, Value>) {
    for key in RUNTIME_OWNED_KEYS {
        match current.get(*key) {
            Some(value) => document.insert((*key).to_string(), value.clone()),
            None => document.remove(*key),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fermctl_common::ControlStatus;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path());

        assert_eq!(store.load_runtime_config().await.unwrap(), RuntimeConfig::default());
        assert!(store.load_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path().join("nested"));
        let runtime = RuntimeConfig {
            low_limit: Some(64.0),
            high_limit: Some(66.0),
            heater_on: true,
            ..RuntimeConfig::default()
        };

        store.save_runtime_config(&runtime).await.unwrap();

        assert_eq!(store.load_runtime_config().await.unwrap(), runtime);
    }

    #[tokio::test]
    async fn state_save_keeps_hand_edited_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path());
        tokio::fs::write(
            store.runtime_path(),
            serde_json::to_vec(&json!({"low_limit": 50.0, "high_limit": 52.0, "extra": 1})).unwrap(),
        )
        .await
        .unwrap();

        let runtime = RuntimeConfig {
            low_limit: Some(64.0),
            cooler_on: true,
            status: ControlStatus::Cooling,
            ..RuntimeConfig::default()
        };
        store.save_runtime_state(&runtime).await.unwrap();

        let snapshot = store.load_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot["low_limit"], json!(50.0));
        assert_eq!(snapshot["extra"], json!(1));
        assert_eq!(snapshot["cooler_on"], json!(true));
        assert_eq!(snapshot["status"], json!("cooling"));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path());
        tokio::fs::write(store.runtime_path(), b"{ not json").await.unwrap();

        assert!(store.load_runtime_config().await.is_err());
        assert!(store.load_snapshot().await.is_err());
    }

    #[tokio::test]
    async fn shared_endpoint_on_disk_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path());
        let shared = json!({"heater_endpoint": "plug-1", "cooler_endpoint": "plug-1"});
        tokio::fs::write(store.runtime_path(), serde_json::to_vec(&shared).unwrap())
            .await
            .unwrap();

        assert!(store.load_runtime_config().await.is_err());
    }

    #[tokio::test]
    async fn state_save_never_replaces_an_unparsable_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path());
        let hand_edit = br#"{"low_limit": 64.0, "high_limit": 66.0, "heater_endpoint": "heater-plug",}"#;
        tokio::fs::write(store.runtime_path(), hand_edit).await.unwrap();

        let runtime = store.load_runtime_config().await.unwrap_or_default();
        assert!(store.save_runtime_state(&runtime).await.is_err());

        let on_disk = tokio::fs::read(store.runtime_path()).await.unwrap();
        assert_eq!(on_disk, hand_edit.to_vec());
    }
}
