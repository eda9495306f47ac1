use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Artifact, ArtifactKey, ArtifactMetadata, ArtifactStore};
use crate::ml::model::StackedLstm;
use crate::ml::scaler::ScalerBank;

const CURRENT_FILE: &str = "CURRENT";
const MODEL_FILE: &str = "model.json";
const SCALERS_FILE: &str = "scalers.json";
const METADATA_FILE: &str = "metadata.json";

/// Artifact store on the local filesystem.
///
/// Layout: `{root}/{TICKER}_{interval}/{run_id}/{model,scalers,metadata}.json`
/// plus a `CURRENT` file naming the live run. A save writes a fresh run
/// directory and then swaps `CURRENT` with a write-then-rename, so a reader
/// sees either the old artifact or the new one. The run that was live before
/// the swap is kept for readers still holding its id; older runs are pruned.
/// Per-key save locks live only while a save for that key is in progress.
pub struct FileArtifactStore {
    root: PathBuf,
    locks: Mutex<HashMap<ArtifactKey, Arc<Mutex<()>>>>,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_dir(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.slug())
    }

    async fn key_lock(&self, key: &ArtifactKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Drop the key's lock entry once no other save holds or awaits it
    async fn release_key_lock(&self, key: &ArtifactKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    async fn current_run(&self, key: &ArtifactKey) -> Result<Option<String>> {
        let path = self.key_dir(key).join(CURRENT_FILE);
        match fs::read_to_string(&path).await {
            Ok(contents) => {
                let run = contents.trim().to_string();
                if run.is_empty() {
                    Err(anyhow!("Empty {} pointer for {}", CURRENT_FILE, key))
                } else {
                    Ok(Some(run))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }

    async fn save_locked(&self, key: &ArtifactKey, artifact: &Artifact) -> Result<()> {
        let key_dir = self.key_dir(key);
        let run = artifact.metadata.run_id.to_string();
        let run_dir = key_dir.join(&run);
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create {}", run_dir.display()))?;

        fs::write(run_dir.join(MODEL_FILE), artifact.model.to_json()?).await?;
        fs::write(run_dir.join(SCALERS_FILE), artifact.scalers.to_json()?).await?;
        fs::write(run_dir.join(METADATA_FILE), serde_json::to_string_pretty(&artifact.metadata)?).await?;

        let previous = self.current_run(key).await;
        Self::write_atomic(&key_dir.join(CURRENT_FILE), run.as_bytes()).await?;
        info!("Saved artifact {} (run {}) to {}", key, run, run_dir.display());

        // without the old pointer the live run for in-flight readers is unknown
        let previous = match previous {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Skipping prune for {}: previous run unreadable: {:#}", key, e);
                return Ok(());
            }
        };
        let mut keep = vec![run.as_str()];
        if let Some(prev) = previous.as_deref() {
            keep.push(prev);
        }
        if let Err(e) = self.prune(&key_dir, &keep).await {
            warn!("Failed to prune old runs for {}: {}", key, e);
        }
        Ok(())
    }

    async fn prune(&self, key_dir: &Path, keep: &[&str]) -> Result<()> {
        let mut entries = fs::read_dir(key_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if keep.contains(&name.as_str()) {
                continue;
            }
            fs::remove_dir_all(entry.path()).await?;
            info!("Pruned stale artifact run {}", entry.path().display());
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        match self.current_run(key).await? {
            Some(run) => Ok(fs::try_exists(self.key_dir(key).join(run).join(MODEL_FILE)).await?),
            None => Ok(false),
        }
    }

    async fn load(&self, key: &ArtifactKey) -> Result<Option<Artifact>> {
        let run = match self.current_run(key).await? {
            Some(run) => run,
            None => return Ok(None),
        };
        let run_dir = self.key_dir(key).join(&run);

        let model_json = fs::read_to_string(run_dir.join(MODEL_FILE))
            .await
            .with_context(|| format!("Failed to read model for {} (run {})", key, run))?;
        let scalers_json = fs::read_to_string(run_dir.join(SCALERS_FILE))
            .await
            .with_context(|| format!("Failed to read scalers for {} (run {})", key, run))?;
        let metadata_json = fs::read_to_string(run_dir.join(METADATA_FILE))
            .await
            .with_context(|| format!("Failed to read metadata for {} (run {})", key, run))?;

        let model = StackedLstm::from_json(&model_json)
            .with_context(|| format!("Corrupt model for {}", key))?;
        let scalers = ScalerBank::from_json(&scalers_json)
            .with_context(|| format!("Corrupt scalers for {}", key))?;
        let metadata: ArtifactMetadata = serde_json::from_str(&metadata_json)
            .with_context(|| format!("Corrupt metadata for {}", key))?;

        info!("Loaded artifact {} (run {}) from {}", key, run, run_dir.display());
        Ok(Some(Artifact { model, scalers, metadata }))
    }

    async fn save(&self, key: &ArtifactKey, artifact: &Artifact) -> Result<()> {
        let lock = self.key_lock(key).await;
        let result = {
            let _guard = lock.lock().await;
            self.save_locked(key, artifact).await
        };
        self.release_key_lock(key, lock).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::metrics::RegressionMetrics;
    use chrono::Utc;
    use ndarray::{array, Array2};
    use uuid::Uuid;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("stock-forecaster-{}-{}", name, Uuid::new_v4()))
    }

    fn artifact(key: &ArtifactKey, seed: u64) -> Artifact {
        let features = array![[10.0, 11.0, 500.0], [12.0, 13.0, 700.0], [9.0, 10.0, 300.0]];
        Artifact {
            model: StackedLstm::new(3, &[4, 3], seed).unwrap(),
            scalers: ScalerBank::fit(&features).unwrap(),
            metadata: ArtifactMetadata {
                run_id: Uuid::new_v4(),
                ticker: key.ticker().to_string(),
                interval: key.interval().to_string(),
                window: 3,
                hidden_sizes: vec![4, 3],
                trained_at: Utc::now(),
                train_samples: 8,
                test_samples: 2,
                final_loss: Some(0.01),
                metrics: RegressionMetrics::compute(&[1.0, 2.0], &[1.5, 2.0]),
            },
        }
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let store = FileArtifactStore::new(scratch_dir("missing"));
        let key = ArtifactKey::new("AAPL", "1d").unwrap();
        assert!(!store.exists(&key).await.unwrap());
        assert!(store.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_reproduces_behaviour() {
        let root = scratch_dir("roundtrip");
        let store = FileArtifactStore::new(&root);
        let key = ArtifactKey::new("msft", "1d").unwrap();
        let saved = artifact(&key, 1);

        store.save(&key, &saved).await.unwrap();
        assert!(store.exists(&key).await.unwrap());

        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded.scalers, saved.scalers);
        assert_eq!(loaded.metadata.run_id, saved.metadata.run_id);
        assert_eq!(loaded.metadata.ticker, "MSFT");

        let window = Array2::from_elem((3, 3), 0.25);
        use crate::ml::model::SequenceModel;
        assert!((loaded.model.predict(window.view()) - saved.model.predict(window.view())).abs() < 1e-12);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_resave_replaces_and_prunes() {
        let root = scratch_dir("resave");
        let store = FileArtifactStore::new(&root);
        let key = ArtifactKey::new("TSLA", "1h").unwrap();

        let first = artifact(&key, 1);
        let second = artifact(&key, 2);
        let third = artifact(&key, 3);
        store.save(&key, &first).await.unwrap();
        store.save(&key, &second).await.unwrap();
        store.save(&key, &third).await.unwrap();

        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded.metadata.run_id, third.metadata.run_id);

        let key_dir = root.join(key.slug());
        assert!(!key_dir.join(first.metadata.run_id.to_string()).exists());
        assert!(key_dir.join(second.metadata.run_id.to_string()).exists());
        assert!(key_dir.join(third.metadata.run_id.to_string()).exists());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_corrupt_model_is_an_error() {
        let root = scratch_dir("corrupt");
        let store = FileArtifactStore::new(&root);
        let key = ArtifactKey::new("NFLX", "1d").unwrap();
        let saved = artifact(&key, 4);
        store.save(&key, &saved).await.unwrap();

        let model_path = root
            .join(key.slug())
            .join(saved.metadata.run_id.to_string())
            .join(MODEL_FILE);
        std::fs::write(&model_path, "{not json").unwrap();

        assert!(store.load(&key).await.is_err());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_unreadable_pointer_keeps_existing_runs() {
        let root = scratch_dir("pointer");
        let store = FileArtifactStore::new(&root);
        let key = ArtifactKey::new("AMZN", "1d").unwrap();

        let first = artifact(&key, 1);
        let second = artifact(&key, 2);
        store.save(&key, &first).await.unwrap();
        store.save(&key, &second).await.unwrap();

        let key_dir = root.join(key.slug());
        std::fs::write(key_dir.join(CURRENT_FILE), "").unwrap();

        let third = artifact(&key, 3);
        store.save(&key, &third).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap().unwrap().metadata.run_id, third.metadata.run_id);
        assert!(key_dir.join(first.metadata.run_id.to_string()).exists());
        assert!(key_dir.join(second.metadata.run_id.to_string()).exists());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_save_locks_are_released() {
        let root = scratch_dir("locks");
        let store = Arc::new(FileArtifactStore::new(&root));

        let mut handles = Vec::new();
        for ticker in ["AAA", "BBB", "AAA", "CCC"] {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let key = ArtifactKey::new(ticker, "1d").unwrap();
                store.save(&key, &artifact(&key, 5)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(store.locks.lock().await.is_empty());
        let _ = std::fs::remove_dir_all(root);
    }
}
