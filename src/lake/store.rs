use super::LakeError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;

/// Minimal blob-store surface the lake needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Object bytes, or `None` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> Result<Option<Bytes>, LakeError>;

    /// Stores `bytes` at `path`, replacing any previous object.
    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), LakeError>;

    /// Paths of the `.parquet` objects directly below `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, LakeError>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// Object store rooted at a local directory (or a mounted blob container).
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalObjectStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, LakeError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(LakeError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> LakeError {
    LakeError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, path: &str) -> Result<Option<Bytes>, LakeError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&full, e)),
        }
    }

    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), LakeError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        // write to a sibling temp file, then rename over the target
        let mut tmp = full.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &full)
            .await
            .map_err(|e| io_error(&full, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, LakeError> {
        let dir = self.resolve(prefix.trim_end_matches('/'))?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let base = prefix.trim_end_matches('/');
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file && name.ends_with(".parquet") {
                out.push(format!("{base}/{name}"));
            }
        }
        out.sort();
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

/// Object store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, path: &str) -> Result<Option<Bytes>, LakeError> {
        Ok(self.objects.read().await.get(path).cloned())
    }

    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), LakeError> {
        self.objects.write().await.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, LakeError> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| {
                k.strip_prefix(&prefix)
                    .map(|rest| !rest.contains('/') && rest.ends_with(".parquet"))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}
