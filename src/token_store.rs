//! Durable storage for the cached OAuth2 credential

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::CacheError;
use crate::models::Credential;

/// Persistence for a single credential record
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the cached credential
    async fn load(&self) -> Result<Credential, CacheError>;

    /// Replace the cached credential
    async fn save(&self, credential: &Credential) -> Result<(), CacheError>;

    /// Remove the cached credential, if any
    async fn clear(&self) -> Result<(), CacheError>;
}

/// JSON file token cache
///
/// Writes go to a sibling temp file that is synced and then renamed over the
/// target, so readers only ever observe a complete record.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "credentials.json".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn ensure_parent_dir(&self) -> Result<(), CacheError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => return Ok(()),
        };
        if tokio::fs::try_exists(parent).await.unwrap_or(false) {
            return Ok(());
        }

        tracing::info!("Creating token cache directory {:?}", parent);
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(parent).await.map_err(|e| CacheError::Io {
            path: parent.to_path_buf(),
            source: e,
        })
    }

    async fn write_temp(&self, temp: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(temp).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Credential, CacheError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let credential: Credential =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            "Loaded cached credential from {:?} (expires {})",
            self.path,
            credential.expiry
        );
        Ok(credential)
    }

    async fn save(&self, credential: &Credential) -> Result<(), CacheError> {
        self.ensure_parent_dir().await?;

        let json = serde_json::to_vec_pretty(credential).map_err(|e| {
            self.io_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let temp = self.temp_path();
        if let Err(e) = self.write_temp(&temp, &json).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(e));
        }

        tracing::debug!("Saved credential to {:?}", self.path);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!("Removed cached credential {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn sample_credential() -> Credential {
        Credential {
            access_token: "a1".to_string(),
            refresh_token: Some("r1".to_string()),
            expiry: Utc::now() + Duration::seconds(3600),
            scopes: ["https://www.googleapis.com/auth/drive".to_string()]
                .into_iter()
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(temp_dir.path().join("credentials.json"));

        let result = store.load().await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_garbage_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        tokio::fs::write(&path, "{ this is not a credential").await.unwrap();

        let store = FileTokenStore::new(&path);
        let result = store.load().await;
        assert!(matches!(result, Err(CacheError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(temp_dir.path().join("credentials.json"));

        let credential = sample_credential();
        store.save(&credential).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, credential);
    }

    #[tokio::test]
    async fn test_save_replaces_and_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(temp_dir.path().join("credentials.json"));

        let mut credential = sample_credential();
        store.save(&credential).await.unwrap();
        credential.access_token = "a2".to_string();
        store.save(&credential).await.unwrap();

        assert_eq!(store.load().await.unwrap().access_token, "a2");

        let entries: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["credentials.json".to_string()]);
    }

    #[tokio::test]
    async fn test_save_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(".gctl").join("credentials.json");
        let store = FileTokenStore::new(&path);

        store.save(&sample_credential()).await.unwrap();
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir_mode = std::fs::metadata(path.parent().unwrap())
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(dir_mode & 0o777, 0o700);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        let store = FileTokenStore::new(&path);
        store.save(&sample_credential()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_saved_file_is_structured_text() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        let store = FileTokenStore::new(&path);
        store.save(&sample_credential()).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["access_token"], "a1");
        assert_eq!(value["refresh_token"], "r1");
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        let store = FileTokenStore::new(&path);

        store.save(&sample_credential()).await.unwrap();
        store.clear().await.unwrap();
        assert!(!path.exists());
        store.clear().await.unwrap();
    }
}
