use crate::conversation::types::Transcript;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info};

/// Stores one JSON transcript per conversation under a directory.
pub struct TranscriptStore {
    pub dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", conversation_id))
    }

    pub async fn save(&self, transcript: &Transcript) -> Result<()> {
        let file_path = self.path_for(&transcript.conversation_id);
        let json = serde_json::to_string_pretty(transcript)
            .context("Failed to serialize transcript to JSON")?;

        fs::write(&file_path, json)
            .await
            .with_context(|| format!("Failed to write transcript file: {:?}", file_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&file_path, permissions)
                .await
                .with_context(|| format!("Failed to set permissions on: {:?}", file_path))?;
        }

        debug!(conversation_id = %transcript.conversation_id, "Saved transcript");
        Ok(())
    }

    /// Loads a transcript. Returns `None` when no file exists; a corrupted file is
    /// moved aside and `None` returned so the caller starts over.
    pub async fn load(&self, conversation_id: &str) -> Result<Option<Transcript>> {
        let file_path = self.path_for(conversation_id);

        match fs::read_to_string(&file_path).await {
            Ok(json) => match serde_json::from_str::<Transcript>(&json) {
                Ok(transcript) => {
                    info!(conversation_id = %conversation_id, "Resumed transcript from disk");
                    Ok(Some(transcript))
                }
                Err(e) => {
                    error!("Failed to parse transcript {}: {}", conversation_id, e);
                    self.quarantine(&file_path).await?;
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read transcript file: {:?}", file_path)),
        }
    }

    async fn quarantine(&self, file_path: &Path) -> Result<()> {
        let corrupted_path = file_path.with_extension("json.corrupted");

        fs::rename(file_path, &corrupted_path)
            .await
            .with_context(|| format!("Failed to rename corrupted file: {:?}", file_path))?;

        error!(
            "Corrupted transcript file detected. Moved {:?} to {:?}",
            file_path, corrupted_path
        );
        Ok(())
    }

    pub async fn create_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .await
                .with_context(|| format!("Failed to create storage directory: {:?}", self.dir))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let permissions = std::fs::Permissions::from_mode(0o755);
                fs::set_permissions(&self.dir, permissions)
                    .await
                    .with_context(|| format!("Failed to set permissions on: {:?}", self.dir))?;
            }

            info!("Created storage directory: {:?}", self.dir);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::types::Message;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sessions");

        let store = TranscriptStore::new(dir.clone());
        store.create_dir().await.unwrap();

        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = TranscriptStore::new(temp_dir.path().to_path_buf());

        let mut transcript = Transcript::new("abc".to_string());
        transcript.add_message(Message::user("Hello"));
        store.save(&transcript).await.unwrap();

        let loaded = store.load("abc").await.unwrap().unwrap();
        assert_eq!(loaded.conversation_id, "abc");
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = TranscriptStore::new(temp_dir.path().to_path_buf());

        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_file_is_quarantined() {
        let temp_dir = TempDir::new().unwrap();
        let store = TranscriptStore::new(temp_dir.path().to_path_buf());

        let file_path = temp_dir.path().join("abc.json");
        fs::write(&file_path, "invalid json {{").await.unwrap();

        assert!(store.load("abc").await.unwrap().is_none());
        assert!(temp_dir.path().join("abc.json.corrupted").exists());
        assert!(!file_path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions_unix() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let store = TranscriptStore::new(temp_dir.path().to_path_buf());
        store.save(&Transcript::new("abc".to_string())).await.unwrap();

        let metadata = fs::metadata(temp_dir.path().join("abc.json")).await.unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }
}
