use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use super::Storage;
use crate::models::{Connection, Id, SpendingStatistics};

/// JSON file-based storage implementation.
///
/// Directory structure:
/// ```text
/// data/
///   connections/
///     {connection_id}.json
///   statistics/
///     {user_id}.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    base_path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn connections_dir(&self) -> PathBuf {
        self.base_path.join("connections")
    }

    fn statistics_dir(&self) -> PathBuf {
        self.base_path.join("statistics")
    }

    fn entity_file(dir: PathBuf, id: &Id) -> Result<PathBuf> {
        id.validate()?;
        Ok(dir.join(format!("{id}.json")))
    }

    async fn read_json<T: for<'de> serde::Deserialize<'de>>(
        &self,
        path: &Path,
    ) -> Result<Option<T>> {
        match fs::read_to_string(path).await {
            Ok(content) => {
                let value = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse JSON from {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Write via a temp file and rename so readers never see a partial file.
    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let dir = path.parent().context("Storage path has no parent directory")?;
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        let content = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
        let tmp = dir.join(format!(".{}.tmp", Id::new()));
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }

    async fn list_json_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let mut entries = match fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e).context("Failed to read directory"),
        };

        while let Some(entry) = entries.next_entry().await.context("Failed to read entry")? {
            let path = entry.path();
            let is_hidden = entry
                .file_name()
                .to_str()
                .is_none_or(|name| name.starts_with('.'));
            if !is_hidden && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

#[async_trait::async_trait]
impl Storage for JsonFileStorage {
    async fn list_connections(&self) -> Result<Vec<Connection>> {
        let mut connections = Vec::new();
        for path in self.list_json_files(&self.connections_dir()).await? {
            match self.read_json::<Connection>(&path).await {
                Ok(Some(conn)) => connections.push(conn),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "Skipping unreadable connection file"
                    );
                }
            }
        }
        Ok(connections)
    }

    async fn get_connection(&self, id: &Id) -> Result<Option<Connection>> {
        let path = Self::entity_file(self.connections_dir(), id)?;
        self.read_json(&path).await
    }

    async fn find_connection_for_user(&self, user_id: &Id) -> Result<Option<Connection>> {
        let mut owned: Vec<Connection> = self
            .list_connections()
            .await?
            .into_iter()
            .filter(|c| &c.user_id == user_id)
            .collect();
        super::sort_oldest_first(&mut owned);
        let usable = owned.iter().position(Connection::has_valid_credential);
        Ok(match usable {
            Some(idx) => Some(owned.swap_remove(idx)),
            None => owned.into_iter().next(),
        })
    }

    async fn save_connection(&self, conn: &Connection) -> Result<()> {
        let path = Self::entity_file(self.connections_dir(), &conn.id)?;
        self.write_json(&path, conn).await
    }

    async fn get_statistics(&self, user_id: &Id) -> Result<Option<SpendingStatistics>> {
        let path = Self::entity_file(self.statistics_dir(), user_id)?;
        self.read_json(&path).await
    }

    async fn upsert_statistics(&self, stats: &SpendingStatistics) -> Result<()> {
        let path = Self::entity_file(self.statistics_dir(), &stats.user_id)?;
        self.write_json(&path, stats).await
    }
}
