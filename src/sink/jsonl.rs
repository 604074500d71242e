use super::clickhouse::encode_rows;
use super::{AnalyticsRow, AnalyticsStore, StoreError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Append-only JSON-lines file, one row per line.
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AnalyticsStore for JsonLinesStore {
    async fn append(&self, batch: &[AnalyticsRow]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = encode_rows(batch)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&body).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
