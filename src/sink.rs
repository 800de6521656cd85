//! Report output.
//!
//! Files land flat in the output directory, named after the report title:
//! ```text
//! output_dir/
//! ├── flash-analysis---2025-11-28.md
//! └── flash-analysis---2025-11-28.json
//! ```
//! The `.md` file holds the report; the `.json` file holds the corpus
//! records the report was built from.

use crate::error::SinkError;
use crate::models::NormalizedRecord;
use crate::utils::{ensure_writable_dir, slugify_title};
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

pub trait DocumentSink {
    /// Persist one titled document, returning where it went.
    async fn write(&self, title: &str, body: &str) -> Result<PathBuf, SinkError>;
}

/// Writes reports as Markdown files into a directory.
#[derive(Debug, Clone)]
pub struct MarkdownFileSink {
    dir: String,
}

impl MarkdownFileSink {
    pub fn new(dir: &str) -> Self {
        Self {
            dir: dir.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, title: &str, extension: &str) -> PathBuf {
        PathBuf::from(&self.dir).join(format!("{}.{extension}", slugify_title(title)))
    }

    /// Dump the corpus records next to the report.
    #[instrument(level = "info", skip_all, fields(dir = %self.dir, records = records.len()))]
    pub async fn write_records(
        &self,
        title: &str,
        records: &[NormalizedRecord],
    ) -> Result<PathBuf, SinkError> {
        let path = self.path_for(title, "json");
        let json = serde_json::to_string_pretty(records).map_err(|e| SinkError::Write {
            path: path.display().to_string(),
            source: e.into(),
        })?;
        self.write_file(path, json).await
    }

    async fn write_file(&self, path: PathBuf, contents: String) -> Result<PathBuf, SinkError> {
        ensure_writable_dir(&self.dir).await?;
        info!(path = %path.display(), "Writing output file");
        if let Err(source) = fs::write(&path, contents).await {
            error!(path = %path.display(), error = %source, "Failed writing output file");
            return Err(SinkError::Write {
                path: path.display().to_string(),
                source,
            });
        }
        Ok(path)
    }
}

impl DocumentSink for MarkdownFileSink {
    #[instrument(level = "info", skip_all, fields(dir = %self.dir, title = %title))]
    async fn write(&self, title: &str, body: &str) -> Result<PathBuf, SinkError> {
        let path = self.path_for(title, "md");
        let markdown = format!("# {title}\n\n{body}\n");
        let path = self.write_file(path, markdown).await?;
        info!(path = %path.display(), "Wrote report");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemId;
    use chrono::{TimeZone, Utc};

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("flash_digest_sink_{name}_{}", std::process::id()))
    }

    #[tokio::test]
    async fn test_markdown_sink_writes_titled_file() {
        let dir = temp_dir("md");
        let sink = MarkdownFileSink::new(&dir.to_string_lossy());

        let path = sink
            .write("Flash Analysis - 2025-11-28", "Markets were calm.")
            .await
            .unwrap();

        assert_eq!(path, dir.join("flash-analysis---2025-11-28.md"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "# Flash Analysis - 2025-11-28\n\nMarkets were calm.\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_records_dump_is_json() {
        let dir = temp_dir("json");
        let sink = MarkdownFileSink::new(&dir.to_string_lossy());
        let records = vec![NormalizedRecord {
            id: Some(ItemId("7".to_string())),
            title: "Oil rises".to_string(),
            body: "Brent gained 2%.".to_string(),
            published_at: Utc.with_ymd_and_hms(2025, 11, 28, 6, 0, 0).unwrap(),
            content_hash: "abc".to_string(),
        }];

        let path = sink.write_records("Market Analysis - 2025-11-28", &records).await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["id"], "7");
        assert_eq!(value[0]["title"], "Oil rises");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_reported() {
        // a regular file cannot be used as the output directory
        let file = temp_dir("blocker");
        std::fs::write(&file, "x").unwrap();
        let sink = MarkdownFileSink::new(&file.to_string_lossy());

        let result = sink.write("Flash Analysis - 2025-11-28", "body").await;

        assert!(matches!(result, Err(SinkError::NotWritable { .. })));
        let _ = std::fs::remove_file(&file);
    }
}
