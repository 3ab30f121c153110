//! Local landing directory for report downloads.

use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedReport {
    pub report_id: String,
    pub path: PathBuf,
    pub byte_size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct ReportSpool {
    root: PathBuf,
}

impl ReportSpool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn report_path(&self, report_id: &str) -> PathBuf {
        self.root.join(format!("{}.csv", sanitize_file_stem(report_id)))
    }

    /// Opens a temp file next to the final report path.
    pub async fn begin(&self, report_id: &str) -> anyhow::Result<SpoolWriter> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating spool directory {}", self.root.display()))?;

        let final_path = self.report_path(report_id);
        let temp_path = self
            .root
            .join(format!(".{}.{}.part", sanitize_file_stem(report_id), Uuid::new_v4()));
        let file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp report file {}", temp_path.display()))?;

        Ok(SpoolWriter {
            report_id: report_id.to_string(),
            file: Some(file),
            temp_path,
            final_path,
            hasher: Sha256::new(),
            byte_size: 0,
        })
    }

    pub async fn remove(&self, report: &DownloadedReport) -> anyhow::Result<()> {
        match fs::remove_file(&report.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing report file {}", report.path.display()))
            }
        }
    }
}

/// In-progress download. Dropped writers leave a temp file behind; call
/// [`SpoolWriter::abort`] on failure.
#[derive(Debug)]
pub struct SpoolWriter {
    report_id: String,
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    hasher: Sha256,
    byte_size: u64,
}

impl SpoolWriter {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> anyhow::Result<()> {
        let file = self
            .file
            .as_mut()
            .context("spool writer already closed")?;
        file.write_all(chunk)
            .await
            .with_context(|| format!("writing temp report file {}", self.temp_path.display()))?;
        self.hasher.update(chunk);
        self.byte_size += chunk.len() as u64;
        Ok(())
    }

    /// Flushes and atomically moves the temp file into place.
    pub async fn finish(mut self) -> anyhow::Result<DownloadedReport> {
        let mut file = self.file.take().context("spool writer already closed")?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp report file {}", self.temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&self.temp_path, &self.final_path).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp report {} -> {}",
                    self.temp_path.display(),
                    self.final_path.display()
                )
            });
        }

        Ok(DownloadedReport {
            report_id: self.report_id,
            path: self.final_path,
            byte_size: self.byte_size,
            sha256: hex::encode(self.hasher.finalize()),
        })
    }

    /// Discards the partial download.
    pub async fn abort(mut self) {
        drop(self.file.take());
        if let Err(err) = fs::remove_file(&self.temp_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.temp_path.display(), %err, "failed to remove partial report");
            }
        }
    }
}

fn sanitize_file_stem(input: &str) -> String {
    let stem: String = input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "report".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finished_download_is_renamed_and_hashed() {
        let dir = tempdir().expect("tempdir");
        let spool = ReportSpool::new(dir.path());
        let mut writer = spool.begin("report-1").await.expect("begin");
        writer.write_chunk(b"hello ").await.expect("chunk");
        writer.write_chunk(b"world").await.expect("chunk");
        let temp = writer.temp_path().to_path_buf();
        let report = writer.finish().await.expect("finish");

        assert_eq!(report.path, dir.path().join("report-1.csv"));
        assert_eq!(report.byte_size, 11);
        assert_eq!(
            report.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert!(report.path.exists());
        assert!(!temp.exists());

        spool.remove(&report).await.expect("remove");
        assert!(!report.path.exists());
        spool.remove(&report).await.expect("second remove is a no-op");
    }

    #[tokio::test]
    async fn aborted_download_leaves_nothing() {
        let dir = tempdir().expect("tempdir");
        let spool = ReportSpool::new(dir.path());
        let mut writer = spool.begin("r/2").await.expect("begin");
        writer.write_chunk(b"partial").await.expect("chunk");
        let temp = writer.temp_path().to_path_buf();
        writer.abort().await;

        assert!(!temp.exists());
        assert!(!spool.report_path("r/2").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
