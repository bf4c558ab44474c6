//! # Output Artifacts
//!
//! Every generated file lives at `<base_dir>/<category>/<fileName>` and is
//! exposed as `<uri_prefix>/<category>/<fileName>`, where
//! `fileName = <typeTag>[_<subtype>]_<taskTag>.<ext>`. Embedding the task tag
//! keeps concurrent tasks from colliding in shared category directories.
//! After each write the category directory is pruned to the configured
//! maximum number of files, oldest first.

pub mod csv_io;

use crate::config::OutputConfig;
use crate::error::PipelineResult;
use crate::models::output::{OutputReference, OutputType};
use crate::models::record::DatasetRecord;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
    uri_prefix: String,
    max_files_per_directory: usize,
}

impl ArtifactStore {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            uri_prefix: config.uri_prefix.trim_end_matches('/').to_string(),
            max_files_per_directory: config.max_files_per_directory,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Build the reference for an artifact of one task
    pub fn reference(
        &self,
        output_type: OutputType,
        file_tag: &str,
        subtype: Option<&str>,
    ) -> OutputReference {
        let subtype = subtype.map(sanitize_segment).filter(|s| !s.is_empty());
        let file_name = match &subtype {
            Some(subtype) => format!(
                "{}_{}_{}.{}",
                output_type.as_str(),
                subtype,
                file_tag,
                output_type.extension()
            ),
            None => format!(
                "{}_{}.{}",
                output_type.as_str(),
                file_tag,
                output_type.extension()
            ),
        };
        OutputReference {
            uri: format!(
                "{}/{}/{}",
                self.uri_prefix,
                output_type.category(),
                file_name
            ),
            file_name,
            output_type,
            subtype,
        }
    }

    /// Local path of a referenced artifact, derived from its type and name
    pub fn path_for(&self, reference: &OutputReference) -> PathBuf {
        self.base_dir
            .join(reference.output_type.category())
            .join(&reference.file_name)
    }

    pub async fn write_csv(
        &self,
        reference: &OutputReference,
        columns: &[String],
        records: &[DatasetRecord],
    ) -> PipelineResult<PathBuf> {
        let bytes = csv_io::encode_records(columns, records)?;
        self.write_bytes(reference, bytes).await
    }

    /// Write a table that is not a list of dataset records
    pub async fn write_table(
        &self,
        reference: &OutputReference,
        header: &[&str],
        rows: Vec<Vec<String>>,
    ) -> PipelineResult<PathBuf> {
        let bytes = csv_io::encode_rows(header, rows)?;
        self.write_bytes(reference, bytes).await
    }

    pub async fn write_bytes(
        &self,
        reference: &OutputReference,
        bytes: Vec<u8>,
    ) -> PipelineResult<PathBuf> {
        let path = self.path_for(reference);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = bytes.len();
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = size, "Wrote artifact");

        self.prune(reference.output_type.category()).await?;
        Ok(path)
    }

    /// Keep only the newest `max_files_per_directory` files of a category
    pub async fn prune(&self, category: &str) -> PipelineResult<usize> {
        let dir = self.base_dir.join(category);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((modified, entry.path()));
            }
        }

        if files.len() <= self.max_files_per_directory {
            return Ok(0);
        }

        // newest first; name breaks mtime ties deterministically
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        let mut removed = 0;
        for (_, path) in files.into_iter().skip(self.max_files_per_directory) {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
        info!(category = category, removed = removed, "Pruned output directory");
        Ok(removed)
    }
}

fn sanitize_segment(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
