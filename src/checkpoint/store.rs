//! Directory-backed checkpoint artifacts, one JSON file per fetched chunk.
//!
//! The artifact name `{tag}.{kind}.{from}-{to}.json` is the resume index: the
//! planner recovers coverage from a directory listing, so the parser below
//! must stay the exact inverse of [`CheckpointStore::artifact_name`].

use super::range::BlockRange;
use crate::error::HarvestError;
use crate::events::{decode_records, encode_records, EventKind, EventRecord};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const ARTIFACT_EXTENSION: &str = ".json";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    tag: String,
    kind: EventKind,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, tag: impl Into<String>, kind: EventKind) -> Result<Self> {
        let tag = tag.into();
        validate_tag(&tag)?;
        Ok(Self {
            dir: dir.into(),
            tag,
            kind,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    fn prefix(&self) -> String {
        format!("{}.{}.", self.tag, self.kind.label())
    }

    pub fn artifact_name(&self, range: BlockRange) -> String {
        format!(
            "{}{}-{}{}",
            self.prefix(),
            range.from(),
            range.to(),
            ARTIFACT_EXTENSION
        )
    }

    pub fn artifact_path(&self, range: BlockRange) -> PathBuf {
        self.dir.join(self.artifact_name(range))
    }

    /// Recovers the block range from an artifact file name written by this store.
    ///
    /// Returns `None` for names of other tags/kinds and for anything that is
    /// not an exact `{from}-{to}` pair (temp files, hand-edited names).
    pub fn parse_artifact_name(&self, name: &str) -> Option<BlockRange> {
        let bounds = name
            .strip_prefix(&self.prefix())?
            .strip_suffix(ARTIFACT_EXTENSION)?;
        let (from, to) = bounds.split_once('-')?;
        if !is_plain_number(from) || !is_plain_number(to) {
            return None;
        }
        let range = BlockRange::new(from.parse().ok()?, to.parse().ok()?).ok()?;
        // Zero-padded bounds parse fine but name a file this store never writes.
        (self.artifact_name(range) == name).then_some(range)
    }

    /// Lists this store's artifacts, sorted by block range.
    pub async fn list(&self) -> Result<Vec<(BlockRange, PathBuf)>> {
        let mut artifacts = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(artifacts),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to list checkpoint dir {}", self.dir.display())
                })
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("failed to list checkpoint dir {}", self.dir.display()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(range) = self.parse_artifact_name(name) {
                artifacts.push((range, entry.path()));
            }
        }

        artifacts.sort();
        Ok(artifacts)
    }

    pub async fn exists(&self, range: BlockRange) -> Result<bool> {
        let path = self.artifact_path(range);
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("failed to stat checkpoint {}", path.display()))
    }

    /// Persists the records of a completed chunk.
    ///
    /// The payload goes to a temp file that is synced to disk and then renamed
    /// onto the final name, so a `.json` artifact is either complete or absent,
    /// even after a crash. An existing artifact for the same range is left
    /// untouched.
    pub async fn write(&self, range: BlockRange, records: &[EventRecord]) -> Result<PathBuf> {
        let path = self.artifact_path(range);
        if self.exists(range).await? {
            tracing::debug!(path = %path.display(), "checkpoint already present; skipping write");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create checkpoint dir {}", self.dir.display()))?;

        let payload = encode_records(self.kind, records)
            .with_context(|| format!("failed to encode checkpoint {}", path.display()))?;
        let temp_path = self
            .dir
            .join(format!("{}{}", self.artifact_name(range), TEMP_SUFFIX));
        write_durably(&temp_path, &payload)
            .await
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("failed to commit checkpoint {}", path.display()))?;
        sync_dir(&self.dir)
            .await
            .with_context(|| format!("failed to sync checkpoint dir {}", self.dir.display()))?;

        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            "checkpoint committed"
        );
        Ok(path)
    }

    pub async fn read(&self, range: BlockRange) -> Result<Vec<EventRecord>> {
        self.read_path(&self.artifact_path(range)).await
    }

    pub async fn read_path(&self, path: &Path) -> Result<Vec<EventRecord>> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
        decode_records(self.kind, &bytes).map_err(|source| {
            HarvestError::CheckpointCorruption {
                path: path.to_path_buf(),
                source,
            }
            .into()
        })
    }
}

/// Writes `bytes` to `path` and syncs the file before returning.
pub(crate) async fn write_durably(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Syncs the directory entry so a completed rename survives a crash.
#[cfg(unix)]
pub(crate) async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
pub(crate) async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn validate_tag(tag: &str) -> Result<()> {
    if tag.trim().is_empty() {
        bail!("checkpoint tag cannot be empty");
    }
    if tag.contains(['.', '/', '\\']) {
        bail!("checkpoint tag {tag:?} cannot contain '.', '/' or '\\'");
    }
    Ok(())
}

fn is_plain_number(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}
