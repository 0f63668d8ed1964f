use crate::infrastructure::error::{CliError, Result};
use snapshare_core::{ImageFormat, PeerIdentity};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Directory where received images are written as `<peer>-<n>.<ext>`
#[derive(Debug)]
pub struct Inbox {
    dir: PathBuf,
    counters: HashMap<String, u32>,
}

impl Inbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counters: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for the next image from `peer`; does not touch the disk
    pub fn next_path(&mut self, peer: &PeerIdentity, format: ImageFormat) -> PathBuf {
        let stem = file_stem(peer.display_name());
        let counter = self.counters.entry(stem.clone()).or_insert(0);
        *counter += 1;
        self.dir
            .join(format!("{}-{}.{}", stem, counter, format.extension()))
    }

    /// Write an image, skipping names that already exist
    pub async fn save(
        &mut self,
        peer: &PeerIdentity,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CliError::SaveImage {
                path: self.dir.clone(),
                source,
            })?;

        let mut path = self.next_path(peer, format);
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = self.next_path(peer, format);
        }

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| CliError::SaveImage {
                path: path.clone(),
                source,
            })?;
        tracing::debug!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}

/// Display names are free text; keep file names portable
fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "peer".to_string()
    } else {
        stem
    }
}
