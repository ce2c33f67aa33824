//! Snapshot persistence.
//!
//! Files are named `snapshot_<YYYYMMDD_HHMMSS>.jpg` from the event timestamp.
//! Two snapshots within the same second never overwrite each other: the second
//! one gets a sequence suffix (`snapshot_<stamp>_1.jpg`, `_2`, ...).

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};

const MAX_SEQUENCE: u32 = 10_000;

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open the snapshot directory, creating it if absent.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encode `frame` as JPEG and write it under a name derived from `at`.
    pub fn save(&self, frame: &Frame, at: &DateTime<Local>) -> Result<PathBuf> {
        let jpeg = frame.to_jpeg(DEFAULT_JPEG_QUALITY)?;
        let stamp = at.format("%Y%m%d_%H%M%S").to_string();

        for seq in 0..MAX_SEQUENCE {
            let name = if seq == 0 {
                format!("snapshot_{stamp}.jpg")
            } else {
                format!("snapshot_{stamp}_{seq}.jpg")
            };
            let path = self.dir.join(name);
            let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(anyhow::Error::new(err)
                        .context(format!("create snapshot {}", path.display())))
                }
            };
            write_or_discard(file, &path, &jpeg)?;
            return Ok(path);
        }

        Err(anyhow!(
            "too many snapshots for {} in {}",
            stamp,
            self.dir.display()
        ))
    }
}

/// Write `bytes` to a freshly claimed file; on failure the partial file is
/// removed so the name is free again.
fn write_or_discard(mut file: impl Write, path: &Path, bytes: &[u8]) -> Result<()> {
    if let Err(err) = file.write_all(bytes).and_then(|()| file.flush()) {
        drop(file);
        if let Err(rm) = std::fs::remove_file(path) {
            log::warn!("failed to remove partial snapshot {}: {}", path.display(), rm);
        }
        return Err(anyhow::Error::new(err).context(format!("write snapshot {}", path.display())));
    }
    Ok(())
}
