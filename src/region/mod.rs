//! Worker-local region store.
//!
//! A region store owns named targets (one directory each) holding
//! fixed-size byte regions (one file each). Regions are created with their
//! final size and never grow; write and read move whole byte ranges,
//! persist flushes a region to stable storage.

pub mod client;
pub mod service;

pub use client::RegionClient;
pub use service::RegionService;

use crate::common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

pub struct RegionStore {
    root: PathBuf,
    targets: Vec<Uuid>,
}

impl RegionStore {
    /// Open a region store rooted at `root`, creating the directory tree if
    /// absent. A store with no targets yet gets one. Failure here is a
    /// construction error; the hosting process is expected to exit.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::Storage(format!("could not create region store at {}: {}", root.display(), e))
        })?;

        let mut targets = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            {
                targets.push(id);
            }
        }
        if targets.is_empty() {
            let id = Uuid::new_v4();
            std::fs::create_dir(root.join(id.to_string())).map_err(|e| {
                Error::Storage(format!("could not create storage target: {}", e))
            })?;
            targets.push(id);
        }
        tracing::info!(root = %root.display(), targets = targets.len(), "region store open");
        Ok(RegionStore { root, targets })
    }

    /// Target ids this store advertises.
    pub fn targets(&self) -> &[Uuid] {
        &self.targets
    }

    fn target_dir(&self, target: Uuid) -> Result<PathBuf> {
        if !self.targets.contains(&target) {
            return Err(Error::Storage(format!("unknown storage target {}", target)));
        }
        Ok(self.root.join(target.to_string()))
    }

    fn region_path(&self, target: Uuid, region: Uuid) -> Result<PathBuf> {
        let path = self.target_dir(target)?.join(region.to_string());
        if !path.is_file() {
            return Err(Error::Storage(format!("unknown region {}", region)));
        }
        Ok(path)
    }

    /// Allocate a region of exactly `size` bytes.
    pub async fn create(&self, target: Uuid, size: u64) -> Result<Uuid> {
        let region = Uuid::new_v4();
        let path = self.target_dir(target)?.join(region.to_string());
        let file = tokio::fs::File::create(&path).await?;
        file.set_len(size).await?;
        tracing::debug!(%target, %region, size, "region created");
        Ok(region)
    }

    pub async fn write(&self, target: Uuid, region: Uuid, offset: u64, data: &[u8]) -> Result<()> {
        let path = self.region_path(target, region)?;
        let mut file = OpenOptions::new().write(true).open(&path).await?;
        let len = file.metadata().await?.len();
        if offset + data.len() as u64 > len {
            return Err(Error::Storage(format!(
                "write of {} bytes at {} past end of region of {} bytes",
                data.len(),
                offset,
                len
            )));
        }
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    pub async fn read(&self, target: Uuid, region: Uuid, offset: u64, size: u64) -> Result<Vec<u8>> {
        let path = self.region_path(target, region)?;
        let mut file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        if offset + size > len {
            return Err(Error::Storage(format!(
                "read of {} bytes at {} past end of region of {} bytes",
                size, offset, len
            )));
        }
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut data = vec![0u8; size as usize];
        file.read_exact(&mut data).await?;
        Ok(data)
    }

    /// Flush a region to stable storage.
    pub async fn persist(&self, target: Uuid, region: Uuid) -> Result<()> {
        let path = self.region_path(target, region)?;
        let file = OpenOptions::new().write(true).open(&path).await?;
        file.sync_all().await?;
        Ok(())
    }
}
