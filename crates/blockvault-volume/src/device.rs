//! Tape-Style Device Facade
//!
//! Presents a file-descriptor-like interface over the volume store for
//! callers that speak tape semantics: open/close, sequential write, read,
//! seek-by-(file,block), rewind, end-of-data and truncate.
//!
//! The split of responsibilities is deliberate: the volume is stateless and
//! the device owns the positional cursor `(file, block_num)`, a synthetic
//! file-descriptor counter, and the EOT flag. That keeps `reposition` and
//! `rewind` O(1) — they touch the cursor, never the volume.
//!
//! State machine: Closed → mount → Mounted → open → Open. While Open the
//! positional operations are available; close returns to Mounted, unmount to
//! Closed. At most one volume is open per device instance.
//!
//! Writes are append-only: the cursor must sit exactly at `size()`. The one
//! exception is the relabel case — hosts relabel freshly created volumes by
//! rewriting block 0, so a write at (0,0) on a single-block volume resets
//! the volume first.

use crate::codec::{gather, scatter};
use crate::error::{Result, VolumeError};
use crate::options::DeviceOptions;
use crate::volume::{DeviceMode, Volume};
use blockvault_core::wire::{block_number, split_block_number};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Static device configuration, the analog of a device resource definition.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    /// Comma-separated `key=value` device options. Required for open.
    pub options: Option<String>,
    /// When set, truncate securely erases the volume with this command
    /// (invoked once per file) instead of resetting it in place.
    pub secure_erase_command: Option<String>,
}

/// A device with at most one open volume and a tape-style cursor.
pub struct DedupDevice {
    config: DeviceConfig,
    mounted: bool,
    volume: Option<Volume>,
    file: u32,
    block_num: u32,
    /// Unused by this backend; pinned to zero.
    file_addr: u64,
    fd_ctr: i32,
    eot: bool,
}

impl DedupDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            mounted: false,
            volume: None,
            file: 0,
            block_num: 0,
            file_addr: 0,
            fd_ctr: 0,
            eot: false,
        }
    }

    /// Mount the device. Returns false if it was already mounted.
    pub fn mount(&mut self) -> bool {
        !std::mem::replace(&mut self.mounted, true)
    }

    /// Unmount the device. Returns false if it was not mounted.
    pub fn unmount(&mut self) -> bool {
        std::mem::replace(&mut self.mounted, false)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// True once the cursor sits at or past the last written block.
    pub fn is_eot(&self) -> bool {
        self.eot
    }

    pub fn position(&self) -> (u32, u32) {
        (self.file, self.block_num)
    }

    /// Byte address within the current file; this backend never moves it.
    pub fn file_address(&self) -> u64 {
        self.file_addr
    }

    fn volume_mut(&mut self) -> Result<&mut Volume> {
        let vol = self.volume.as_mut().ok_or(VolumeError::NotOpen)?;
        if !vol.is_ok() {
            return Err(VolumeError::NotOk);
        }
        Ok(vol)
    }

    fn check_fd(&self, fd: i32) -> Result<()> {
        if fd != self.fd_ctr {
            return Err(VolumeError::UnknownFd(fd));
        }
        Ok(())
    }

    /// Open the volume at `path` and return a synthetic file descriptor.
    pub async fn open(&mut self, path: &Path, mode: DeviceMode, permissions: u32) -> Result<i32> {
        if self.volume.is_some() {
            return Err(VolumeError::AlreadyOpen);
        }

        let raw = self
            .config
            .options
            .as_deref()
            .ok_or_else(|| VolumeError::Options("no device options specified".to_string()))?;
        let options = DeviceOptions::parse(raw)?;
        for warning in &options.warnings {
            warn!(device_options = raw, "{warning}");
        }

        let requested = if mode.creates() || options.explicit_block_size {
            Some(options.block_size)
        } else {
            None
        };
        let vol = Volume::open(path, mode, permissions, requested).await?;

        self.file = 0;
        self.block_num = 0;
        self.file_addr = 0;
        self.eot = vol.size() == 0;
        self.volume = Some(vol);
        self.fd_ctr += 1;
        info!(volume = %path.display(), fd = self.fd_ctr, "volume opened on device");
        Ok(self.fd_ctr)
    }

    /// Close the open volume. The descriptor must be the one returned by the
    /// matching `open`.
    pub fn close(&mut self, fd: i32) -> Result<()> {
        self.check_fd(fd)?;
        if self.volume.take().is_none() {
            return Err(VolumeError::NotOpen);
        }
        Ok(())
    }

    /// Append one wire block at the cursor.
    ///
    /// The cursor must sit at the end of the volume; the relabel of a
    /// one-block volume at position (0,0) is the single exception and resets
    /// the volume before writing.
    pub async fn write(&mut self, fd: i32, buf: &[u8]) -> Result<usize> {
        self.check_fd(fd)?;
        let cursor = block_number(self.file, self.block_num);
        let vol = self.volume_mut()?;

        if cursor == 0 && vol.size() == 1 {
            // Hosts relabel empty volumes by rewriting block zero.
            debug!(volume = vol.name(), "relabel: resetting one-block volume");
            vol.reset().await?;
        }

        if cursor != vol.size() {
            return Err(VolumeError::NotAtEnd {
                cursor,
                size: vol.size(),
            });
        }

        let written = scatter(vol, buf).await?;
        let next = vol.size();
        (self.file, self.block_num) = split_block_number(next);
        self.eot = true;
        Ok(written)
    }

    /// Reassemble the block at the cursor into `dest`.
    pub async fn read(&mut self, fd: i32, dest: &mut [u8]) -> Result<usize> {
        self.check_fd(fd)?;
        let cursor = block_number(self.file, self.block_num);
        let vol = self.volume_mut()?;

        let read = gather(vol, cursor, dest).await?;
        self.eot = cursor + 1 == vol.size();
        (self.file, self.block_num) = split_block_number(cursor + 1);
        Ok(read)
    }

    /// Move the cursor; never touches the volume.
    pub fn reposition(&mut self, file: u32, block: u32) -> Result<()> {
        debug!(
            from_file = self.file,
            from_block = self.block_num,
            to_file = file,
            to_block = block,
            "reposition"
        );
        let size = self.volume_mut()?.size();
        self.file = file;
        self.block_num = block;
        self.eot = block_number(file, block) >= size;
        Ok(())
    }

    /// Rewind to the first block.
    pub fn rewind(&mut self) -> Result<()> {
        let vol = self.volume_mut()?;
        let empty = vol.size() == 0;
        self.file = 0;
        self.block_num = 0;
        self.file_addr = 0;
        self.eot = empty;
        Ok(())
    }

    /// Position the cursor one past the last written block.
    pub fn eod(&mut self) -> Result<()> {
        let vol = self.volume_mut()?;
        let end = vol.size();
        (self.file, self.block_num) = split_block_number(end);
        self.eot = true;
        Ok(())
    }

    /// Durability barrier for everything written so far.
    pub async fn flush(&mut self) -> Result<()> {
        self.volume_mut()?.flush().await
    }

    /// Truncate the open volume.
    ///
    /// Without a secure-erase command this is an in-place `reset()`. With
    /// one, the volume is closed, every file inside it is erased with the
    /// command, the directory is removed and the volume is recreated with
    /// its prior permissions and block size.
    pub async fn truncate(&mut self) -> Result<()> {
        let erase_cmd = self.config.secure_erase_command.clone();
        let vol = self.volume_mut()?;

        let Some(erase_cmd) = erase_cmd else {
            return vol.reset().await;
        };

        let path = vol.path().to_path_buf();
        let permissions = vol.permissions();
        let block_size = vol.block_size();

        // Close the volume, releasing its handles and the lock.
        self.volume = None;
        delete_volume(&path, &erase_cmd).await?;

        let vol = Volume::open(
            &path,
            DeviceMode::CreateReadWrite,
            permissions,
            Some(block_size),
        )
        .await?;
        info!(volume = %path.display(), "volume securely erased and recreated");
        self.volume = Some(vol);
        Ok(())
    }

    /// List volume directories under a mount point.
    ///
    /// Returns candidate volume names; whether a candidate is acceptable is
    /// decided by the caller.
    pub async fn scan_for_volumes(&self, mount_point: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut reader = tokio::fs::read_dir(mount_point).await?;
        while let Some(entry) = reader.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Byte-granular seeks do not exist on this device.
    pub fn seek(&mut self, _offset: i64) -> Result<u64> {
        Err(VolumeError::Unsupported("seek"))
    }

    /// No ioctls are implemented for this device.
    pub fn ioctl(&mut self, _request: u64) -> Result<()> {
        Err(VolumeError::Unsupported("ioctl"))
    }
}

/// Securely erase every file in the volume directory, then remove it.
async fn delete_volume(path: &Path, erase_command: &str) -> Result<()> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut reader = tokio::fs::read_dir(path).await?;
    while let Some(entry) = reader.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            return Err(VolumeError::UnexpectedDirectory(entry.path()));
        }
        files.push(entry.path());
    }

    for file in files {
        let status = tokio::process::Command::new(erase_command)
            .arg(&file)
            .status()
            .await?;
        if !status.success() {
            return Err(VolumeError::SecureEraseFailed(file));
        }
    }

    tokio::fs::remove_dir(path).await?;
    Ok(())
}
