//! Append-Only Deduplicating Volume Store
//!
//! A volume is a directory holding one logical backup volume, split into
//! three append-only segment streams plus a configuration file:
//!
//! ```text
//! <volume>/
//! ├── config.json      block size + format version, written at create
//! ├── blocks           fixed-size BlockDescriptor stream (authoritative length)
//! ├── records          fixed-size RecordDescriptor stream
//! ├── data-00000000    raw record payloads, rolls to data-00000001, ...
//! └── lock             create-new lock file; opens are exclusive per path
//! ```
//!
//! The volume is intentionally stateless with respect to the logical cursor:
//! every read names its block index and the device facade tracks position.
//! That is what makes `Reposition` and rewind O(1) on top of this store.
//!
//! ## Failure semantics
//!
//! Any I/O error marks the volume not-ok and subsequent calls fail fast.
//! Partial appends never violate an invariant: the blocks segment is the
//! authoritative length, so data or record bytes written by a failed append
//! sequence are simply unreachable tail garbage.
//!
//! ## Durability
//!
//! Appends are visible to readers once they return; they are durable only
//! after `flush()`, which syncs all three segment streams.

use crate::config::{VolumeConfig, DEFAULT_BLOCK_SIZE};
use crate::error::{Result, VolumeError};
use blockvault_core::wire::{BlockDescriptor, BlockHeader, RecordDescriptor, RecordHeader};
use bytes::BytesMut;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Active data segment rolls to the next file past this size.
const DATA_FILE_ROLL_SIZE: u64 = 4 << 30;

const BLOCKS_FILE: &str = "blocks";
const RECORDS_FILE: &str = "records";
const LOCK_FILE: &str = "lock";

/// How a device wants a volume opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    CreateReadWrite,
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl DeviceMode {
    pub fn creates(self) -> bool {
        matches!(self, DeviceMode::CreateReadWrite)
    }

    pub fn writable(self) -> bool {
        !matches!(self, DeviceMode::ReadOnly)
    }
}

/// Location of a stored payload inside the data segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file_index: u32,
    pub begin: u64,
}

#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    async fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(VolumeError::Locked(dir.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn data_file_name(index: u32) -> String {
    format!("data-{index:08}")
}

fn parse_data_file_name(name: &str) -> Option<u32> {
    name.strip_prefix("data-")?.parse().ok()
}

async fn open_append(path: &Path) -> std::io::Result<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let len = file.metadata().await?.len();
    Ok((file, len))
}

async fn read_exact_at(path: &Path, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.read_exact(buf).await?;
    Ok(())
}

#[cfg(unix)]
async fn apply_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn apply_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// One open volume. Owns its file handles and the per-path lock exclusively;
/// not safe for concurrent mutation from multiple threads.
#[derive(Debug)]
pub struct Volume {
    path: PathBuf,
    mode: DeviceMode,
    permissions: u32,
    config: VolumeConfig,
    _lock: LockFile,
    data: File,
    data_index: u32,
    data_len: u64,
    records: File,
    record_count: u64,
    blocks: File,
    block_count: u64,
    ok: bool,
}

impl Volume {
    /// Create or open the volume at `path`.
    ///
    /// `block_size` is the explicitly requested block size, if any. On create
    /// it (or the 4k default) is written into the volume configuration; on
    /// open an explicit value that differs from the stored configuration is a
    /// [`VolumeError::ConfigMismatch`].
    pub async fn open(
        path: impl AsRef<Path>,
        mode: DeviceMode,
        permissions: u32,
        block_size: Option<u32>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if mode.creates() {
            tokio::fs::create_dir_all(&path).await?;
        }

        let lock = LockFile::acquire(&path).await?;

        let config = if mode.creates() {
            let config = VolumeConfig::new(block_size.unwrap_or(DEFAULT_BLOCK_SIZE));
            config.persist(&path).await?;
            config
        } else {
            let config = VolumeConfig::load(&path).await?;
            if let Some(requested) = block_size {
                if requested != config.block_size {
                    return Err(VolumeError::ConfigMismatch {
                        on_disk: config.block_size,
                        requested,
                    });
                }
            }
            config
        };

        if mode.creates() {
            // A create on an existing directory starts the volume over.
            File::create(path.join(BLOCKS_FILE)).await?;
            File::create(path.join(RECORDS_FILE)).await?;
            File::create(path.join(data_file_name(0))).await?;
            remove_extra_data_files(&path, 0).await?;
            apply_permissions(&path, permissions).await?;
        }

        let (blocks, blocks_len) = open_append(&path.join(BLOCKS_FILE)).await?;
        let (records, records_len) = open_append(&path.join(RECORDS_FILE)).await?;
        let data_index = newest_data_file(&path).await?;
        let (data, data_len) = open_append(&path.join(data_file_name(data_index))).await?;

        let vol = Self {
            block_count: blocks_len / BlockDescriptor::SIZE as u64,
            record_count: records_len / RecordDescriptor::SIZE as u64,
            mode,
            permissions,
            config,
            _lock: lock,
            data,
            data_index,
            data_len,
            records,
            blocks,
            ok: true,
            path,
        };
        debug!(
            volume = %vol.path.display(),
            blocks = vol.block_count,
            records = vol.record_count,
            block_size = vol.config.block_size,
            "volume opened"
        );
        Ok(vol)
    }

    pub fn name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    pub fn block_size(&self) -> u32 {
        self.config.block_size
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Number of block descriptors; the authoritative volume length.
    pub fn size(&self) -> u64 {
        self.block_count
    }

    fn check_ok(&self) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(VolumeError::NotOk)
        }
    }

    fn check_writable(&self) -> Result<()> {
        self.check_ok()?;
        if self.mode.writable() {
            Ok(())
        } else {
            Err(VolumeError::ReadOnly)
        }
    }

    fn poison_on_io(&mut self, err: &VolumeError) {
        if matches!(err, VolumeError::Io(_)) {
            self.ok = false;
            warn!(volume = %self.path.display(), error = %err, "volume marked not-ok");
        }
    }

    /// Append one record payload to the active data segment.
    pub async fn append_data(
        &mut self,
        block: &BlockHeader,
        record: &RecordHeader,
        payload: &[u8],
    ) -> Result<Location> {
        self.check_writable()?;
        trace!(
            block = block.block_number,
            stream = record.stream,
            size = payload.len(),
            "append data"
        );
        match self.append_data_inner(payload).await {
            Ok(loc) => Ok(loc),
            Err(e) => {
                self.poison_on_io(&e);
                Err(e)
            }
        }
    }

    async fn append_data_inner(&mut self, payload: &[u8]) -> Result<Location> {
        if self.data_len > 0 && self.data_len + payload.len() as u64 > DATA_FILE_ROLL_SIZE {
            let next = self.data_index + 1;
            let (file, len) = open_append(&self.path.join(data_file_name(next))).await?;
            debug!(volume = %self.path.display(), data_file = next, "rolled data segment");
            self.data = file;
            self.data_index = next;
            self.data_len = len;
        }
        let begin = self.data_len;
        self.data.write_all(payload).await?;
        self.data.flush().await?;
        self.data_len += payload.len() as u64;
        Ok(Location {
            file_index: self.data_index,
            begin,
        })
    }

    /// Append record descriptors contiguously; all become visible or none.
    /// Returns the index of the first appended descriptor.
    pub async fn append_records(&mut self, records: &[RecordDescriptor]) -> Result<u64> {
        self.check_writable()?;
        match self.append_records_inner(records).await {
            Ok(start) => Ok(start),
            Err(e) => {
                self.poison_on_io(&e);
                Err(e)
            }
        }
    }

    async fn append_records_inner(&mut self, records: &[RecordDescriptor]) -> Result<u64> {
        let mut buf = BytesMut::zeroed(records.len() * RecordDescriptor::SIZE);
        for (i, rec) in records.iter().enumerate() {
            rec.encode_into(&mut buf[i * RecordDescriptor::SIZE..(i + 1) * RecordDescriptor::SIZE]);
        }
        // One write_all so a failure cannot leave a descriptor prefix behind
        // that a torn block later points into.
        self.records.write_all(&buf).await?;
        self.records.flush().await?;
        let start = self.record_count;
        self.record_count += records.len() as u64;
        Ok(start)
    }

    /// Append one block descriptor; on success `size()` grows by one.
    pub async fn append_block(&mut self, block: &BlockDescriptor) -> Result<()> {
        self.check_writable()?;
        let mut buf = [0u8; BlockDescriptor::SIZE];
        block.encode_into(&mut buf);
        let res: Result<()> = async {
            self.blocks.write_all(&buf).await?;
            self.blocks.flush().await?;
            Ok(())
        }
        .await;
        match res {
            Ok(()) => {
                self.block_count += 1;
                Ok(())
            }
            Err(e) => {
                self.poison_on_io(&e);
                Err(e)
            }
        }
    }

    /// Random read of one block descriptor.
    pub async fn read_block(&mut self, index: u64) -> Result<BlockDescriptor> {
        self.check_ok()?;
        if index >= self.block_count {
            return Err(VolumeError::BlockOutOfRange {
                index,
                size: self.block_count,
            });
        }
        let mut buf = [0u8; BlockDescriptor::SIZE];
        let res = read_exact_at(
            &self.path.join(BLOCKS_FILE),
            index * BlockDescriptor::SIZE as u64,
            &mut buf,
        )
        .await;
        if let Err(e) = res {
            self.poison_on_io(&e);
            return Err(e);
        }
        Ok(BlockDescriptor::decode(&buf)?)
    }

    /// Read `count` consecutive record descriptors starting at `start`.
    pub async fn read_records(&mut self, start: u64, count: u32) -> Result<Vec<RecordDescriptor>> {
        self.check_ok()?;
        if start + count as u64 > self.record_count {
            return Err(VolumeError::RecordOutOfRange {
                start,
                count,
                size: self.record_count,
            });
        }
        let mut buf = vec![0u8; count as usize * RecordDescriptor::SIZE];
        let res = read_exact_at(
            &self.path.join(RECORDS_FILE),
            start * RecordDescriptor::SIZE as u64,
            &mut buf,
        )
        .await;
        if let Err(e) = res {
            self.poison_on_io(&e);
            return Err(e);
        }
        buf.chunks_exact(RecordDescriptor::SIZE)
            .map(|chunk| RecordDescriptor::decode(chunk).map_err(VolumeError::from))
            .collect()
    }

    /// Random read of payload bytes from a data segment into `dest`.
    pub async fn read_data(&mut self, file_index: u32, begin: u64, dest: &mut [u8]) -> Result<()> {
        self.check_ok()?;
        let res = read_exact_at(&self.path.join(data_file_name(file_index)), begin, dest).await;
        if let Err(e) = res {
            self.poison_on_io(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Truncate all three segments to zero, preserving the configuration.
    pub async fn reset(&mut self) -> Result<()> {
        self.check_writable()?;
        let res = self.reset_inner().await;
        if let Err(ref e) = res {
            self.poison_on_io(e);
        }
        res
    }

    async fn reset_inner(&mut self) -> Result<()> {
        self.blocks.set_len(0).await?;
        self.records.set_len(0).await?;
        remove_extra_data_files(&self.path, 0).await?;
        let first = self.path.join(data_file_name(0));
        File::create(&first).await?;
        let (data, data_len) = open_append(&first).await?;
        self.data = data;
        self.data_index = 0;
        self.data_len = data_len;
        self.block_count = 0;
        self.record_count = 0;
        debug!(volume = %self.path.display(), "volume reset");
        Ok(())
    }

    /// Durability barrier: everything appended so far survives a crash once
    /// this returns.
    pub async fn flush(&mut self) -> Result<()> {
        self.check_ok()?;
        let res: Result<()> = async {
            self.data.sync_all().await?;
            self.records.sync_all().await?;
            self.blocks.sync_all().await?;
            Ok(())
        }
        .await;
        if let Err(ref e) = res {
            self.poison_on_io(e);
        }
        res
    }
}

async fn newest_data_file(dir: &Path) -> Result<u32> {
    let mut newest = 0u32;
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        if let Some(index) = entry.file_name().to_str().and_then(parse_data_file_name) {
            newest = newest.max(index);
        }
    }
    Ok(newest)
}

async fn remove_extra_data_files(dir: &Path, keep_up_to: u32) -> Result<()> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut stale = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        if let Some(index) = entry.file_name().to_str().and_then(parse_data_file_name) {
            if index > keep_up_to {
                stale.push(entry.path());
            }
        }
    }
    for path in stale {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockvault_core::wire::BLOCK_MAGIC;
    use tempfile::TempDir;

    fn block_header(block_size: u32) -> BlockHeader {
        BlockHeader {
            checksum: 0,
            block_size,
            block_number: 0,
            id: BLOCK_MAGIC,
            session_id: 1,
            session_time: 1,
        }
    }

    fn record_header(data_size: u32) -> RecordHeader {
        RecordHeader {
            session_id: 1,
            session_time: 1,
            file_index: 1,
            stream: 2,
            data_size,
        }
    }

    async fn create_volume(dir: &TempDir) -> Volume {
        Volume::open(
            dir.path().join("vol0"),
            DeviceMode::CreateReadWrite,
            0o640,
            Some(4096),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let mut vol = create_volume(&dir).await;
        assert_eq!(vol.size(), 0);

        let payload = vec![0xAB; 64];
        let loc = vol
            .append_data(&block_header(108), &record_header(64), &payload)
            .await
            .unwrap();
        assert_eq!(loc, Location { file_index: 0, begin: 0 });

        let desc = RecordDescriptor {
            header: record_header(64),
            begin: loc.begin,
            size: 64,
            data_file: loc.file_index,
        };
        let start = vol.append_records(&[desc]).await.unwrap();
        assert_eq!(start, 0);

        vol.append_block(&BlockDescriptor {
            header: block_header(108),
            start,
            count: 1,
        })
        .await
        .unwrap();
        assert_eq!(vol.size(), 1);

        let block = vol.read_block(0).await.unwrap();
        assert_eq!(block.count, 1);
        let records = vol.read_records(block.start, block.count).await.unwrap();
        assert_eq!(records[0], desc);

        let mut out = vec![0u8; 64];
        vol.read_data(records[0].data_file, records[0].begin, &mut out)
            .await
            .unwrap();
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn test_read_block_out_of_range() {
        let dir = TempDir::new().unwrap();
        let mut vol = create_volume(&dir).await;
        assert!(matches!(
            vol.read_block(0).await,
            Err(VolumeError::BlockOutOfRange { index: 0, size: 0 })
        ));
        // An out-of-range read must not poison the volume.
        assert!(vol.is_ok());
    }

    #[tokio::test]
    async fn test_reset_preserves_config() {
        let dir = TempDir::new().unwrap();
        let mut vol = create_volume(&dir).await;

        let payload = [1u8; 16];
        let loc = vol
            .append_data(&block_header(60), &record_header(16), &payload)
            .await
            .unwrap();
        let desc = RecordDescriptor {
            header: record_header(16),
            begin: loc.begin,
            size: 16,
            data_file: loc.file_index,
        };
        let start = vol.append_records(&[desc]).await.unwrap();
        vol.append_block(&BlockDescriptor {
            header: block_header(60),
            start,
            count: 1,
        })
        .await
        .unwrap();

        vol.reset().await.unwrap();
        assert_eq!(vol.size(), 0);
        assert_eq!(vol.block_size(), 4096);

        let path = vol.path().to_path_buf();
        for name in [BLOCKS_FILE.to_string(), RECORDS_FILE.to_string(), data_file_name(0)] {
            let len = tokio::fs::metadata(path.join(&name)).await.unwrap().len();
            assert_eq!(len, 0, "{name} not truncated");
        }
    }

    #[tokio::test]
    async fn test_reopen_sees_persisted_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vol0");
        {
            let mut vol = Volume::open(&path, DeviceMode::CreateReadWrite, 0o640, Some(4096))
                .await
                .unwrap();
            let loc = vol
                .append_data(&block_header(60), &record_header(16), &[7u8; 16])
                .await
                .unwrap();
            let start = vol
                .append_records(&[RecordDescriptor {
                    header: record_header(16),
                    begin: loc.begin,
                    size: 16,
                    data_file: loc.file_index,
                }])
                .await
                .unwrap();
            vol.append_block(&BlockDescriptor {
                header: block_header(60),
                start,
                count: 1,
            })
            .await
            .unwrap();
            vol.flush().await.unwrap();
        }

        let mut vol = Volume::open(&path, DeviceMode::ReadWrite, 0o640, None)
            .await
            .unwrap();
        assert_eq!(vol.size(), 1);
        let block = vol.read_block(0).await.unwrap();
        assert_eq!(block.header.block_size, 60);
    }

    #[tokio::test]
    async fn test_open_blocksize_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vol0");
        drop(
            Volume::open(&path, DeviceMode::CreateReadWrite, 0o640, Some(4096))
                .await
                .unwrap(),
        );

        let err = Volume::open(&path, DeviceMode::ReadWrite, 0o640, Some(65536))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VolumeError::ConfigMismatch {
                on_disk: 4096,
                requested: 65536
            }
        ));

        // Unset blocksize adopts the stored configuration.
        let vol = Volume::open(&path, DeviceMode::ReadWrite, 0o640, None)
            .await
            .unwrap();
        assert_eq!(vol.block_size(), 4096);
    }

    #[tokio::test]
    async fn test_opens_are_exclusive_per_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vol0");
        let vol = Volume::open(&path, DeviceMode::CreateReadWrite, 0o640, Some(4096))
            .await
            .unwrap();

        assert!(matches!(
            Volume::open(&path, DeviceMode::ReadWrite, 0o640, None).await,
            Err(VolumeError::Locked(_))
        ));

        drop(vol);
        assert!(Volume::open(&path, DeviceMode::ReadWrite, 0o640, None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vol0");
        drop(
            Volume::open(&path, DeviceMode::CreateReadWrite, 0o640, Some(4096))
                .await
                .unwrap(),
        );

        let mut vol = Volume::open(&path, DeviceMode::ReadOnly, 0o640, None)
            .await
            .unwrap();
        let err = vol
            .append_data(&block_header(60), &record_header(4), &[0u8; 4])
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::ReadOnly));
    }
}
