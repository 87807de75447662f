//! Scatter/Gather Codec
//!
//! Translates between the wire block format (one block header followed by a
//! run of records) and the volume's segmented layout.
//!
//! `scatter` splits an incoming block apart: each record's payload goes to
//! the data segments, one descriptor per record goes to the records segment,
//! and finally one block descriptor goes to the blocks segment. The order is
//! load-bearing: data, then records, then block. A block descriptor must
//! never point at records that do not exist yet, so a failure at any step
//! leaves only unreferenced tail bytes behind.
//!
//! `gather` is the inverse: it reassembles the block at a logical index into
//! a caller buffer, byte-identical to what was scattered.

use crate::error::{Result, VolumeError};
use crate::volume::Volume;
use blockvault_core::wire::{BlockDescriptor, BlockHeader, RecordDescriptor, RecordHeader};
use tracing::trace;

/// Split one wire block into the volume's segments.
///
/// Returns the number of bytes consumed, which is the block's declared
/// `block_size`. Trailing bytes past the declared size are ignored. A
/// record whose declared payload runs past the end of the block is stored
/// truncated at the block boundary; continuation in the next block is the
/// caller's concern.
pub async fn scatter(vol: &mut Volume, buf: &[u8]) -> Result<usize> {
    if buf.len() > u32::MAX as usize {
        return Err(VolumeError::BlockTooLarge(buf.len()));
    }
    if buf.len() < BlockHeader::SIZE {
        return Err(VolumeError::MissingBlockHeader(buf.len()));
    }

    let header = BlockHeader::decode(buf)?;
    let block_size = header.block_size as usize;
    if buf.len() < block_size {
        return Err(VolumeError::IncompleteBlock {
            got: buf.len(),
            declared: header.block_size,
        });
    }

    let mut current = BlockHeader::SIZE;
    let mut records = Vec::new();

    while current < block_size {
        if current + RecordHeader::SIZE > block_size {
            return Err(VolumeError::BadRecordHeader(current));
        }
        let record = RecordHeader::decode(&buf[current..])?;

        let payload_start = current + RecordHeader::SIZE;
        // The payload may be split across blocks; store what this block holds.
        let payload_end = (payload_start + record.data_size as usize).min(block_size);
        let payload = &buf[payload_start..payload_end];

        let loc = vol.append_data(&header, &record, payload).await?;
        records.push(RecordDescriptor {
            header: record,
            begin: loc.begin,
            size: payload.len() as u32,
            data_file: loc.file_index,
        });
        current = payload_end;
    }

    let start = vol.append_records(&records).await?;
    vol.append_block(&BlockDescriptor {
        header,
        start,
        count: records.len() as u32,
    })
    .await?;

    trace!(
        block = vol.size() - 1,
        records = records.len(),
        size = block_size,
        "scattered block"
    );
    Ok(block_size)
}

/// Reassemble the block at `block_index` into `dest`.
///
/// Returns the number of bytes written. `dest` must be at least the block's
/// declared size; a partial `dest` after an error must be discarded.
pub async fn gather(vol: &mut Volume, block_index: u64, dest: &mut [u8]) -> Result<usize> {
    let block = vol.read_block(block_index).await?;

    let block_size = block.header.block_size as usize;
    if block_size > dest.len() {
        return Err(VolumeError::BufferTooSmall {
            block: block_size,
            buffer: dest.len(),
        });
    }

    block.header.encode_into(&mut dest[..BlockHeader::SIZE]);
    let mut current = BlockHeader::SIZE;

    let records = vol.read_records(block.start, block.count).await?;
    for record in &records {
        record
            .header
            .encode_into(&mut dest[current..current + RecordHeader::SIZE]);
        current += RecordHeader::SIZE;

        let payload = &mut dest[current..current + record.size as usize];
        vol.read_data(record.data_file, record.begin, payload).await?;
        current += record.size as usize;
    }

    Ok(current)
}
