//! C3 — per-block state.
//!
//! A [`BlockDescriptor`] is what the BAT (C4) produces for one logical
//! block: where its payload lives in the file (if anywhere), and a
//! sorted, gapless map of which of the block's own sectors are present
//! versus which fall through to a parent (VHDX differencing disks) or
//! read as zero (everything else).

use crate::bitmap::decode_sector_bitmap;
use crate::byte_source::ByteSource;
use crate::error::Result;
use crate::sector_range::{find_range_at, SectorRange};
use crate::types::FileType;

/// VHDX BAT entry block-state value: the block is only partially
/// represented in this image; its sector bitmap distinguishes which
/// sectors are present from which fall through to the parent.
pub const BLOCK_STATE_PARTIALLY_PRESENT: u8 = 6;

/// VHDX BAT entry block-state value: the entire block's payload lives
/// in this image.
pub const BLOCK_STATE_FULLY_PRESENT: u8 = 7;

#[derive(Debug, Clone)]
pub struct BlockDescriptor {
    /// Byte offset of the block's payload in the file, or `-1` if the
    /// block has no payload in this image.
    pub file_offset: i64,
    /// VHDX-only; `0` for VHD (the value is meaningless there).
    pub block_state: u8,
    /// Coalesced, gapless, start-sorted ranges covering `[0, block_size)`.
    pub sector_ranges: Vec<SectorRange>,
}

impl BlockDescriptor {
    /// Resolves one block's descriptor.
    ///
    /// `sector_bitmap_offset` is `-1` unless the BAT (C4) determined
    /// this block's sector bitmap should actually be read: for VHD,
    /// any allocated block; for VHDX, only a block whose state is
    /// [`BLOCK_STATE_PARTIALLY_PRESENT`]. Any other case collapses to
    /// one whole-block range, allocated or not depending on
    /// `file_offset`/`block_state`.
    pub fn resolve(
        source: &mut dyn ByteSource,
        file_type: FileType,
        block_state: u8,
        file_offset: i64,
        sector_bitmap_offset: i64,
        block_size: u64,
        sector_bitmap_size: u32,
        bytes_per_sector: u32,
    ) -> Result<Self> {
        if sector_bitmap_offset != -1 {
            let mut data = vec![0u8; sector_bitmap_size as usize];
            source.read_at(sector_bitmap_offset as u64, &mut data)?;
            let sector_ranges = decode_sector_bitmap(&data, file_type, bytes_per_sector);
            return Ok(BlockDescriptor {
                file_offset,
                block_state,
                sector_ranges,
            });
        }
        let is_unallocated =
            file_offset == -1 || (file_type == FileType::Vhdx && block_state < BLOCK_STATE_PARTIALLY_PRESENT);
        Ok(BlockDescriptor {
            file_offset,
            block_state,
            sector_ranges: vec![SectorRange::new(0, block_size, is_unallocated)],
        })
    }

    /// Finds the range containing a block-relative offset.
    pub fn range_at(&self, intra_block_offset: u64) -> Option<&SectorRange> {
        find_range_at(&self.sector_ranges, intra_block_offset)
    }
}
