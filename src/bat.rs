//! C4 — the Block Allocation Table.
//!
//! Holds the per-image, format-specific layout derived from the
//! headers (§4.2 of the format notes) and resolves a logical block
//! index to a [`BlockDescriptor`] by reading one table entry — plus,
//! for a VHDX differencing disk whose block is `PartiallyPresent`, the
//! chunk's separate sector-bitmap entry.

use bitvec::prelude::*;
use nom::number::complete::{be_u32, le_u64};

use crate::block_descriptor::{BlockDescriptor, BLOCK_STATE_PARTIALLY_PRESENT};
use crate::byte_source::ByteSource;
use crate::error::{Result, VhdiError};
use crate::types::{DiskType, FileType};

#[derive(Debug)]
pub struct BlockAllocationTable {
    file_type: FileType,
    disk_type: DiskType,
    /// Byte offset of the table's first entry in the file.
    bat_offset: u64,
    block_size: u64,
    bytes_per_sector: u32,
    number_of_entries: u64,
    table_entry_size: usize,
    sector_bitmap_size: u32,
    /// `0` for VHD; for VHDX, the number of payload-block entries
    /// between consecutive sector-bitmap entries.
    entries_per_chunk: u32,
}

impl BlockAllocationTable {
    pub fn new(
        file_type: FileType,
        disk_type: DiskType,
        bat_offset: u64,
        block_size: u64,
        bytes_per_sector: u32,
        number_of_entries: u64,
    ) -> Result<Self> {
        if bytes_per_sector != 512 && bytes_per_sector != 4096 {
            return Err(VhdiError::UnsupportedValue {
                field: "bytes_per_sector",
                value: bytes_per_sector as u64,
            });
        }
        if block_size == 0 {
            return Err(VhdiError::ValueOutOfBounds {
                field: "block_size",
                value: block_size as i64,
            });
        }
        if number_of_entries == 0 {
            return Err(VhdiError::ValueOutOfBounds {
                field: "number_of_entries",
                value: 0,
            });
        }

        let (table_entry_size, sector_bitmap_size, entries_per_chunk) = match file_type {
            FileType::Vhd => {
                let mut sector_bitmap_size = (block_size / (512 * 8)) as u32;
                if sector_bitmap_size % 512 != 0 {
                    sector_bitmap_size = (sector_bitmap_size / 512 + 1) * 512;
                }
                (4usize, sector_bitmap_size, 0u32)
            }
            FileType::Vhdx => {
                let entries_per_chunk = ((1u64 << 23) * bytes_per_sector as u64) / block_size;
                if entries_per_chunk == 0 || 1_048_576 % entries_per_chunk != 0 {
                    return Err(VhdiError::UnsupportedValue {
                        field: "entries_per_chunk",
                        value: entries_per_chunk,
                    });
                }
                let sector_bitmap_size = (1_048_576 / entries_per_chunk) as u32;
                (8usize, sector_bitmap_size, entries_per_chunk as u32)
            }
        };

        Ok(BlockAllocationTable {
            file_type,
            disk_type,
            bat_offset,
            block_size,
            bytes_per_sector,
            number_of_entries,
            table_entry_size,
            sector_bitmap_size,
            entries_per_chunk,
        })
    }

    pub fn number_of_entries(&self) -> u64 {
        self.number_of_entries
    }

    /// Translates a logical block index to its physical entry index in
    /// the on-disk table. For VHD, and for any non-differencing VHDX
    /// disk, this is the identity; a differencing VHDX disk interleaves
    /// one sector-bitmap entry after every `entries_per_chunk` payload
    /// entries.
    fn physical_entry_index(&self, block_index: u64) -> u64 {
        if self.file_type == FileType::Vhdx && self.disk_type != DiskType::Fixed {
            block_index + block_index / self.entries_per_chunk as u64
        } else {
            block_index
        }
    }

    /// Physical entry index of the sector-bitmap entry covering the
    /// chunk that `block_index` belongs to.
    fn bitmap_entry_index(&self, block_index: u64) -> u64 {
        let entries_per_chunk = self.entries_per_chunk as u64;
        (1 + block_index / entries_per_chunk) * (entries_per_chunk + 1) - 1
    }

    fn entry_offset(&self, physical_index: u64) -> u64 {
        self.bat_offset + physical_index * self.table_entry_size as u64
    }

    fn read_raw_entry(&self, source: &mut dyn ByteSource, physical_index: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        let buf = &mut buf[..self.table_entry_size];
        source.read_at(self.entry_offset(physical_index), buf)?;
        let value = match self.file_type {
            FileType::Vhd => be_u32::<_, nom::error::Error<&[u8]>>(&*buf)?.1 as u64,
            FileType::Vhdx => le_u64::<_, nom::error::Error<&[u8]>>(&*buf)?.1,
        };
        Ok(value)
    }

    /// Decodes a raw VHD/VHDX table entry into `(file_offset, block_state)`.
    fn decode_entry(&self, raw: u64) -> (i64, u8) {
        match self.file_type {
            FileType::Vhd => {
                if raw == 0xffff_ffff {
                    (-1, 0)
                } else {
                    (raw as i64 * 512 + self.sector_bitmap_size as i64, 0)
                }
            }
            FileType::Vhdx => {
                // low 3 bits: block state; next 17: reserved; top 44: file
                // offset in MiB.
                let bytes = raw.to_le_bytes();
                let bits = bytes.view_bits::<Lsb0>();
                let (state_bits, rest) = bits.split_at(3);
                let (_reserved, offset_bits) = rest.split_at(17);
                let block_state = state_bits.load::<u8>();
                let file_offset = offset_bits.load::<u64>() * 1024 * 1024;
                (file_offset as i64, block_state)
            }
        }
    }

    /// Resolves the block descriptor for `block_index`, reading one
    /// table entry plus, for a VHDX differencing disk's
    /// `PartiallyPresent` block, the chunk's sector-bitmap entry.
    pub fn resolve(&self, source: &mut dyn ByteSource, block_index: u64) -> Result<BlockDescriptor> {
        if block_index >= self.number_of_entries {
            return Err(VhdiError::ValueOutOfBounds {
                field: "block_index",
                value: block_index as i64,
            });
        }

        let physical_index = self.physical_entry_index(block_index);
        let raw_entry = self.read_raw_entry(source, physical_index)?;
        let (file_offset, block_state) = self.decode_entry(raw_entry);
        tracing::trace!(block_index, physical_index, file_offset, block_state, "resolved BAT entry");

        let sector_bitmap_offset = match self.file_type {
            FileType::Vhd => {
                if file_offset == -1 {
                    -1
                } else {
                    file_offset - self.sector_bitmap_size as i64
                }
            }
            FileType::Vhdx => {
                if self.disk_type == DiskType::Differential && block_state == BLOCK_STATE_PARTIALLY_PRESENT
                {
                    let bitmap_index = self.bitmap_entry_index(block_index);
                    let raw_bitmap_entry = self.read_raw_entry(source, bitmap_index)?;
                    let (bitmap_block_offset, _) = self.decode_entry(raw_bitmap_entry);
                    if bitmap_block_offset == -1 {
                        -1
                    } else {
                        bitmap_block_offset
                            + (block_index % self.entries_per_chunk as u64) as i64
                                * self.sector_bitmap_size as i64
                    }
                } else {
                    -1
                }
            }
        };

        BlockDescriptor::resolve(
            source,
            self.file_type,
            block_state,
            file_offset,
            sector_bitmap_offset,
            self.block_size,
            self.sector_bitmap_size,
            self.bytes_per_sector,
        )
    }
}
