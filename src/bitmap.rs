//! C3 — sector-bitmap decoding.
//!
//! Turns the raw per-block sector bitmap into a sorted, gapless list of
//! [`SectorRange`]s. VHD scans each byte MSB-first; VHDX scans LSB-first.
//! Runs of identical bits coalesce into a single range.

use bitvec::prelude::*;

use crate::sector_range::SectorRange;
use crate::types::FileType;

/// Decodes a sector bitmap into coalesced `[start, end)` byte ranges,
/// each tagged allocated or unallocated.
///
/// `bytes_per_sector` scales bit positions to byte offsets; it must be
/// 512 or 4096 (the only values the format ever assigns).
pub fn decode_sector_bitmap(
    data: &[u8],
    file_type: FileType,
    bytes_per_sector: u32,
) -> Vec<SectorRange> {
    if data.is_empty() {
        return Vec::new();
    }
    match file_type {
        FileType::Vhd => coalesce(data.view_bits::<Msb0>().iter().by_vals(), bytes_per_sector),
        FileType::Vhdx => coalesce(data.view_bits::<Lsb0>().iter().by_vals(), bytes_per_sector),
    }
}

fn coalesce(bits: impl Iterator<Item = bool>, bytes_per_sector: u32) -> Vec<SectorRange> {
    let mut ranges = Vec::new();
    let mut first_index: u64 = 0;
    let mut element_index: u64 = 0;
    let mut first_value: Option<bool> = None;

    for bit in bits {
        match first_value {
            None => first_value = Some(bit),
            Some(value) if value != bit => {
                ranges.push(make_range(first_index, element_index, value, bytes_per_sector));
                first_value = Some(bit);
                first_index = element_index;
            }
            _ => {}
        }
        element_index += 1;
    }
    if let Some(value) = first_value {
        ranges.push(make_range(first_index, element_index, value, bytes_per_sector));
    }
    ranges
}

fn make_range(first_index: u64, end_index: u64, value: bool, bytes_per_sector: u32) -> SectorRange {
    let start = first_index * bytes_per_sector as u64;
    let end = end_index * bytes_per_sector as u64;
    SectorRange::new(start, end, !value)
}
