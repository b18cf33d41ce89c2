//! The VHDX region table — a 64 KiB structure, present in two copies
//! (at offset 192 KiB and 256 KiB), mapping well-known region GUIDs to
//! their byte offset and length in the file.

use std::collections::HashMap;

use crc::{Crc, CRC_32_ISCSI};
use nom::combinator::map;
use nom::number::complete::le_u32;
use nom::sequence::tuple;

use crate::error::{Result, VhdiError};
use crate::parse_utils::{t_guid_le, t_le_u32, t_le_u64, NomResult};
use crate::signatures::{region_type_bat, region_type_metadata, VHDX_REGION_SIGNATURE};

pub const HEADER_SIZE: usize = 16;
pub const ENTRY_SIZE: usize = 32;
pub const SECTION_SIZE: usize = 65536;
const MAX_ENTRY_COUNT: u32 = (SECTION_SIZE as u32 - HEADER_SIZE as u32) / ENTRY_SIZE as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownRegion {
    Bat,
    Metadata,
}

#[derive(Debug, Clone, Copy)]
pub struct RegionEntry {
    pub file_offset: u64,
    pub length: u32,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct RegionTable {
    pub regions: HashMap<KnownRegion, RegionEntry>,
}

struct EntryRaw {
    guid: uuid::Uuid,
    file_offset: u64,
    length: u32,
    required: bool,
}

fn parse_entry(data: &[u8]) -> NomResult<'_, EntryRaw> {
    map(
        tuple((t_guid_le, t_le_u64, t_le_u32, le_u32)),
        |(guid, file_offset, length, required_raw)| EntryRaw {
            guid,
            file_offset,
            length,
            required: required_raw & 1 != 0,
        },
    )(data)
}

fn checksum(data: &[u8]) -> u32 {
    let mut zeroed = data.to_vec();
    zeroed[4..8].fill(0);
    let crc = Crc::<u32>::new(&CRC_32_ISCSI);
    crc.checksum(&zeroed)
}

impl RegionTable {
    /// Parses and validates one 64 KiB region table copy. Unknown,
    /// non-`required` region entries are silently skipped; an unknown
    /// `required` entry is an error, per the format's own rule that an
    /// implementation must refuse to load a file whose required region
    /// it does not recognize.
    pub fn parse(data: &[u8]) -> Result<RegionTable> {
        if data.len() < SECTION_SIZE {
            return Err(VhdiError::ValueOutOfBounds {
                field: "vhdx region table data",
                value: data.len() as i64,
            });
        }
        if &data[0..4] != VHDX_REGION_SIGNATURE.as_slice() {
            return Err(VhdiError::UnsupportedSignature {
                context: "VHDX region table",
                expected: VHDX_REGION_SIGNATURE.as_slice(),
                found: data[0..4].to_vec(),
            });
        }
        let computed = checksum(&data[0..SECTION_SIZE]);
        let (after_checksum, expected_checksum) = t_le_u32(&data[4..HEADER_SIZE])?;
        if computed != expected_checksum {
            return Err(VhdiError::ChecksumMismatch {
                context: "VHDX region table",
                expected: expected_checksum,
                computed,
            });
        }
        let (_reserved, entry_count) = t_le_u32(after_checksum)?;
        if entry_count > MAX_ENTRY_COUNT {
            return Err(VhdiError::ValueOutOfBounds {
                field: "region table entry_count",
                value: entry_count as i64,
            });
        }
        let mut cursor = &data[HEADER_SIZE..];
        let bat_guid = region_type_bat();
        let metadata_guid = region_type_metadata();

        let mut regions = HashMap::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let (next, raw) = parse_entry(cursor)?;
            cursor = next;
            let known_region = if raw.guid == bat_guid {
                Some(KnownRegion::Bat)
            } else if raw.guid == metadata_guid {
                Some(KnownRegion::Metadata)
            } else {
                None
            };
            match known_region {
                Some(region) => {
                    regions.insert(
                        region,
                        RegionEntry {
                            file_offset: raw.file_offset,
                            length: raw.length,
                            required: raw.required,
                        },
                    );
                }
                None if raw.required => {
                    return Err(VhdiError::MissingKnownRegion("unrecognized required region"));
                }
                None => {}
            }
        }
        Ok(RegionTable { regions })
    }

    pub fn get(&self, region: KnownRegion) -> Result<RegionEntry> {
        self.regions
            .get(&region)
            .copied()
            .ok_or(VhdiError::MissingKnownRegion(match region {
                KnownRegion::Bat => "BAT",
                KnownRegion::Metadata => "metadata",
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Vec<u8> {
        let mut data = vec![0u8; SECTION_SIZE];
        data[0..4].copy_from_slice(b"regi");
        data[8..12].copy_from_slice(&2u32.to_le_bytes());
        let mut offset = HEADER_SIZE;

        let bat_bytes = region_type_bat().to_bytes_le();
        data[offset..offset + 16].copy_from_slice(&bat_bytes);
        data[offset + 16..offset + 24].copy_from_slice(&(3 * 1024 * 1024u64).to_le_bytes());
        data[offset + 24..offset + 28].copy_from_slice(&(1024 * 1024u32).to_le_bytes());
        data[offset + 28..offset + 32].copy_from_slice(&1u32.to_le_bytes());
        offset += ENTRY_SIZE;

        let metadata_bytes = region_type_metadata().to_bytes_le();
        data[offset..offset + 16].copy_from_slice(&metadata_bytes);
        data[offset + 16..offset + 24].copy_from_slice(&(2 * 1024 * 1024u64).to_le_bytes());
        data[offset + 24..offset + 28].copy_from_slice(&(1024 * 1024u32).to_le_bytes());
        data[offset + 28..offset + 32].copy_from_slice(&1u32.to_le_bytes());

        let computed = checksum(&data);
        data[4..8].copy_from_slice(&computed.to_le_bytes());
        data
    }

    #[test]
    fn parses_bat_and_metadata_regions() {
        let data = sample_table();
        let table = RegionTable::parse(&data).unwrap();
        let bat = table.get(KnownRegion::Bat).unwrap();
        assert_eq!(bat.file_offset, 3 * 1024 * 1024);
        let metadata = table.get(KnownRegion::Metadata).unwrap();
        assert_eq!(metadata.file_offset, 2 * 1024 * 1024);
    }

    #[test]
    fn rejects_a_tampered_table() {
        let mut data = sample_table();
        data[HEADER_SIZE] ^= 0xff;
        assert!(RegionTable::parse(&data).is_err());
    }

    #[test]
    fn missing_region_is_an_error() {
        let data = sample_table();
        let mut table = RegionTable::parse(&data).unwrap();
        table.regions.remove(&KnownRegion::Bat);
        assert!(table.get(KnownRegion::Bat).is_err());
    }
}
