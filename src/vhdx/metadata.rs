//! The VHDX metadata table — a directory of fixed-size entries, each
//! pointing at a variable-length item elsewhere in the metadata
//! region. Six item identifiers are well known; everything else is
//! opaque to this crate.

use std::collections::HashMap;

use nom::combinator::map;
use nom::number::complete::{le_u32, le_u64};
use nom::sequence::tuple;

use crate::error::{Result, VhdiError};
use crate::guid::le_mixed_to_be;
use crate::parse_utils::{t_guid_le, t_le_u32, NomResult};
use crate::signatures::{
    metadata_item_file_parameters, metadata_item_logical_sector_size,
    metadata_item_parent_locator, metadata_item_physical_sector_size,
    metadata_item_virtual_disk_identifier, metadata_item_virtual_disk_size,
    VHDX_METADATA_SIGNATURE,
};
use crate::types::DiskType;
use uuid::Uuid;

pub const TABLE_HEADER_SIZE: usize = 32;
pub const ENTRY_SIZE: usize = 32;
const MAX_ENTRY_COUNT: u16 = 2047;
const MIN_ITEM_OFFSET: u32 = 64 * 1024;

const MIN_BLOCK_SIZE: u32 = 1024 * 1024;
const MAX_BLOCK_SIZE: u32 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ItemLocation {
    pub offset: u32,
    pub length: u32,
    pub required: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FileParameters {
    pub block_size: u32,
    pub disk_type: DiskType,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub file_parameters: FileParameters,
    pub virtual_disk_size: u64,
    pub virtual_disk_identifier: Uuid,
    pub logical_sector_size: u32,
    pub physical_sector_size: u32,
    pub parent_locator: Option<ItemLocation>,
}

struct EntryRaw {
    item_id: Uuid,
    offset: u32,
    length: u32,
    required: bool,
}

fn parse_entry(data: &[u8]) -> NomResult<'_, EntryRaw> {
    map(
        tuple((t_guid_le, t_le_u32, t_le_u32, nom::bytes::complete::take(8usize))),
        |(item_id, offset, length, flags_and_reserved): (Uuid, u32, u32, &[u8])| {
            let flags = flags_and_reserved[0];
            EntryRaw {
                item_id,
                offset,
                length,
                required: flags & 0b100 != 0,
            }
        },
    )(data)
}

fn parse_file_parameters(data: &[u8]) -> Result<FileParameters> {
    if data.len() < 8 {
        return Err(VhdiError::ValueOutOfBounds {
            field: "file_parameters item",
            value: data.len() as i64,
        });
    }
    let (rest, block_size) = le_u32::<_, nom::error::Error<&[u8]>>(data)?;
    let (_, flags) = le_u32::<_, nom::error::Error<&[u8]>>(rest)?;
    if block_size < MIN_BLOCK_SIZE || block_size > MAX_BLOCK_SIZE || block_size % 512 != 0 {
        return Err(VhdiError::UnsupportedValue {
            field: "block_size",
            value: block_size as u64,
        });
    }
    let low_bits = flags & 0b11;
    let disk_type = DiskType::from_vhdx_file_parameters(low_bits)?;
    Ok(FileParameters { block_size, disk_type })
}

fn parse_sector_size(data: &[u8]) -> Result<u32> {
    let (_, value) = le_u32::<_, nom::error::Error<&[u8]>>(data)?;
    if value != 512 && value != 4096 {
        return Err(VhdiError::UnsupportedValue {
            field: "sector_size",
            value: value as u64,
        });
    }
    Ok(value)
}

fn read_item<'a>(region: &'a [u8], location: ItemLocation) -> Result<&'a [u8]> {
    let start = location.offset as usize;
    let end = start
        .checked_add(location.length as usize)
        .ok_or(VhdiError::ValueOutOfBounds {
            field: "metadata item length",
            value: location.length as i64,
        })?;
    region
        .get(start..end)
        .ok_or(VhdiError::ValueOutOfBounds {
            field: "metadata item offset",
            value: location.offset as i64,
        })
}

impl Metadata {
    /// Parses the metadata table and the well-known items it points
    /// at. `region` is the entire metadata region, item offsets being
    /// relative to its start.
    pub fn parse(region: &[u8]) -> Result<Metadata> {
        if region.len() < TABLE_HEADER_SIZE {
            return Err(VhdiError::ValueOutOfBounds {
                field: "vhdx metadata table data",
                value: region.len() as i64,
            });
        }
        if &region[0..8] != VHDX_METADATA_SIGNATURE.as_slice() {
            return Err(VhdiError::UnsupportedSignature {
                context: "VHDX metadata table",
                expected: VHDX_METADATA_SIGNATURE.as_slice(),
                found: region[0..8].to_vec(),
            });
        }
        let (_, entry_count) = nom::number::complete::le_u16::<_, nom::error::Error<&[u8]>>(
            &region[10..12],
        )?;
        if entry_count > MAX_ENTRY_COUNT {
            return Err(VhdiError::ValueOutOfBounds {
                field: "metadata entry_count",
                value: entry_count as i64,
            });
        }

        let mut locations: HashMap<Uuid, ItemLocation> = HashMap::with_capacity(entry_count as usize);
        let mut cursor = &region[TABLE_HEADER_SIZE..];
        for _ in 0..entry_count {
            let (next, raw) = parse_entry(cursor)?;
            cursor = next;
            if raw.offset < MIN_ITEM_OFFSET {
                return Err(VhdiError::ValueOutOfBounds {
                    field: "metadata item_offset",
                    value: raw.offset as i64,
                });
            }
            locations.insert(
                raw.item_id,
                ItemLocation {
                    offset: raw.offset,
                    length: raw.length,
                    required: raw.required,
                },
            );
        }

        let find = |id: Uuid, field: &'static str| -> Result<ItemLocation> {
            locations.get(&id).copied().ok_or(VhdiError::ValueMissing(field))
        };

        let file_parameters_loc = find(metadata_item_file_parameters(), "file_parameters")?;
        let virtual_disk_size_loc = find(metadata_item_virtual_disk_size(), "virtual_disk_size")?;
        let virtual_disk_identifier_loc =
            find(metadata_item_virtual_disk_identifier(), "virtual_disk_identifier")?;
        let logical_sector_size_loc =
            find(metadata_item_logical_sector_size(), "logical_sector_size")?;
        let physical_sector_size_loc =
            find(metadata_item_physical_sector_size(), "physical_sector_size")?;
        let parent_locator = locations.get(&metadata_item_parent_locator()).copied();

        let file_parameters = parse_file_parameters(read_item(region, file_parameters_loc)?)?;
        let (_, virtual_disk_size) = le_u64::<_, nom::error::Error<&[u8]>>(read_item(
            region,
            virtual_disk_size_loc,
        )?)?;
        let raw_identifier: [u8; 16] = read_item(region, virtual_disk_identifier_loc)?
            .try_into()
            .map_err(|_| VhdiError::InvalidArgument("virtual_disk_identifier must be 16 bytes"))?;
        let virtual_disk_identifier = Uuid::from_bytes(le_mixed_to_be(&raw_identifier));
        let logical_sector_size = parse_sector_size(read_item(region, logical_sector_size_loc)?)?;
        let physical_sector_size = parse_sector_size(read_item(region, physical_sector_size_loc)?)?;

        Ok(Metadata {
            file_parameters,
            virtual_disk_size,
            virtual_disk_identifier,
            logical_sector_size,
            physical_sector_size,
            parent_locator,
        })
    }
}
