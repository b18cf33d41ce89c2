//! The VHD dynamic disk header — 1024 bytes, big-endian, located at
//! `footer.next_offset` for any dynamic or differencing disk.

use nom::bytes::complete::take;
use nom::combinator::map;
use nom::sequence::tuple;

use crate::error::{Result, VhdiError};
use crate::parse_utils::{t_be_u32, t_be_u64, t_guid_be, NomResult};
use crate::signatures::VHD_DYNAMIC_HEADER_SIGNATURE;

pub const SIZE: usize = 1024;
const FORMAT_VERSION: u32 = 0x0001_0000;
const PARENT_FILENAME_SIZE: usize = 512;

#[derive(Debug, Clone)]
pub struct DynamicHeader {
    pub table_offset: u64,
    pub number_of_blocks: u32,
    pub block_size: u32,
    pub parent_identifier: [u8; 16],
    pub parent_filename: String,
}

struct HeaderRaw {
    format_version: u32,
    table_offset: u64,
    max_table_entries: u32,
    block_size: u32,
    parent_identifier: [u8; 16],
}

fn parse_raw(data: &[u8]) -> NomResult<'_, HeaderRaw> {
    map(
        tuple((
            take(8usize), // cookie, checked by the caller
            t_be_u64,     // data_offset, unused (always 0xffffffffffffffff)
            t_be_u64,     // table_offset
            t_be_u32,     // format_version
            t_be_u32,     // max_table_entries
            t_be_u32,     // block_size
            t_be_u32,     // checksum
            take(16usize), // parent unique id, handled separately below
            t_be_u32,     // parent timestamp
            take(4usize), // reserved
        )),
        |(
            _cookie,
            _data_offset,
            table_offset,
            format_version,
            max_table_entries,
            block_size,
            _checksum,
            parent_identifier,
            _parent_timestamp,
            _reserved,
        )| {
            let mut id = [0u8; 16];
            id.copy_from_slice(parent_identifier);
            HeaderRaw {
                format_version,
                table_offset,
                max_table_entries,
                block_size,
                parent_identifier: id,
            }
        },
    )(data)
}

/// Scans a 512-byte UTF-16BE, NUL-terminated `parent_filename` field for
/// the first 16-bit NUL code unit and decodes everything before it.
fn decode_parent_filename(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

impl DynamicHeader {
    /// Parses a 1024-byte dynamic disk header, validating the cookie
    /// (`"cxsparse"`), `format_version`, and `block_size`.
    pub fn parse(data: &[u8]) -> Result<DynamicHeader> {
        if data.len() < SIZE {
            return Err(VhdiError::ValueOutOfBounds {
                field: "dynamic header data",
                value: data.len() as i64,
            });
        }
        if &data[0..8] != VHD_DYNAMIC_HEADER_SIGNATURE.as_slice() {
            return Err(VhdiError::UnsupportedSignature {
                context: "VHD dynamic header",
                expected: VHD_DYNAMIC_HEADER_SIGNATURE.as_slice(),
                found: data[0..8].to_vec(),
            });
        }
        let (_, raw) = parse_raw(data)?;
        if raw.format_version != FORMAT_VERSION {
            return Err(VhdiError::UnsupportedVersion {
                context: "VHD dynamic header",
                value: raw.format_version as u64,
            });
        }
        if raw.block_size == 0 || raw.block_size % 512 != 0 {
            return Err(VhdiError::UnsupportedValue {
                field: "block_size",
                value: raw.block_size as u64,
            });
        }
        // Layout: cookie(8) data_offset(8) table_offset(8) format_version(4)
        // max_table_entries(4) block_size(4) checksum(4) parent_unique_id(16)
        // parent_timestamp(4) reserved(4) parent_unicode_name(512) ... = offset 64.
        let filename_field = &data[64..64 + PARENT_FILENAME_SIZE];
        let parent_filename = decode_parent_filename(filename_field);

        Ok(DynamicHeader {
            table_offset: raw.table_offset,
            number_of_blocks: raw.max_table_entries,
            block_size: raw.block_size,
            parent_identifier: raw.parent_identifier,
            parent_filename,
        })
    }
}
