//! The VHDX parent locator item — a small key/value table embedded in
//! the metadata region that tells a differencing disk where to find
//! its parent.

use std::collections::HashMap;

use nom::combinator::map;
use nom::number::complete::{le_u16, le_u32};
use nom::sequence::tuple;

use crate::error::{Result, VhdiError};
use crate::parse_utils::t_guid_le;
use crate::signatures::parent_locator_type;
use uuid::Uuid;

pub const HEADER_SIZE: usize = 20;
const ENTRY_SIZE: usize = 12;

#[derive(Debug, Clone)]
pub struct ParentLocator {
    pub linkage: [u8; 16],
    pub absolute_win32_path: Option<String>,
    pub volume_path: Option<String>,
    pub relative_path: Option<String>,
}

struct EntryRaw {
    key_offset: u16,
    value_offset: u16,
    key_size: u16,
    value_size: u16,
}

fn parse_entry(data: &[u8]) -> nom::IResult<&[u8], EntryRaw, nom::error::Error<&[u8]>> {
    map(
        tuple((le_u16, le_u16, le_u16, le_u16, le_u32)),
        |(key_offset, value_offset, key_size, value_size, _reserved)| EntryRaw {
            key_offset,
            value_offset,
            key_size,
            value_size,
        },
    )(data)
}

fn read_utf16le_value(data: &[u8], offset: u16, size: u16) -> Result<String> {
    let start = offset as usize;
    let end = start
        .checked_add(size as usize)
        .ok_or(VhdiError::ValueOutOfBounds {
            field: "parent locator entry",
            value: size as i64,
        })?;
    let bytes = data.get(start..end).ok_or(VhdiError::ValueOutOfBounds {
        field: "parent locator entry",
        value: offset as i64,
    })?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| VhdiError::Parse("invalid utf-16 parent locator value".to_string()))
}

impl ParentLocator {
    /// Parses a parent locator item. `data` is the item's own byte
    /// range, as given by its metadata table entry.
    pub fn parse(data: &[u8]) -> Result<ParentLocator> {
        if data.len() < HEADER_SIZE {
            return Err(VhdiError::ValueOutOfBounds {
                field: "parent locator data",
                value: data.len() as i64,
            });
        }
        let (_, locator_type) = t_guid_le(&data[0..16])?;
        if locator_type != parent_locator_type() {
            return Err(VhdiError::UnsupportedValue {
                field: "parent locator type",
                value: 0,
            });
        }
        let (_, entry_count) = le_u16::<_, nom::error::Error<&[u8]>>(&data[18..20])?;

        let mut values: HashMap<String, String> = HashMap::with_capacity(entry_count as usize);
        let mut cursor = &data[HEADER_SIZE..];
        for _ in 0..entry_count {
            let (next, entry) = parse_entry(cursor)?;
            cursor = next;
            let key = read_utf16le_value(data, entry.key_offset, entry.key_size)?;
            let value = read_utf16le_value(data, entry.value_offset, entry.value_size)?;
            values.insert(key, value);
        }

        let linkage_str = values
            .get("parent_linkage")
            .ok_or(VhdiError::ValueMissing("parent_linkage"))?;
        let linkage_uuid = Uuid::parse_str(linkage_str.trim_matches(|c| c == '{' || c == '}'))
            .map_err(|_| VhdiError::Parse(format!("invalid parent linkage guid: {linkage_str:?}")))?;
        let linkage = *linkage_uuid.as_bytes();

        Ok(ParentLocator {
            linkage,
            absolute_win32_path: values.get("absolute_win32_path").cloned(),
            volume_path: values.get("volume_path").cloned(),
            relative_path: values.get("relative_path").cloned(),
        })
    }

    /// The path to use when opening the parent, in the priority order
    /// the format favors: an absolute path, then a volume-qualified
    /// path, then a path relative to this image.
    pub fn preferred_path(&self) -> Option<&str> {
        self.absolute_win32_path
            .as_deref()
            .or(self.volume_path.as_deref())
            .or(self.relative_path.as_deref())
    }
}
