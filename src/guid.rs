//! GUID byte-order helpers.
//!
//! On-disk GUIDs (VHD's big-endian identifiers, VHDX's little-endian
//! ones, and the UTF-16 GUID strings in a parent locator) all funnel
//! through [`uuid::Uuid`]; this module only handles the reshuffles and
//! string parsing the format spec calls for.

use crate::error::{Result, VhdiError};
use uuid::Uuid;

/// Parses 16 big-endian bytes (VHD footer `identifier`, VHD dynamic
/// header `parent_identifier`) into their raw big-endian form.
pub fn big_endian_bytes(data: &[u8]) -> Result<[u8; 16]> {
    data.try_into()
        .map_err(|_| VhdiError::InvalidArgument("guid data must be 16 bytes"))
}

/// Reshuffles a little-endian, mixed-endian on-disk GUID (VHDX metadata's
/// `virtual_disk_identifier`, the image header's `data_write_identifier`)
/// into its big-endian byte representation, per MS-VHDX's GUID encoding:
/// the first three fields (4+2+2 bytes) are byte-swapped, the last two
/// (2+8 bytes) are copied as-is.
pub fn le_mixed_to_be(data: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0] = data[3];
    out[1] = data[2];
    out[2] = data[1];
    out[3] = data[0];
    out[4] = data[5];
    out[5] = data[4];
    out[6] = data[7];
    out[7] = data[6];
    out[8..16].copy_from_slice(&data[8..16]);
    out
}

/// Parses a parent locator's `parent_linkage` value: a UTF-16LE string
/// of the form `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`, converted to a
/// 16-byte big-endian GUID (matching how VHDX's other identifiers are
/// exposed).
pub fn parse_guid_string_utf16le(data: &[u8]) -> Result<[u8; 16]> {
    if data.len() % 2 != 0 {
        return Err(VhdiError::InvalidArgument(
            "utf-16 guid string has an odd byte length",
        ));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let units: Vec<u16> = units
        .into_iter()
        .take_while(|&unit| unit != 0)
        .collect();
    let text = String::from_utf16(&units)
        .map_err(|_| VhdiError::Parse("invalid utf-16 guid string".to_string()))?;
    let uuid = Uuid::parse_str(text.trim())
        .map_err(|_| VhdiError::Parse(format!("invalid guid string: {text:?}")))?;
    Ok(*uuid.as_bytes())
}
