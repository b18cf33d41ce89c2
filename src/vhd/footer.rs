//! The VHD footer — 512 bytes, big-endian, present both at offset 0
//! (dynamic/differential disks only) and, authoritatively, at
//! `file_size - 512`.

use nom::bytes::complete::take;
use nom::combinator::map;
use nom::sequence::tuple;

use crate::error::{Result, VhdiError};
use crate::parse_utils::{t_be_u32, t_be_u64, t_guid_be, NomResult};
use crate::signatures::VHD_FOOTER_SIGNATURE;
use crate::types::DiskType;
use uuid::Uuid;

pub const SIZE: usize = 512;
const FORMAT_VERSION: u32 = 0x0001_0000;

#[derive(Debug, Clone)]
pub struct Footer {
    pub format_version: u32,
    pub next_offset: i64,
    pub media_size: u64,
    pub disk_type: DiskType,
    pub identifier: Uuid,
}

struct FooterRaw {
    format_version: u32,
    next_offset: i64,
    media_size: u64,
    disk_type_raw: u32,
    identifier: Uuid,
}

fn parse_raw(data: &[u8]) -> NomResult<'_, FooterRaw> {
    map(
        tuple((
            take(8usize), // cookie, checked by the caller
            t_be_u32,     // features
            t_be_u32,     // format_version
            t_be_u64,     // data_offset / next_offset
            t_be_u32,     // timestamp
            take(4usize), // creator application
            t_be_u32,     // creator version
            take(4usize), // creator host os
            t_be_u64,     // original size
            t_be_u64,     // current size (media_size)
            take(4usize), // disk geometry
            t_be_u32,     // disk_type
            t_be_u32,     // checksum
            t_guid_be,    // unique id
        )),
        |(
            _cookie,
            _features,
            format_version,
            next_offset,
            _timestamp,
            _creator_app,
            _creator_version,
            _creator_host_os,
            _original_size,
            media_size,
            _geometry,
            disk_type_raw,
            _checksum,
            identifier,
        )| FooterRaw {
            format_version,
            next_offset: next_offset as i64,
            media_size,
            disk_type_raw,
            identifier,
        },
    )(data)
}

impl Footer {
    /// Parses a 512-byte footer record, validating the cookie
    /// (`"conectix"`), `format_version`, and `disk_type`.
    pub fn parse(data: &[u8]) -> Result<Footer> {
        if data.len() < SIZE {
            return Err(VhdiError::ValueOutOfBounds {
                field: "footer data",
                value: data.len() as i64,
            });
        }
        if &data[0..8] != VHD_FOOTER_SIGNATURE.as_slice() {
            return Err(VhdiError::UnsupportedSignature {
                context: "VHD footer",
                expected: VHD_FOOTER_SIGNATURE.as_slice(),
                found: data[0..8].to_vec(),
            });
        }
        let (_, raw) = parse_raw(data)?;
        if raw.format_version != FORMAT_VERSION {
            return Err(VhdiError::UnsupportedVersion {
                context: "VHD footer",
                value: raw.format_version as u64,
            });
        }
        let disk_type = DiskType::from_vhd(raw.disk_type_raw)?;
        if disk_type == DiskType::Fixed && raw.next_offset != -1 {
            return Err(VhdiError::UnsupportedValue {
                field: "next_offset",
                value: raw.next_offset as u64,
            });
        }
        Ok(Footer {
            format_version: raw.format_version,
            next_offset: raw.next_offset,
            media_size: raw.media_size,
            disk_type,
            identifier: raw.identifier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_footer(disk_type: u32, next_offset: u64) -> Vec<u8> {
        let mut data = vec![0u8; SIZE];
        data[0..8].copy_from_slice(b"conectix");
        data[12..16].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        data[16..24].copy_from_slice(&next_offset.to_be_bytes());
        data[40..48].copy_from_slice(&(1024u64 * 1024).to_be_bytes()); // current size
        data[60..64].copy_from_slice(&disk_type.to_be_bytes());
        data[68..84].copy_from_slice(Uuid::nil().as_bytes());
        data
    }

    #[test]
    fn parses_a_fixed_footer() {
        let data = sample_footer(2, 0xffff_ffff_ffff_ffff);
        let footer = Footer::parse(&data).unwrap();
        assert_eq!(footer.disk_type, DiskType::Fixed);
        assert_eq!(footer.next_offset, -1);
        assert_eq!(footer.media_size, 1024 * 1024);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = sample_footer(2, 0xffff_ffff_ffff_ffff);
        data[0] = b'x';
        assert!(Footer::parse(&data).is_err());
    }

    #[test]
    fn rejects_fixed_disk_with_a_next_offset() {
        let data = sample_footer(2, 512);
        assert!(Footer::parse(&data).is_err());
    }
}
