//! The VHDX header — a 4 KiB record present at both offset 64 KiB and
//! 128 KiB. Only one of the two copies is "current" at any time; the
//! other exists purely for power-failure consistency.

use crc::{Crc, CRC_32_ISCSI};
use nom::combinator::map;
use nom::sequence::tuple;

use crate::error::{Result, VhdiError};
use crate::parse_utils::{t_guid_le, t_le_u16, t_le_u32, t_le_u64, NomResult};
use crate::signatures::VHDX_HEADER_SIGNATURE;
use uuid::Uuid;

pub const SIZE: usize = 4096;
const VERSION: u16 = 1;

#[derive(Debug, Clone)]
pub struct Header {
    pub sequence_number: u64,
    pub file_write_guid: Uuid,
    pub data_write_guid: Uuid,
    pub log_guid: Uuid,
    pub log_version: u16,
    pub version: u16,
    pub log_length: u32,
    pub log_offset: u64,
}

struct HeaderRaw {
    checksum: u32,
    sequence_number: u64,
    file_write_guid: Uuid,
    data_write_guid: Uuid,
    log_guid: Uuid,
    log_version: u16,
    version: u16,
    log_length: u32,
    log_offset: u64,
}

fn parse_raw(data: &[u8]) -> NomResult<'_, HeaderRaw> {
    map(
        tuple((
            t_le_u32, // checksum
            t_le_u64, // sequence_number
            t_guid_le,
            t_guid_le,
            t_guid_le,
            t_le_u16,
            t_le_u16,
            t_le_u32,
            t_le_u64,
        )),
        |(
            checksum,
            sequence_number,
            file_write_guid,
            data_write_guid,
            log_guid,
            log_version,
            version,
            log_length,
            log_offset,
        )| HeaderRaw {
            checksum,
            sequence_number,
            file_write_guid,
            data_write_guid,
            log_guid,
            log_version,
            version,
            log_length,
            log_offset,
        },
    )(data)
}

fn checksum(data: &[u8; SIZE]) -> u32 {
    let mut zeroed = *data;
    zeroed[4..8].fill(0);
    let crc = Crc::<u32>::new(&CRC_32_ISCSI);
    crc.checksum(&zeroed)
}

impl Header {
    /// Parses and validates a single 4096-byte header record.
    pub fn parse(data: &[u8]) -> Result<Header> {
        if data.len() < SIZE {
            return Err(VhdiError::ValueOutOfBounds {
                field: "vhdx header data",
                value: data.len() as i64,
            });
        }
        if &data[0..4] != VHDX_HEADER_SIGNATURE.as_slice() {
            return Err(VhdiError::UnsupportedSignature {
                context: "VHDX header",
                expected: VHDX_HEADER_SIGNATURE.as_slice(),
                found: data[0..4].to_vec(),
            });
        }
        let mut fixed = [0u8; SIZE];
        fixed.copy_from_slice(&data[0..SIZE]);
        let (_, raw) = parse_raw(&data[4..])?;
        let computed = checksum(&fixed);
        if computed != raw.checksum {
            return Err(VhdiError::ChecksumMismatch {
                context: "VHDX header",
                expected: raw.checksum,
                computed,
            });
        }
        if raw.version != VERSION {
            return Err(VhdiError::UnsupportedVersion {
                context: "VHDX header",
                value: raw.version as u64,
            });
        }
        Ok(Header {
            sequence_number: raw.sequence_number,
            file_write_guid: raw.file_write_guid,
            data_write_guid: raw.data_write_guid,
            log_guid: raw.log_guid,
            log_version: raw.log_version,
            version: raw.version,
            log_length: raw.log_length,
            log_offset: raw.log_offset,
        })
    }

    /// Picks the current header out of the file's two header copies: the
    /// only valid one, or whichever valid one has the higher
    /// `sequence_number`. Mirrors the MS-VHDX rule that a corrupt file is
    /// one where neither copy validates.
    pub fn current(data_a: &[u8], data_b: &[u8]) -> Result<Header> {
        let a = Header::parse(data_a);
        let b = Header::parse(data_b);
        match (a, b) {
            (Ok(ha), Ok(hb)) => {
                if ha.sequence_number >= hb.sequence_number {
                    Ok(ha)
                } else {
                    Ok(hb)
                }
            }
            (Ok(ha), Err(_)) => Ok(ha),
            (Err(_), Ok(hb)) => Ok(hb),
            (Err(err), Err(_)) => Err(err),
        }
    }
}
