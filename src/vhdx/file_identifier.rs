//! The VHDX file type identifier — the first 64 KiB of the file,
//! holding just the signature and the name of whatever wrote it.

use nom::combinator::map;
use nom::sequence::tuple;

use crate::error::{Result, VhdiError};
use crate::parse_utils::{t_utf16le_fixed, NomResult};
use crate::signatures::VHDX_FILE_SIGNATURE;

pub const SIZE: usize = 65536;
const CREATOR_SIZE: usize = 512;

#[derive(Debug, Clone)]
pub struct FileIdentifier {
    pub creator: String,
}

fn parse_raw(data: &[u8]) -> NomResult<'_, String> {
    map(tuple((nom::bytes::complete::take(8usize), t_utf16le_fixed(CREATOR_SIZE))), |(_sig, creator)| {
        creator
    })(data)
}

impl FileIdentifier {
    pub fn parse(data: &[u8]) -> Result<FileIdentifier> {
        if data.len() < 8 + CREATOR_SIZE {
            return Err(VhdiError::ValueOutOfBounds {
                field: "file identifier data",
                value: data.len() as i64,
            });
        }
        if &data[0..8] != VHDX_FILE_SIGNATURE.as_slice() {
            return Err(VhdiError::UnsupportedSignature {
                context: "VHDX file identifier",
                expected: VHDX_FILE_SIGNATURE.as_slice(),
                found: data[0..8].to_vec(),
            });
        }
        let (_, creator) = parse_raw(data)?;
        Ok(FileIdentifier { creator })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signature_and_creator() {
        let mut data = vec![0u8; 8 + CREATOR_SIZE];
        data[0..8].copy_from_slice(b"vhdxfile");
        let name: Vec<u8> = "Microsoft Windows 10.0.19045.0"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        data[8..8 + name.len()].copy_from_slice(&name);
        let fti = FileIdentifier::parse(&data).unwrap();
        assert_eq!(fti.creator, "Microsoft Windows 10.0.19045.0");
    }

    #[test]
    fn rejects_bad_signature() {
        let data = vec![0u8; 8 + CREATOR_SIZE];
        assert!(FileIdentifier::parse(&data).is_err());
    }
}
