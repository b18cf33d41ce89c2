//! Shared `nom` combinators for fixed-layout binary records.
//!
//! VHDX fields are little-endian; VHD fields are big-endian. Each
//! format's parser module pulls in only the half it needs.

use nom::bytes::complete::take;
use nom::combinator::map;
use nom::number::complete::{be_u32, be_u64, le_u16, le_u32, le_u64};
use nom::IResult;
use uuid::Uuid;

pub type NomError<'a> = nom::error::Error<&'a [u8]>;
pub type NomResult<'a, O> = IResult<&'a [u8], O, NomError<'a>>;

pub fn t_le_u16(input: &[u8]) -> NomResult<'_, u16> {
    le_u16(input)
}

pub fn t_le_u32(input: &[u8]) -> NomResult<'_, u32> {
    le_u32(input)
}

pub fn t_le_u64(input: &[u8]) -> NomResult<'_, u64> {
    le_u64(input)
}

pub fn t_be_u32(input: &[u8]) -> NomResult<'_, u32> {
    be_u32(input)
}

pub fn t_be_u64(input: &[u8]) -> NomResult<'_, u64> {
    be_u64(input)
}

/// A 16-byte on-disk little-endian GUID (VHDX's native encoding).
pub fn t_guid_le(input: &[u8]) -> NomResult<'_, Uuid> {
    map(take(16usize), |bytes: &[u8]| {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Uuid::from_bytes_le(raw)
    })(input)
}

/// A 16-byte on-disk big-endian GUID (VHD's native encoding).
pub fn t_guid_be(input: &[u8]) -> NomResult<'_, Uuid> {
    map(take(16usize), |bytes: &[u8]| {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Uuid::from_bytes(raw)
    })(input)
}

/// The VHDX FTI `creator` field: a 512-byte, NUL-padded UTF-16LE string.
pub fn t_utf16le_fixed(len: usize) -> impl Fn(&[u8]) -> NomResult<'_, String> {
    move |input: &[u8]| {
        map(take(len), |bytes: &[u8]| {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .take_while(|&unit| unit != 0)
                .collect();
            String::from_utf16_lossy(&units)
        })(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_le_round_trips_mixed_endian_bytes() {
        let bytes = [
            0x66, 0x77, 0xc2, 0x2d, 0x23, 0xf6, 0x00, 0x42, 0x9d, 0x64, 0x11, 0x5e, 0x9b, 0xfd,
            0x4a, 0x08,
        ];
        let (_, uuid) = t_guid_le(&bytes).unwrap();
        assert_eq!(uuid.to_string(), "2dc27766-f623-4200-9d64-115e9bfd4a08");
    }

    #[test]
    fn utf16le_fixed_stops_at_first_nul() {
        let mut bytes = "hi".encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<u8>>();
        bytes.resize(16, 0);
        let (_, s) = t_utf16le_fixed(16)(&bytes).unwrap();
        assert_eq!(s, "hi");
    }
}
