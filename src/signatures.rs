//! Magic byte strings and well-known GUIDs used throughout the format.
//!
//! The GUID constants are exactly the 16-byte identifiers libvhdi ships
//! as `libvhdi_region_type_identifier.c` / `libvhdi_metadata_item_identifier.c`,
//! read as on-disk little-endian bytes through [`Uuid::from_bytes_le`].

use uuid::Uuid;

pub const VHD_FOOTER_SIGNATURE: &[u8; 8] = b"conectix";
pub const VHD_DYNAMIC_HEADER_SIGNATURE: &[u8; 8] = b"cxsparse";

pub const VHDX_FILE_SIGNATURE: &[u8; 8] = b"vhdxfile";
pub const VHDX_HEADER_SIGNATURE: &[u8; 4] = b"head";
pub const VHDX_REGION_SIGNATURE: &[u8; 4] = b"regi";
pub const VHDX_METADATA_SIGNATURE: &[u8; 8] = b"metadata";

/// Region-table entry type identifier for the Block Allocation Table.
pub fn region_type_bat() -> Uuid {
    Uuid::from_bytes_le([
        0x66, 0x77, 0xc2, 0x2d, 0x23, 0xf6, 0x00, 0x42, 0x9d, 0x64, 0x11, 0x5e, 0x9b, 0xfd, 0x4a,
        0x08,
    ])
}

/// Region-table entry type identifier for the metadata region.
pub fn region_type_metadata() -> Uuid {
    Uuid::from_bytes_le([
        0x06, 0xa2, 0x7c, 0x8b, 0x90, 0x47, 0x9a, 0x4b, 0xb8, 0xfe, 0x57, 0x5f, 0x05, 0x0f, 0x88,
        0x6e,
    ])
}

pub fn metadata_item_file_parameters() -> Uuid {
    Uuid::from_bytes_le([
        0x37, 0x67, 0xa1, 0xca, 0x36, 0xfa, 0x43, 0x4d, 0xb3, 0xb6, 0x33, 0xf0, 0xaa, 0x44, 0xe7,
        0x6b,
    ])
}

pub fn metadata_item_virtual_disk_size() -> Uuid {
    Uuid::from_bytes_le([
        0x24, 0x42, 0xa5, 0x2f, 0x1b, 0xcd, 0x76, 0x48, 0xb2, 0x11, 0x5d, 0xbe, 0xd8, 0x3b, 0xf4,
        0xb8,
    ])
}

pub fn metadata_item_virtual_disk_identifier() -> Uuid {
    Uuid::from_bytes_le([
        0xab, 0x12, 0xca, 0xbe, 0xe6, 0xb2, 0x23, 0x45, 0x93, 0xef, 0xc3, 0x09, 0xe0, 0x00, 0xc7,
        0x46,
    ])
}

pub fn metadata_item_logical_sector_size() -> Uuid {
    Uuid::from_bytes_le([
        0x1d, 0xbf, 0x41, 0x81, 0x6f, 0xa9, 0x09, 0x47, 0xba, 0x47, 0xf2, 0x33, 0xa8, 0xfa, 0xab,
        0x5f,
    ])
}

pub fn metadata_item_physical_sector_size() -> Uuid {
    Uuid::from_bytes_le([
        0xc7, 0x48, 0xa3, 0xcd, 0x5d, 0x44, 0x71, 0x44, 0x9c, 0xc9, 0xe9, 0x88, 0x52, 0x51, 0xc5,
        0x56,
    ])
}

pub fn metadata_item_parent_locator() -> Uuid {
    Uuid::from_bytes_le([
        0x2d, 0x5f, 0xd3, 0xa8, 0x0b, 0xb3, 0x4d, 0x45, 0xab, 0xf7, 0xd3, 0xd8, 0x48, 0x34, 0xab,
        0x0c,
    ])
}

/// Parent locator type identifier for the VHDX-native locator format.
pub fn parent_locator_type() -> Uuid {
    Uuid::from_bytes_le([
        0xb7, 0xef, 0x4a, 0xb0, 0x9e, 0xd1, 0x81, 0x4a, 0xb7, 0x89, 0x25, 0xb8, 0xe9, 0x44, 0x59,
        0x13,
    ])
}
