//! Small shared enums used across the parser and resolution layers.

use crate::error::{Result, VhdiError};

/// Which on-disk container format an image was opened as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Vhd,
    Vhdx,
}

/// `disk_type` as recorded in the VHD footer / VHDX file-parameters
/// metadata item. The numeric values differ between the two formats on
/// disk, but both collapse to this one set after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    Fixed,
    Dynamic,
    Differential,
}

impl DiskType {
    /// Maps a VHD footer `disk_type` value (2/3/4) to [`DiskType`].
    pub fn from_vhd(value: u32) -> Result<Self> {
        match value {
            2 => Ok(DiskType::Fixed),
            3 => Ok(DiskType::Dynamic),
            4 => Ok(DiskType::Differential),
            other => Err(VhdiError::UnsupportedValue {
                field: "disk_type",
                value: other as u64,
            }),
        }
    }

    /// Maps the low 2 bits of a VHDX `file_parameters` metadata item
    /// (0=DYNAMIC, 1=FIXED, 2=DIFFERENTIAL) to [`DiskType`].
    pub fn from_vhdx_file_parameters(low_bits: u32) -> Result<Self> {
        match low_bits {
            0 => Ok(DiskType::Dynamic),
            1 => Ok(DiskType::Fixed),
            2 => Ok(DiskType::Differential),
            other => Err(VhdiError::UnsupportedValue {
                field: "disk_type",
                value: other as u64,
            }),
        }
    }

    /// The numeric `disk_type` the public API reports, matching the
    /// VHD footer's own encoding regardless of source format.
    pub fn as_u32(self) -> u32 {
        match self {
            DiskType::Fixed => 2,
            DiskType::Dynamic => 3,
            DiskType::Differential => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vhd_disk_type_round_trips() {
        assert_eq!(DiskType::from_vhd(2).unwrap(), DiskType::Fixed);
        assert_eq!(DiskType::from_vhd(3).unwrap(), DiskType::Dynamic);
        assert_eq!(DiskType::from_vhd(4).unwrap(), DiskType::Differential);
        assert!(DiskType::from_vhd(5).is_err());
    }

    #[test]
    fn vhdx_file_parameters_disk_type_maps_low_bits() {
        assert_eq!(
            DiskType::from_vhdx_file_parameters(0).unwrap(),
            DiskType::Dynamic
        );
        assert_eq!(
            DiskType::from_vhdx_file_parameters(1).unwrap(),
            DiskType::Fixed
        );
        assert_eq!(
            DiskType::from_vhdx_file_parameters(2).unwrap(),
            DiskType::Differential
        );
        assert!(DiskType::from_vhdx_file_parameters(3).is_err());
    }
}
