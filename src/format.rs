//! C2 orchestration — detects the container format and runs the
//! format-specific open sequence, producing a tagged [`Format`] that
//! [`crate::image::Image`] drives without further `if file_type ==
//! ...` branching.

use crate::bat::BlockAllocationTable;
use crate::byte_source::ByteSource;
use crate::error::{Result, VhdiError};
use crate::signatures::{VHDX_FILE_SIGNATURE, VHD_FOOTER_SIGNATURE};
use crate::types::{DiskType, FileType};
use crate::{vhd, vhdx};

#[derive(Debug)]
pub struct VhdState {
    pub footer: vhd::footer::Footer,
    pub dynamic_header: Option<vhd::dynamic_header::DynamicHeader>,
}

#[derive(Debug)]
pub struct VhdxState {
    pub creator: String,
    pub header: vhdx::header::Header,
    pub metadata: vhdx::metadata::Metadata,
    pub parent_locator: Option<vhdx::parent_locator::ParentLocator>,
    pub bat_region: vhdx::region_table::RegionEntry,
}

#[derive(Debug)]
pub enum Format {
    Vhd(VhdState),
    Vhdx(VhdxState),
}

impl Format {
    /// Detects the container format and runs its open sequence (§4.1):
    /// for VHD, the footer and (if not fixed) the dynamic header; for
    /// VHDX, the file identifier, the current image header, both
    /// region tables (both must validate independently), the metadata
    /// table, and, for a differential disk, the parent locator.
    pub fn open(source: &mut dyn ByteSource) -> Result<Format> {
        let mut magic = [0u8; 8];
        source.read_at(0, &mut magic)?;
        if magic == *VHDX_FILE_SIGNATURE {
            tracing::debug!("detected VHDX file signature");
            Self::open_vhdx(source)
        } else {
            let file_size = source.size()?;
            if file_size < vhd::footer::SIZE as u64 {
                return Err(VhdiError::UnsupportedSignature {
                    context: "file type detection",
                    expected: VHD_FOOTER_SIGNATURE.as_slice(),
                    found: magic.to_vec(),
                });
            }
            let mut tail = [0u8; 8];
            source.read_at(file_size - vhd::footer::SIZE as u64, &mut tail)?;
            if tail != *VHD_FOOTER_SIGNATURE {
                return Err(VhdiError::UnsupportedSignature {
                    context: "file type detection",
                    expected: VHD_FOOTER_SIGNATURE.as_slice(),
                    found: tail.to_vec(),
                });
            }
            Self::open_vhd(source, file_size)
        }
    }

    fn open_vhd(source: &mut dyn ByteSource, file_size: u64) -> Result<Format> {
        let mut footer_data = vec![0u8; vhd::footer::SIZE];
        source.read_at(file_size - vhd::footer::SIZE as u64, &mut footer_data)?;
        let footer = vhd::footer::Footer::parse(&footer_data)?;
        tracing::debug!(disk_type = ?footer.disk_type, media_size = footer.media_size, "parsed VHD footer");

        let dynamic_header = if footer.disk_type != DiskType::Fixed {
            let mut header_data = vec![0u8; vhd::dynamic_header::SIZE];
            source.read_at(footer.next_offset as u64, &mut header_data)?;
            Some(vhd::dynamic_header::DynamicHeader::parse(&header_data)?)
        } else {
            None
        };

        Ok(Format::Vhd(VhdState { footer, dynamic_header }))
    }

    fn open_vhdx(source: &mut dyn ByteSource) -> Result<Format> {
        let mut fti_data = vec![0u8; vhdx::file_identifier::SIZE];
        source.read_at(0, &mut fti_data)?;
        let file_identifier = vhdx::file_identifier::FileIdentifier::parse(&fti_data)?;

        let mut header_a = vec![0u8; vhdx::header::SIZE];
        source.read_at(64 * 1024, &mut header_a)?;
        let mut header_b = vec![0u8; vhdx::header::SIZE];
        source.read_at(128 * 1024, &mut header_b)?;
        let header = vhdx::header::Header::current(&header_a, &header_b)?;
        tracing::debug!(sequence_number = header.sequence_number, "selected current VHDX header");

        // Both region table copies must validate independently; the
        // first copy's contents are authoritative.
        let mut region_a = vec![0u8; vhdx::region_table::SECTION_SIZE];
        source.read_at(192 * 1024, &mut region_a)?;
        let region_table = vhdx::region_table::RegionTable::parse(&region_a)?;
        let mut region_b = vec![0u8; vhdx::region_table::SECTION_SIZE];
        source.read_at(256 * 1024, &mut region_b)?;
        vhdx::region_table::RegionTable::parse(&region_b)?;

        let metadata_region_entry =
            region_table.get(vhdx::region_table::KnownRegion::Metadata)?;
        let mut metadata_region = vec![0u8; metadata_region_entry.length as usize];
        source.read_at(metadata_region_entry.file_offset, &mut metadata_region)?;
        let metadata = vhdx::metadata::Metadata::parse(&metadata_region)?;
        tracing::debug!(
            disk_type = ?metadata.file_parameters.disk_type,
            block_size = metadata.file_parameters.block_size,
            virtual_disk_size = metadata.virtual_disk_size,
            "parsed VHDX metadata table"
        );

        let parent_locator = if metadata.file_parameters.disk_type == DiskType::Differential {
            let location = metadata
                .parent_locator
                .ok_or(VhdiError::ValueMissing("parent_locator"))?;
            let start = location.offset as usize;
            let end = start + location.length as usize;
            let item_data =
                metadata_region
                    .get(start..end)
                    .ok_or(VhdiError::ValueOutOfBounds {
                        field: "parent_locator item",
                        value: location.offset as i64,
                    })?;
            Some(vhdx::parent_locator::ParentLocator::parse(item_data)?)
        } else {
            None
        };

        let bat_region = region_table.get(vhdx::region_table::KnownRegion::Bat)?;

        Ok(Format::Vhdx(VhdxState {
            creator: file_identifier.creator,
            header,
            metadata,
            parent_locator,
            bat_region,
        }))
    }

    pub fn file_type(&self) -> FileType {
        match self {
            Format::Vhd(_) => FileType::Vhd,
            Format::Vhdx(_) => FileType::Vhdx,
        }
    }

    pub fn disk_type(&self) -> DiskType {
        match self {
            Format::Vhd(state) => state.footer.disk_type,
            Format::Vhdx(state) => state.metadata.file_parameters.disk_type,
        }
    }

    pub fn format_version(&self) -> (u16, u16) {
        match self {
            Format::Vhd(state) => ((state.footer.format_version >> 16) as u16, 0),
            Format::Vhdx(state) => (state.header.version, 0),
        }
    }

    pub fn media_size(&self) -> u64 {
        match self {
            Format::Vhd(state) => state.footer.media_size,
            Format::Vhdx(state) => state.metadata.virtual_disk_size,
        }
    }

    pub fn bytes_per_sector(&self) -> u32 {
        match self {
            Format::Vhd(_) => 512,
            Format::Vhdx(state) => state.metadata.logical_sector_size,
        }
    }

    pub fn block_size(&self) -> Option<u64> {
        match self {
            Format::Vhd(state) => state.dynamic_header.as_ref().map(|h| h.block_size as u64),
            Format::Vhdx(state) => Some(state.metadata.file_parameters.block_size as u64),
        }
    }

    pub fn identifier(&self) -> [u8; 16] {
        match self {
            Format::Vhd(state) => *state.footer.identifier.as_bytes(),
            Format::Vhdx(state) => *state.header.data_write_guid.as_bytes(),
        }
    }

    /// `None` unless this image is actually differential: a plain
    /// dynamic VHD's header carries the same `parent_identifier` field
    /// syntactically, but it has no meaning outside a differencing
    /// disk.
    pub fn parent_identifier(&self) -> Option<[u8; 16]> {
        if self.disk_type() != DiskType::Differential {
            return None;
        }
        match self {
            Format::Vhd(state) => state.dynamic_header.as_ref().map(|h| h.parent_identifier),
            Format::Vhdx(state) => state.parent_locator.as_ref().map(|pl| pl.linkage),
        }
    }

    pub fn parent_filename(&self) -> Option<&str> {
        if self.disk_type() != DiskType::Differential {
            return None;
        }
        match self {
            Format::Vhd(state) => state
                .dynamic_header
                .as_ref()
                .map(|h| h.parent_filename.as_str()),
            Format::Vhdx(state) => state.parent_locator.as_ref().and_then(|pl| pl.preferred_path()),
        }
    }

    /// Builds this image's Block Allocation Table, or `None` for a VHD
    /// fixed disk, which has no BAT at all (§4.3: "the 'image' is
    /// simply a 1:1 mapping of virtual offset to file offset").
    pub fn build_bat(&self) -> Result<Option<BlockAllocationTable>> {
        match self {
            Format::Vhd(state) => match &state.dynamic_header {
                None => Ok(None),
                Some(header) => Ok(Some(BlockAllocationTable::new(
                    FileType::Vhd,
                    state.footer.disk_type,
                    header.table_offset,
                    header.block_size as u64,
                    512,
                    header.number_of_blocks as u64,
                )?)),
            },
            Format::Vhdx(state) => {
                let block_size = state.metadata.file_parameters.block_size as u64;
                let media_size = state.metadata.virtual_disk_size;
                let number_of_entries = media_size.div_ceil(block_size);
                Ok(Some(BlockAllocationTable::new(
                    FileType::Vhdx,
                    state.metadata.file_parameters.disk_type,
                    state.bat_region.file_offset,
                    block_size,
                    state.metadata.logical_sector_size,
                    number_of_entries,
                )?))
            }
        }
    }
}
