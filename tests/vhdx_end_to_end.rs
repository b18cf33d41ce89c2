//! End-to-end VHDX scenarios driven through a real file-backed
//! `ByteSource`, exercising the full open sequence (file identifier,
//! dual headers, dual region tables, metadata table, BAT) rather than
//! any one parser in isolation.

use std::io::Write;
use std::sync::Arc;

use crc::{Crc, CRC_32_ISCSI};
use tempfile::NamedTempFile;
use uuid::Uuid;

use vhdi::{ByteSource, Image, OpenFlags};

const FTI_OFFSET: u64 = 0;
const HEADER_A_OFFSET: u64 = 64 * 1024;
const HEADER_B_OFFSET: u64 = 128 * 1024;
const REGION_A_OFFSET: u64 = 192 * 1024;
const REGION_B_OFFSET: u64 = 256 * 1024;
const REGION_SIZE: usize = 65536;
const HEADER_RECORD_SIZE: usize = 4096;
const METADATA_OFFSET: u64 = 1024 * 1024;
const METADATA_MIN_ITEM_OFFSET: u32 = 64 * 1024;

fn crc32c(data: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_ISCSI).checksum(data)
}

fn put(buf: &mut Vec<u8>, offset: u64, bytes: &[u8]) {
    let end = offset as usize + bytes.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[offset as usize..end].copy_from_slice(bytes);
}

fn build_header_record(sequence_number: u64, data_write_guid: Uuid) -> Vec<u8> {
    let mut data = vec![0u8; HEADER_RECORD_SIZE];
    data[0..4].copy_from_slice(b"head");
    data[8..16].copy_from_slice(&sequence_number.to_le_bytes());
    data[32..48].copy_from_slice(&data_write_guid.to_bytes_le());
    data[66..68].copy_from_slice(&1u16.to_le_bytes()); // format version
    let checksum = crc32c(&data);
    data[4..8].copy_from_slice(&checksum.to_le_bytes());
    data
}

struct RegionSpec {
    guid: Uuid,
    file_offset: u64,
    length: u32,
}

fn build_region_table(entries: &[RegionSpec]) -> Vec<u8> {
    let mut data = vec![0u8; REGION_SIZE];
    data[0..4].copy_from_slice(b"regi");
    data[8..12].copy_from_slice(&(entries.len() as u32).to_le_bytes());
    let mut offset = 16usize;
    for entry in entries {
        data[offset..offset + 16].copy_from_slice(&entry.guid.to_bytes_le());
        data[offset + 16..offset + 24].copy_from_slice(&entry.file_offset.to_le_bytes());
        data[offset + 24..offset + 28].copy_from_slice(&entry.length.to_le_bytes());
        data[offset + 28..offset + 32].copy_from_slice(&1u32.to_le_bytes()); // required
        offset += 32;
    }
    let checksum = crc32c(&data);
    data[4..8].copy_from_slice(&checksum.to_le_bytes());
    data
}

// Well-known region/metadata-item GUIDs, duplicated here (rather than
// imported) so the test builds its fixtures independently of the
// library's own constant table.
fn region_type_bat() -> Uuid {
    Uuid::from_bytes_le([
        0x66, 0x77, 0xc2, 0x2d, 0x23, 0xf6, 0x00, 0x42, 0x9d, 0x64, 0x11, 0x5e, 0x9b, 0xfd, 0x4a, 0x08,
    ])
}
fn region_type_metadata() -> Uuid {
    Uuid::from_bytes_le([
        0x06, 0xa2, 0x7c, 0x8b, 0x90, 0x47, 0x9a, 0x4b, 0xb8, 0xfe, 0x57, 0x5f, 0x05, 0x0f, 0x88, 0x6e,
    ])
}
fn metadata_item_file_parameters() -> Uuid {
    Uuid::from_bytes_le([
        0x37, 0x67, 0xa1, 0xca, 0x36, 0xfa, 0x43, 0x4d, 0xb3, 0xb6, 0x33, 0xf0, 0xaa, 0x44, 0xe7, 0x6b,
    ])
}
fn metadata_item_virtual_disk_size() -> Uuid {
    Uuid::from_bytes_le([
        0x24, 0x42, 0xa5, 0x2f, 0x1b, 0xcd, 0x76, 0x48, 0xb2, 0x11, 0x5d, 0xbe, 0xd8, 0x3b, 0xf4, 0xb8,
    ])
}
fn metadata_item_virtual_disk_identifier() -> Uuid {
    Uuid::from_bytes_le([
        0xab, 0x12, 0xca, 0xbe, 0xe6, 0xb2, 0x23, 0x45, 0x93, 0xef, 0xc3, 0x09, 0xe0, 0x00, 0xc7, 0x46,
    ])
}
fn metadata_item_logical_sector_size() -> Uuid {
    Uuid::from_bytes_le([
        0x1d, 0xbf, 0x41, 0x81, 0x6f, 0xa9, 0x09, 0x47, 0xba, 0x47, 0xf2, 0x33, 0xa8, 0xfa, 0xab, 0x5f,
    ])
}
fn metadata_item_physical_sector_size() -> Uuid {
    Uuid::from_bytes_le([
        0xc7, 0x48, 0xa3, 0xcd, 0x5d, 0x44, 0x71, 0x44, 0x9c, 0xc9, 0xe9, 0x88, 0x52, 0x51, 0xc5, 0x56,
    ])
}
fn metadata_item_parent_locator() -> Uuid {
    Uuid::from_bytes_le([
        0x2d, 0x5f, 0xd3, 0xa8, 0x0b, 0xb3, 0x4d, 0x45, 0xab, 0xf7, 0xd3, 0xd8, 0x48, 0x34, 0xab, 0x0c,
    ])
}
fn parent_locator_type() -> Uuid {
    Uuid::from_bytes_le([
        0xb7, 0xef, 0x4a, 0xb0, 0x9e, 0xd1, 0x81, 0x4a, 0xb7, 0x89, 0x25, 0xb8, 0xe9, 0x44, 0x59, 0x13,
    ])
}

struct MetadataItem {
    id: Uuid,
    offset: u32,
    bytes: Vec<u8>,
}

fn build_metadata_region(items: &[MetadataItem]) -> Vec<u8> {
    let mut data = vec![0u8; 384 * 1024];
    data[0..8].copy_from_slice(b"metadata");
    data[10..12].copy_from_slice(&(items.len() as u16).to_le_bytes());
    let mut entry_offset = 32usize;
    for item in items {
        data[entry_offset..entry_offset + 16].copy_from_slice(&item.id.to_bytes_le());
        data[entry_offset + 16..entry_offset + 20].copy_from_slice(&item.offset.to_le_bytes());
        data[entry_offset + 20..entry_offset + 24].copy_from_slice(&(item.bytes.len() as u32).to_le_bytes());
        data[entry_offset + 24] = 0b100; // required
        entry_offset += 32;

        let start = item.offset as usize;
        data[start..start + item.bytes.len()].copy_from_slice(&item.bytes);
    }
    data
}

fn file_parameters_item(block_size: u32, disk_type_bits: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; 8];
    bytes[0..4].copy_from_slice(&block_size.to_le_bytes());
    bytes[4..8].copy_from_slice(&disk_type_bits.to_le_bytes());
    bytes
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn parent_locator_item(linkage: Uuid, relative_path: &str) -> Vec<u8> {
    let entries = [
        ("parent_linkage", format!("{{{}}}", linkage.to_string().to_uppercase())),
        ("relative_path", relative_path.to_string()),
    ];
    let header_size = 20usize;
    let entry_size = 12usize;
    let mut header = vec![0u8; header_size];
    header[0..16].copy_from_slice(&parent_locator_type().to_bytes_le());
    header[18..20].copy_from_slice(&(entries.len() as u16).to_le_bytes());

    let mut entry_table = Vec::new();
    let mut payload = Vec::new();
    let payload_base = header_size + entries.len() * entry_size;
    for (key, value) in &entries {
        let key_bytes = utf16le(key);
        let value_bytes = utf16le(value);
        let key_offset = payload_base + payload.len();
        payload.extend_from_slice(&key_bytes);
        let value_offset = payload_base + payload.len();
        payload.extend_from_slice(&value_bytes);

        entry_table.extend_from_slice(&(key_offset as u16).to_le_bytes());
        entry_table.extend_from_slice(&(value_offset as u16).to_le_bytes());
        entry_table.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
        entry_table.extend_from_slice(&(value_bytes.len() as u16).to_le_bytes());
        entry_table.extend_from_slice(&0u32.to_le_bytes());
    }

    let mut data = header;
    data.extend_from_slice(&entry_table);
    data.extend_from_slice(&payload);
    data
}

struct ImageBuilder {
    data: Vec<u8>,
    metadata_items: Vec<MetadataItem>,
    next_item_offset: u32,
    data_write_guid: Uuid,
    bat_region_offset: u64,
}

impl ImageBuilder {
    fn new(data_write_guid: Uuid) -> Self {
        let mut data = vec![0u8; METADATA_OFFSET as usize];
        data[0..8].copy_from_slice(b"vhdxfile");
        ImageBuilder {
            data,
            metadata_items: Vec::new(),
            next_item_offset: METADATA_MIN_ITEM_OFFSET,
            data_write_guid,
            bat_region_offset: 0,
        }
    }

    fn add_item(&mut self, id: Uuid, bytes: Vec<u8>) {
        let offset = self.next_item_offset;
        self.next_item_offset += bytes.len().max(512) as u32;
        self.metadata_items.push(MetadataItem { id, offset, bytes });
    }

    fn write_block_data(&mut self, file_offset: u64, bytes: &[u8]) {
        put(&mut self.data, file_offset, bytes);
    }

    fn write_bat_entry(&mut self, bat_base: u64, physical_index: u64, file_offset_mib: u64, state: u8) {
        let raw = (file_offset_mib << 20) | state as u64;
        put(&mut self.data, bat_base + physical_index * 8, &raw.to_le_bytes());
    }

    fn finish(mut self, bat_region_offset: u64, bat_region_length: u32) -> Vec<u8> {
        self.bat_region_offset = bat_region_offset;

        let header = build_header_record(1, self.data_write_guid);
        put(&mut self.data, HEADER_A_OFFSET, &header);
        put(&mut self.data, HEADER_B_OFFSET, &header);

        let metadata_region = build_metadata_region(&self.metadata_items);
        let metadata_length = metadata_region.len() as u32;
        put(&mut self.data, METADATA_OFFSET, &metadata_region);

        let regions = vec![
            RegionSpec { guid: region_type_bat(), file_offset: bat_region_offset, length: bat_region_length },
            RegionSpec {
                guid: region_type_metadata(),
                file_offset: METADATA_OFFSET,
                length: metadata_length,
            },
        ];
        let region_table = build_region_table(&regions);
        put(&mut self.data, REGION_A_OFFSET, &region_table);
        put(&mut self.data, REGION_B_OFFSET, &region_table);

        self.data
    }
}

fn to_temp_file(data: Vec<u8>) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    file
}

fn byte_source(file: &NamedTempFile) -> Box<dyn ByteSource> {
    Box::new(std::fs::File::open(file.path()).unwrap())
}

#[test]
fn vhdx_fixed_disk_reads_1_to_1_through_the_bat() {
    let mut builder = ImageBuilder::new(Uuid::new_v4());
    builder.add_item(metadata_item_file_parameters(), file_parameters_item(32 * 1024 * 1024, 1));
    builder.add_item(metadata_item_virtual_disk_size(), (16u64 * 1024 * 1024).to_le_bytes().to_vec());
    builder.add_item(
        metadata_item_virtual_disk_identifier(),
        Uuid::new_v4().to_bytes_le().to_vec(),
    );
    builder.add_item(metadata_item_logical_sector_size(), 4096u32.to_le_bytes().to_vec());
    builder.add_item(metadata_item_physical_sector_size(), 4096u32.to_le_bytes().to_vec());

    let bat_region_offset = 2 * 1024 * 1024;
    let payload_offset = 3 * 1024 * 1024;
    builder.write_bat_entry(bat_region_offset, 0, payload_offset / (1024 * 1024), 7);
    builder.write_block_data(payload_offset, b"DEADBEEF");

    let data = builder.finish(bat_region_offset, 4096);
    let file = to_temp_file(data);

    let image = Image::open(byte_source(&file), OpenFlags::Read).unwrap();
    assert_eq!(image.disk_type(), 2);
    assert_eq!(image.media_size(), 16 * 1024 * 1024);
    assert_eq!(image.bytes_per_sector(), 4096);

    let mut buf = [0u8; 8];
    image.read_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"DEADBEEF");
}

#[test]
fn vhdx_dynamic_partially_present_block_with_no_differential_bitmap_reads_as_fully_allocated() {
    let mut builder = ImageBuilder::new(Uuid::new_v4());
    builder.add_item(metadata_item_file_parameters(), file_parameters_item(32 * 1024 * 1024, 0));
    builder.add_item(metadata_item_virtual_disk_size(), (64u64 * 1024 * 1024).to_le_bytes().to_vec());
    builder.add_item(
        metadata_item_virtual_disk_identifier(),
        Uuid::new_v4().to_bytes_le().to_vec(),
    );
    builder.add_item(metadata_item_logical_sector_size(), 512u32.to_le_bytes().to_vec());
    builder.add_item(metadata_item_physical_sector_size(), 512u32.to_le_bytes().to_vec());

    let bat_region_offset = 2 * 1024 * 1024;
    let payload_offset = 8 * 1024 * 1024;
    // block_state 6 (PartiallyPresent) on a non-differential disk: the
    // design notes call for treating it as fully present, since there
    // is no separate chunk bitmap entry to consult.
    builder.write_bat_entry(bat_region_offset, 0, payload_offset / (1024 * 1024), 6);
    builder.write_block_data(payload_offset, &[0x5au8; 512]);
    // block 1 left as all-zero BAT bytes: NotPresent.

    let data = builder.finish(bat_region_offset, 4096);
    let file = to_temp_file(data);

    let image = Image::open(byte_source(&file), OpenFlags::Read).unwrap();

    let mut buf = [0u8; 512];
    image.read_at(0, &mut buf).unwrap();
    assert_eq!(buf, [0x5au8; 512]);

    let mut buf2 = [0xffu8; 512];
    image.read_at(32 * 1024 * 1024, &mut buf2).unwrap();
    assert_eq!(buf2, [0u8; 512]);
}

#[test]
fn vhdx_differential_partially_present_block_splits_ranges_and_falls_through_to_parent() {
    // The parent is an ordinary fixed VHD; only its identifier and
    // byte content matter to the child.
    let parent_identifier = Uuid::new_v4();
    let mut parent_data = vec![0x99u8; 64 * 1024 * 1024];
    let mut parent_footer = vec![0u8; 512];
    parent_footer[0..8].copy_from_slice(b"conectix");
    parent_footer[12..16].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    parent_footer[16..24].copy_from_slice(&0xffff_ffff_ffff_ffffu64.to_be_bytes());
    parent_footer[40..48].copy_from_slice(&(64u64 * 1024 * 1024).to_be_bytes());
    parent_footer[60..64].copy_from_slice(&2u32.to_be_bytes());
    parent_footer[68..84].copy_from_slice(parent_identifier.as_bytes());
    parent_data.extend_from_slice(&parent_footer);
    let parent_file = to_temp_file(parent_data);
    let parent = Arc::new(Image::open(byte_source(&parent_file), OpenFlags::Read).unwrap());

    let mut builder = ImageBuilder::new(Uuid::new_v4());
    builder.add_item(metadata_item_file_parameters(), file_parameters_item(32 * 1024 * 1024, 2));
    builder.add_item(metadata_item_virtual_disk_size(), (64u64 * 1024 * 1024).to_le_bytes().to_vec());
    builder.add_item(
        metadata_item_virtual_disk_identifier(),
        Uuid::new_v4().to_bytes_le().to_vec(),
    );
    builder.add_item(metadata_item_logical_sector_size(), 512u32.to_le_bytes().to_vec());
    builder.add_item(metadata_item_physical_sector_size(), 512u32.to_le_bytes().to_vec());
    builder.add_item(
        metadata_item_parent_locator(),
        parent_locator_item(parent_identifier, "..\\parent.vhdx"),
    );

    // entries_per_chunk for block_size=32MiB, bytes_per_sector=512 is 128
    // (matches the BAT worked example), so the chunk's sector-bitmap
    // entry sits at physical index 128.
    let bat_region_offset = 2 * 1024 * 1024;
    let block0_payload_offset = 8 * 1024 * 1024;
    let bitmap_payload_offset = 16 * 1024 * 1024;
    let block1_payload_offset = 24 * 1024 * 1024;

    builder.write_bat_entry(bat_region_offset, 0, block0_payload_offset / (1024 * 1024), 6);
    builder.write_bat_entry(bat_region_offset, 1, block1_payload_offset / (1024 * 1024), 7);
    builder.write_bat_entry(bat_region_offset, 128, bitmap_payload_offset / (1024 * 1024), 0);

    // Sector bitmap for block 0: bits 1,1,0,0,1,1,0,0 (LSB-first) in the
    // first byte, zero elsewhere -> ranges [0,1024) alloc, [1024,2048)
    // unalloc, [2048,3072) alloc, [3072,4096) unalloc, rest unalloc.
    builder.write_block_data(bitmap_payload_offset, &[0b0011_0011u8]);
    builder.write_block_data(block0_payload_offset, &[0x42u8; 3072]);
    builder.write_block_data(block1_payload_offset, &[0x77u8; 512]);

    let data = builder.finish(bat_region_offset, 2048);
    let file = to_temp_file(data);

    let child = Image::open(byte_source(&file), OpenFlags::Read).unwrap();
    child.set_parent_file(parent).unwrap();

    // Sectors [0,1024) are present in the child: its own 0x42 bytes.
    let mut buf = [0u8; 1024];
    child.read_at(0, &mut buf).unwrap();
    assert_eq!(buf, [0x42u8; 1024]);

    // Sectors [1024,2048) are absent in the child: fall through to the
    // parent's 0x99 bytes.
    let mut buf2 = [0u8; 1024];
    child.read_at(1024, &mut buf2).unwrap();
    assert_eq!(buf2, [0x99u8; 1024]);

    // Block 1 is FullyPresent: read directly from the child.
    let mut buf3 = [0u8; 512];
    child.read_at(32 * 1024 * 1024, &mut buf3).unwrap();
    assert_eq!(buf3, [0x77u8; 512]);
}

#[test]
fn vhdx_open_fails_when_either_region_table_copy_is_corrupt() {
    let mut builder = ImageBuilder::new(Uuid::new_v4());
    builder.add_item(metadata_item_file_parameters(), file_parameters_item(32 * 1024 * 1024, 1));
    builder.add_item(metadata_item_virtual_disk_size(), (16u64 * 1024 * 1024).to_le_bytes().to_vec());
    builder.add_item(
        metadata_item_virtual_disk_identifier(),
        Uuid::new_v4().to_bytes_le().to_vec(),
    );
    builder.add_item(metadata_item_logical_sector_size(), 4096u32.to_le_bytes().to_vec());
    builder.add_item(metadata_item_physical_sector_size(), 4096u32.to_le_bytes().to_vec());

    let bat_region_offset = 2 * 1024 * 1024;
    builder.write_bat_entry(bat_region_offset, 0, 3, 7);

    let mut data = builder.finish(bat_region_offset, 4096);
    // Corrupt the first region table copy's CRC only.
    let idx = REGION_A_OFFSET as usize + 20;
    data[idx] ^= 0xff;
    let file = to_temp_file(data);

    let err = Image::open(byte_source(&file), OpenFlags::Read).unwrap_err();
    assert!(matches!(err, vhdi::VhdiError::ChecksumMismatch { .. }));
}
