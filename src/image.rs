//! C6 — the image handle: current offset, effective geometry, and the
//! `read`/`seek` loop that drives the BAT (C4) and descriptor cache
//! (C5) and falls through to a parent image (C7) for unallocated
//! sectors.
//!
//! All mutable state — the wrapped byte source, the current offset,
//! the descriptor cache, and the bound parent — lives behind one
//! `RwLock` per image, matching §5's "one read-write lock per image
//! protecting ALL mutable state". `read`, `seek`, `read_at`,
//! `set_parent_file`, and `close` take the write lock; the getters take
//! the read lock.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::bat::BlockAllocationTable;
use crate::block_descriptor::BlockDescriptor;
use crate::byte_source::ByteSource;
use crate::cache::{BlockDescriptorCache, DEFAULT_CACHE_CAPACITY};
use crate::error::{Result, VhdiError};
use crate::format::Format;
use crate::types::{DiskType, FileType};

/// Access mode passed to [`Image::open`]. The library is read-only by
/// design; [`OpenFlags::Write`] exists only so that request is
/// rejected with [`VhdiError::WriteNotSupported`] rather than silently
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenFlags {
    #[default]
    Read,
    Write,
}

#[derive(Debug)]
struct ImageState {
    source: Box<dyn ByteSource>,
    current_offset: u64,
    cache: BlockDescriptorCache,
    parent: Option<Arc<Image>>,
    open: bool,
}

/// A handle onto one open VHD or VHDX file.
#[derive(Debug)]
pub struct Image {
    file_type: FileType,
    disk_type: DiskType,
    format_version: (u16, u16),
    media_size: u64,
    bytes_per_sector: u32,
    block_size: Option<u64>,
    identifier: [u8; 16],
    parent_identifier: Option<[u8; 16]>,
    parent_filename: Option<String>,
    bat: Option<BlockAllocationTable>,
    state: RwLock<ImageState>,
    abort: AtomicBool,
}

impl Image {
    /// Runs the C2 open sequence (§4.1) and constructs the BAT/cache
    /// for this image, using the default cache capacity.
    pub fn open(source: Box<dyn ByteSource>, flags: OpenFlags) -> Result<Image> {
        Self::open_with_cache_capacity(source, flags, DEFAULT_CACHE_CAPACITY)
    }

    pub fn open_with_cache_capacity(
        mut source: Box<dyn ByteSource>,
        flags: OpenFlags,
        cache_capacity: usize,
    ) -> Result<Image> {
        if flags == OpenFlags::Write {
            return Err(VhdiError::WriteNotSupported);
        }
        let format = Format::open(source.as_mut())?;
        let bat = format.build_bat()?;
        tracing::debug!(
            file_type = ?format.file_type(),
            disk_type = ?format.disk_type(),
            media_size = format.media_size(),
            "opened image"
        );
        Ok(Image {
            file_type: format.file_type(),
            disk_type: format.disk_type(),
            format_version: format.format_version(),
            media_size: format.media_size(),
            bytes_per_sector: format.bytes_per_sector(),
            block_size: format.block_size(),
            identifier: format.identifier(),
            parent_identifier: format.parent_identifier(),
            parent_filename: format.parent_filename().map(str::to_string),
            bat,
            state: RwLock::new(ImageState {
                source,
                current_offset: 0,
                cache: BlockDescriptorCache::new(cache_capacity),
                parent: None,
                open: true,
            }),
            abort: AtomicBool::new(false),
        })
    }

    /// Binds `parent` as this image's parent (§4.6). Requires this
    /// image to be differential and the two images' identifiers to
    /// match; fails with [`VhdiError::ParentIdentifierMismatch`]
    /// otherwise, leaving the image unmodified.
    pub fn set_parent_file(&self, parent: Arc<Image>) -> Result<()> {
        if self.disk_type != DiskType::Differential {
            return Err(VhdiError::InvalidArgument(
                "set_parent_file requires a differential image",
            ));
        }
        let expected = self
            .parent_identifier
            .ok_or(VhdiError::ValueMissing("parent_identifier"))?;
        if expected != parent.identifier {
            return Err(VhdiError::ParentIdentifierMismatch);
        }
        let mut state = self.state.write().unwrap();
        if !state.open {
            return Err(VhdiError::NotOpen);
        }
        tracing::debug!("bound parent image");
        state.parent = Some(parent);
        Ok(())
    }

    /// Advisory cancellation flag (§5): the read loop checks it between
    /// sector-range reads and returns [`VhdiError::Aborted`] promptly.
    pub fn signal_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if !state.open {
            return Err(VhdiError::NotOpen);
        }
        state.source.close()?;
        state.cache.clear();
        state.parent = None;
        state.open = false;
        Ok(())
    }

    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        self.seek_locked(&mut state, pos)
    }

    fn seek_locked(&self, state: &mut ImageState, pos: SeekFrom) -> Result<u64> {
        if !state.open {
            return Err(VhdiError::NotOpen);
        }
        let target: i128 = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => state.current_offset as i128 + delta as i128,
            SeekFrom::End(delta) => self.media_size as i128 + delta as i128,
        };
        if target < 0 {
            return Err(VhdiError::InvalidArgument(
                "seek would result in a negative offset",
            ));
        }
        state.current_offset = target as u64;
        Ok(state.current_offset)
    }

    pub fn offset(&self) -> Result<u64> {
        let state = self.state.read().unwrap();
        if !state.open {
            return Err(VhdiError::NotOpen);
        }
        Ok(state.current_offset)
    }

    /// Reads into `buf` from the current offset, advancing it by the
    /// number of bytes actually read (always `buf.len()` unless the
    /// end of the media is reached first).
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.write().unwrap();
        self.read_locked(&mut state, buf)
    }

    /// `seek(offset, SET)` followed by `read(buf)`, under a single
    /// write-lock acquisition so a concurrent `read` never observes an
    /// intermediate offset (§5's ordering guarantee).
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.write().unwrap();
        self.seek_locked(&mut state, SeekFrom::Start(offset))?;
        self.read_locked(&mut state, buf)
    }

    fn read_locked(&self, state: &mut ImageState, buf: &mut [u8]) -> Result<usize> {
        if !state.open {
            return Err(VhdiError::NotOpen);
        }
        let requested = buf.len();
        let mut buf_off = 0usize;

        while buf_off < requested && state.current_offset < self.media_size {
            if self.abort.load(Ordering::Relaxed) {
                return Err(VhdiError::Aborted);
            }

            let remaining_in_buf = requested - buf_off;
            let remaining_in_media = (self.media_size - state.current_offset) as usize;

            let (sector_file_offset, is_unallocated, read_size) = match &self.bat {
                None => {
                    // VHD fixed: a 1:1 mapping of virtual to file offset.
                    let read_size = remaining_in_buf.min(remaining_in_media);
                    (state.current_offset as i64, false, read_size)
                }
                Some(bat) => {
                    let block_size = self
                        .block_size
                        .ok_or(VhdiError::ValueMissing("block_size"))?;
                    let block_number = state.current_offset / block_size;
                    let intra_block = state.current_offset % block_size;

                    let descriptor =
                        Self::resolve_block(bat, &mut state.cache, state.source.as_mut(), block_number)?;
                    let range = descriptor
                        .range_at(intra_block)
                        .ok_or(VhdiError::ValueMissing("sector range"))?;

                    let sector_file_offset = if descriptor.file_offset == -1 {
                        -1
                    } else {
                        descriptor.file_offset + intra_block as i64
                    };
                    let read_size = remaining_in_buf
                        .min((range.end - intra_block) as usize)
                        .min(remaining_in_media);
                    (sector_file_offset, range.is_unallocated(), read_size)
                }
            };

            if read_size == 0 {
                break;
            }
            let dest = &mut buf[buf_off..buf_off + read_size];

            if !is_unallocated {
                state.source.read_at(sector_file_offset as u64, dest)?;
            } else if let Some(parent) = state.parent.clone() {
                parent.read_at(state.current_offset, dest)?;
            } else {
                dest.fill(0);
            }

            state.current_offset += read_size as u64;
            buf_off += read_size;
        }
        Ok(buf_off)
    }

    /// Looks up `block_number` in the cache, materializing it through
    /// the BAT (C4) on a miss.
    fn resolve_block<'a>(
        bat: &BlockAllocationTable,
        cache: &'a mut BlockDescriptorCache,
        source: &mut dyn ByteSource,
        block_number: u64,
    ) -> Result<&'a BlockDescriptor> {
        if cache.get(block_number).is_none() {
            tracing::trace!(block_number, "block descriptor cache miss");
            let descriptor = bat.resolve(source, block_number)?;
            cache.insert(block_number, descriptor);
        }
        Ok(cache.get(block_number).unwrap())
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn disk_type(&self) -> u32 {
        self.disk_type.as_u32()
    }

    /// `(major, minor)`; `minor` is always `0` for VHDX.
    pub fn format_version(&self) -> (u16, u16) {
        self.format_version
    }

    pub fn media_size(&self) -> u64 {
        self.media_size
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    pub fn block_size(&self) -> Option<u64> {
        self.block_size
    }

    /// Big-endian GUID identifying this image.
    pub fn identifier(&self) -> [u8; 16] {
        self.identifier
    }

    /// The identifier this image's dynamic/differential header claims
    /// its parent has. All-zero for a non-differential image.
    pub fn parent_identifier(&self) -> [u8; 16] {
        self.parent_identifier.unwrap_or([0u8; 16])
    }

    pub fn utf8_parent_filename(&self) -> Option<String> {
        self.parent_filename.clone()
    }

    pub fn utf16_parent_filename(&self) -> Option<Vec<u16>> {
        self.parent_filename
            .as_ref()
            .map(|name| name.encode_utf16().collect())
    }
}
