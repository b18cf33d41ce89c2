//! Read-only access to Microsoft's Virtual Hard Disk image formats:
//! legacy VHD (version 1) and modern VHDX (version 2).
//!
//! The core translates a storage-media offset into the right physical
//! location in the image file — or, for a differencing disk, into the
//! parent image's address space — and returns sector data. It does not
//! write, repair, or convert between formats; see each module's docs
//! for the on-disk layout it decodes.
//!
//! ```no_run
//! use std::fs::File;
//! use vhdi::{Image, OpenFlags};
//!
//! # fn main() -> vhdi::Result<()> {
//! let file = File::open("disk.vhdx")?;
//! let image = Image::open(Box::new(file), OpenFlags::Read)?;
//! let mut buf = [0u8; 512];
//! image.read_at(0, &mut buf)?;
//! # Ok(())
//! # }
//! ```

pub mod bat;
pub mod bitmap;
pub mod block_descriptor;
pub mod byte_source;
pub mod cache;
pub mod error;
pub mod format;
pub mod guid;
mod parse_utils;
pub mod sector_range;
pub mod signatures;
pub mod types;
pub mod vhd;
pub mod vhdx;

mod image;

pub use byte_source::ByteSource;
pub use error::{Result, VhdiError};
pub use image::{Image, OpenFlags};
pub use types::{DiskType, FileType};
