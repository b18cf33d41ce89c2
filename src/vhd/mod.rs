//! VHD (version 1) format parsing: C2's footer and dynamic disk header.

pub mod dynamic_header;
pub mod footer;
