/*
 * SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! On-disk format codecs for the supported boot image variants. All of them
//! translate between a byte buffer and the shared [`BootImageData`] model,
//! which is what the [`crate::bootimage::BootImage`] facade manipulates.

use std::{fmt, io, str::Utf8Error};

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod android;
pub mod bump;
pub mod loki;
pub mod padding;
pub mod sonyelf;

/// Default page size for the Android header.
pub const DEFAULT_PAGE_SIZE: u32 = 2048;
/// Default base for the four Android load addresses.
pub const DEFAULT_BASE: u32 = 0x1000_0000;
pub const DEFAULT_KERNEL_OFFSET: u32 = 0x0000_8000;
pub const DEFAULT_RAMDISK_OFFSET: u32 = 0x0100_0000;
pub const DEFAULT_SECOND_OFFSET: u32 = 0x00f0_0000;
pub const DEFAULT_TAGS_OFFSET: u32 = 0x0000_0100;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown boot image format")]
    UnknownFormat,
    #[error("Failed to read {0:?} field")]
    ReadFieldError(&'static str, #[source] io::Error),
    #[error("Failed to write {0:?} field")]
    WriteFieldError(&'static str, #[source] io::Error),
    #[error("{0:?} field: invalid value: {1}")]
    InvalidFieldValue(&'static str, u32),
    #[error("{0:?} field is out of bounds")]
    FieldOutOfBounds(&'static str),
    #[error("{0:?} field is not UTF-8 encoded: {data:?}", data = .1.as_bstr())]
    StringNotUtf8(&'static str, Vec<u8>, #[source] Utf8Error),
    #[error("Invalid data: {0}")]
    InvalidData(&'static str),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Capability set shared by the four codecs. [`is_valid`] is a cheap magic
/// check used by the load dispatcher to pick a codec before committing to a
/// full parse.
///
/// [`is_valid`]: Self::is_valid
pub trait ImageFormat {
    /// Whether the buffer looks like an image in this format.
    fn is_valid(data: &[u8]) -> bool;

    /// Parse the buffer into a fresh model.
    fn load(data: &[u8]) -> Result<BootImageData>;

    /// Serialize the model. The codecs that emit the Android-style header
    /// store the recomputed SHA-1 image ID back into `data` so that the
    /// model always matches what was written.
    fn create(data: &mut BootImageData) -> Result<Vec<u8>>;
}

/// In-memory representation of a boot image, decoupled from any of the
/// on-disk variants.
///
/// Payload sizes are not stored separately. The header size fields can never
/// legally disagree with the payload lengths, so the codecs derive them from
/// the payloads when serializing.
#[derive(Clone, Deserialize, Serialize)]
pub struct BootImageData {
    pub kernel_addr: u32,
    pub ramdisk_addr: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
    /// Value of the nominally unused header slot, repurposed as an
    /// entrypoint by the Sony variant. Serialized as zero unless set.
    pub entrypoint: u32,
    /// SHA-1 digest words; the last three are always zero.
    pub id: [u32; 8],
    pub board_name: String,
    pub cmdline: String,
    // Images.
    #[serde(skip)]
    pub kernel: Vec<u8>,
    #[serde(skip)]
    pub ramdisk: Vec<u8>,
    #[serde(skip)]
    pub second: Vec<u8>,
    #[serde(skip)]
    pub dt: Vec<u8>,
    #[serde(skip)]
    pub aboot: Vec<u8>,
    // Sony-specific fields.
    pub ipl_addr: u32,
    pub rpm_addr: u32,
    pub appsbl_addr: u32,
    #[serde(skip)]
    pub ipl: Vec<u8>,
    #[serde(skip)]
    pub rpm: Vec<u8>,
    #[serde(skip)]
    pub appsbl: Vec<u8>,
    #[serde(skip)]
    pub sin_image: Vec<u8>,
    #[serde(skip)]
    pub sin_header: Vec<u8>,
}

impl Default for BootImageData {
    fn default() -> Self {
        Self {
            kernel_addr: DEFAULT_BASE + DEFAULT_KERNEL_OFFSET,
            ramdisk_addr: DEFAULT_BASE + DEFAULT_RAMDISK_OFFSET,
            second_addr: DEFAULT_BASE + DEFAULT_SECOND_OFFSET,
            tags_addr: DEFAULT_BASE + DEFAULT_TAGS_OFFSET,
            page_size: DEFAULT_PAGE_SIZE,
            entrypoint: 0,
            id: [0; 8],
            board_name: String::new(),
            cmdline: String::new(),
            kernel: vec![],
            ramdisk: vec![],
            second: vec![],
            dt: vec![],
            aboot: vec![],
            ipl_addr: 0,
            rpm_addr: 0,
            appsbl_addr: 0,
            ipl: vec![],
            rpm: vec![],
            appsbl: vec![],
            sin_image: vec![],
            sin_header: vec![],
        }
    }
}

/// Formats a payload as its length instead of dumping the bytes.
#[derive(Clone, Copy)]
struct ByteCount(usize);

impl fmt::Debug for ByteCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

impl fmt::Debug for BootImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootImageData")
            .field("kernel_addr", &self.kernel_addr)
            .field("ramdisk_addr", &self.ramdisk_addr)
            .field("second_addr", &self.second_addr)
            .field("tags_addr", &self.tags_addr)
            .field("page_size", &self.page_size)
            .field("entrypoint", &self.entrypoint)
            .field("id", &self.id)
            .field("board_name", &self.board_name)
            .field("cmdline", &self.cmdline)
            .field("kernel", &ByteCount(self.kernel.len()))
            .field("ramdisk", &ByteCount(self.ramdisk.len()))
            .field("second", &ByteCount(self.second.len()))
            .field("dt", &ByteCount(self.dt.len()))
            .field("aboot", &ByteCount(self.aboot.len()))
            .field("ipl_addr", &self.ipl_addr)
            .field("rpm_addr", &self.rpm_addr)
            .field("appsbl_addr", &self.appsbl_addr)
            .field("ipl", &ByteCount(self.ipl.len()))
            .field("rpm", &ByteCount(self.rpm.len()))
            .field("appsbl", &ByteCount(self.appsbl.len()))
            .field("sin_image", &ByteCount(self.sin_image.len()))
            .field("sin_header", &ByteCount(self.sin_header.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::BootImageData;

    #[test]
    fn default_addresses() {
        let data = BootImageData::default();

        assert_eq!(data.kernel_addr, 0x10008000);
        assert_eq!(data.ramdisk_addr, 0x11000000);
        assert_eq!(data.second_addr, 0x10f00000);
        assert_eq!(data.tags_addr, 0x10000100);
        assert_eq!(data.page_size, 2048);
        assert_eq!(data.entrypoint, 0);
        assert_eq!(data.ipl_addr, 0);
        assert_eq!(data.rpm_addr, 0);
        assert_eq!(data.appsbl_addr, 0);
        assert!(data.board_name.is_empty());
        assert!(data.cmdline.is_empty());
    }
}
