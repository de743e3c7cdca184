/*
 * SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! High-level interface for boot images. [`BootImage`] owns the parsed
//! contents, detects the on-disk variant when loading, and serializes to the
//! selected target variant.

use std::{
    fmt, fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::format::{
    self,
    android::AndroidFormat,
    bump::BumpFormat,
    loki::LokiFormat,
    sonyelf::SonyElfFormat,
    BootImageData, ImageFormat, DEFAULT_BASE, DEFAULT_KERNEL_OFFSET, DEFAULT_PAGE_SIZE,
    DEFAULT_RAMDISK_OFFSET, DEFAULT_SECOND_OFFSET, DEFAULT_TAGS_OFFSET,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to parse boot image")]
    Parse(#[from] format::Error),
    #[error("Failed to open file: {0:?}")]
    FileOpen(PathBuf, #[source] io::Error),
    #[error("Failed to read file: {0:?}")]
    FileRead(PathBuf, #[source] io::Error),
    #[error("Failed to write file: {0:?}")]
    FileWrite(PathBuf, #[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The on-disk variants a boot image can be read from and written to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Type {
    Android,
    Loki,
    Bump,
    SonyElf,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Android => "Android",
            Self::Loki => "Loki",
            Self::Bump => "Bump",
            Self::SonyElf => "Sony ELF32",
        };

        write!(f, "{name}")
    }
}

/// A boot image, held in a representation independent of the on-disk
/// variants.
///
/// A fresh instance starts out with the documented defaults and can be
/// populated either through the setters or by loading an existing image.
/// [`create`] serializes to the selected [`target_type`], which defaults to
/// [`Type::Android`] and is independent of the variant an image was loaded
/// from.
///
/// [`create`]: Self::create
/// [`target_type`]: Self::target_type
#[derive(Clone)]
pub struct BootImage {
    data: BootImageData,
    target_type: Type,
    source_type: Option<Type>,
}

impl BootImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a boot image, trying the variants in detection order: Loki,
    /// Bump, Android, Sony ELF32. The first variant whose magic check
    /// passes is committed to; its parse errors are not retried with
    /// another variant.
    ///
    /// The buffer is parsed into a fresh representation that replaces the
    /// current contents only on success, so a failed load leaves `self`
    /// unchanged.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        let (source_type, image) = if LokiFormat::is_valid(data) {
            debug!("Boot image is a loki'd Android boot image");
            (Type::Loki, LokiFormat::load(data)?)
        } else if BumpFormat::is_valid(data) {
            debug!("Boot image is a bump'd Android boot image");
            (Type::Bump, BumpFormat::load(data)?)
        } else if AndroidFormat::is_valid(data) {
            debug!("Boot image is a plain Android boot image");
            (Type::Android, AndroidFormat::load(data)?)
        } else if SonyElfFormat::is_valid(data) {
            debug!("Boot image is a Sony ELF32 boot image");
            (Type::SonyElf, SonyElfFormat::load(data)?)
        } else {
            debug!("Unknown boot image type");
            return Err(format::Error::UnknownFormat.into());
        };

        self.data = image;
        self.source_type = Some(source_type);

        Ok(())
    }

    /// Read a boot image file and [`load`](Self::load) it.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let mut file =
            fs::File::open(path).map_err(|e| Error::FileOpen(path.to_owned(), e))?;
        let mut data = vec![];
        file.read_to_end(&mut data)
            .map_err(|e| Error::FileRead(path.to_owned(), e))?;

        self.load(&data)
    }

    /// Serialize the boot image according to the target type. The variants
    /// carrying the Android-style header recompute the SHA-1 image ID and
    /// store it back into `self` as part of this.
    pub fn create(&mut self) -> Result<Vec<u8>> {
        debug!("Creating {} boot image", self.target_type);

        let data = match self.target_type {
            Type::Android => AndroidFormat::create(&mut self.data)?,
            Type::Loki => LokiFormat::create(&mut self.data)?,
            Type::Bump => BumpFormat::create(&mut self.data)?,
            Type::SonyElf => SonyElfFormat::create(&mut self.data)?,
        };

        Ok(data)
    }

    /// [`create`](Self::create) the boot image and write it to a file.
    pub fn create_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = self.create()?;

        let mut file =
            fs::File::create(path).map_err(|e| Error::FileOpen(path.to_owned(), e))?;
        file.write_all(&data)
            .map_err(|e| Error::FileWrite(path.to_owned(), e))?;

        Ok(())
    }

    /// Variant of the most recently loaded image. `None` until a load
    /// succeeds. Unaffected by [`set_target_type`](Self::set_target_type).
    pub fn was_type(&self) -> Option<Type> {
        self.source_type
    }

    pub fn target_type(&self) -> Type {
        self.target_type
    }

    pub fn set_target_type(&mut self, target_type: Type) {
        self.target_type = target_type;
    }

    /// Board name field in the boot image header. Truncated to 16 bytes
    /// when serialized.
    pub fn board_name(&self) -> &str {
        &self.data.board_name
    }

    pub fn set_board_name(&mut self, name: impl Into<String>) {
        self.data.board_name = name.into();
    }

    pub fn reset_board_name(&mut self) {
        self.data.board_name.clear();
    }

    /// Kernel cmdline in the boot image header. Truncated to 512 bytes when
    /// serialized.
    pub fn kernel_cmdline(&self) -> &str {
        &self.data.cmdline
    }

    pub fn set_kernel_cmdline(&mut self, cmdline: impl Into<String>) {
        self.data.cmdline = cmdline.into();
    }

    pub fn reset_kernel_cmdline(&mut self) {
        self.data.cmdline.clear();
    }

    /// Page size field in the boot image header. Should be one of 2048,
    /// 4096, 8192, 16384, 32768, 65536, or 131072; anything else is
    /// rejected when serializing.
    pub fn page_size(&self) -> u32 {
        self.data.page_size
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        self.data.page_size = page_size;
    }

    pub fn reset_page_size(&mut self) {
        self.data.page_size = DEFAULT_PAGE_SIZE;
    }

    pub fn kernel_address(&self) -> u32 {
        self.data.kernel_addr
    }

    pub fn set_kernel_address(&mut self, address: u32) {
        self.data.kernel_addr = address;
    }

    pub fn reset_kernel_address(&mut self) {
        self.data.kernel_addr = DEFAULT_BASE + DEFAULT_KERNEL_OFFSET;
    }

    pub fn ramdisk_address(&self) -> u32 {
        self.data.ramdisk_addr
    }

    pub fn set_ramdisk_address(&mut self, address: u32) {
        self.data.ramdisk_addr = address;
    }

    pub fn reset_ramdisk_address(&mut self) {
        self.data.ramdisk_addr = DEFAULT_BASE + DEFAULT_RAMDISK_OFFSET;
    }

    pub fn second_bootloader_address(&self) -> u32 {
        self.data.second_addr
    }

    pub fn set_second_bootloader_address(&mut self, address: u32) {
        self.data.second_addr = address;
    }

    pub fn reset_second_bootloader_address(&mut self) {
        self.data.second_addr = DEFAULT_BASE + DEFAULT_SECOND_OFFSET;
    }

    pub fn kernel_tags_address(&self) -> u32 {
        self.data.tags_addr
    }

    pub fn set_kernel_tags_address(&mut self, address: u32) {
        self.data.tags_addr = address;
    }

    pub fn reset_kernel_tags_address(&mut self) {
        self.data.tags_addr = DEFAULT_BASE + DEFAULT_TAGS_OFFSET;
    }

    pub fn ipl_address(&self) -> u32 {
        self.data.ipl_addr
    }

    pub fn set_ipl_address(&mut self, address: u32) {
        self.data.ipl_addr = address;
    }

    pub fn reset_ipl_address(&mut self) {
        self.data.ipl_addr = 0;
    }

    pub fn rpm_address(&self) -> u32 {
        self.data.rpm_addr
    }

    pub fn set_rpm_address(&mut self, address: u32) {
        self.data.rpm_addr = address;
    }

    pub fn reset_rpm_address(&mut self) {
        self.data.rpm_addr = 0;
    }

    pub fn appsbl_address(&self) -> u32 {
        self.data.appsbl_addr
    }

    pub fn set_appsbl_address(&mut self, address: u32) {
        self.data.appsbl_addr = address;
    }

    pub fn reset_appsbl_address(&mut self) {
        self.data.appsbl_addr = 0;
    }

    /// Entrypoint address, stored in the otherwise unused header slot. The
    /// Sony variant serializes it as the ELF entrypoint.
    pub fn entrypoint_address(&self) -> u32 {
        self.data.entrypoint
    }

    pub fn set_entrypoint_address(&mut self, address: u32) {
        self.data.entrypoint = address;
    }

    pub fn reset_entrypoint_address(&mut self) {
        self.data.entrypoint = 0;
    }

    /// Set the four Android load addresses from a base and per-payload
    /// offsets.
    pub fn set_addresses(
        &mut self,
        base: u32,
        kernel_offset: u32,
        ramdisk_offset: u32,
        second_offset: u32,
        tags_offset: u32,
    ) {
        self.set_kernel_address(base + kernel_offset);
        self.set_ramdisk_address(base + ramdisk_offset);
        self.set_second_bootloader_address(base + second_offset);
        self.set_kernel_tags_address(base + tags_offset);
    }

    /// SHA-1 image ID words. Updated by [`create`](Self::create) for the
    /// variants that carry the Android-style header; read-only because the
    /// value is derived from the payloads.
    pub fn id(&self) -> &[u32; 8] {
        &self.data.id
    }

    pub fn kernel_image(&self) -> &[u8] {
        &self.data.kernel
    }

    pub fn set_kernel_image(&mut self, data: Vec<u8>) {
        self.data.kernel = data;
    }

    pub fn kernel_size(&self) -> u32 {
        self.data.kernel.len() as u32
    }

    pub fn ramdisk_image(&self) -> &[u8] {
        &self.data.ramdisk
    }

    pub fn set_ramdisk_image(&mut self, data: Vec<u8>) {
        self.data.ramdisk = data;
    }

    pub fn ramdisk_size(&self) -> u32 {
        self.data.ramdisk.len() as u32
    }

    pub fn second_bootloader_image(&self) -> &[u8] {
        &self.data.second
    }

    pub fn set_second_bootloader_image(&mut self, data: Vec<u8>) {
        self.data.second = data;
    }

    pub fn second_bootloader_size(&self) -> u32 {
        self.data.second.len() as u32
    }

    pub fn device_tree_image(&self) -> &[u8] {
        &self.data.dt
    }

    pub fn set_device_tree_image(&mut self, data: Vec<u8>) {
        self.data.dt = data;
    }

    pub fn device_tree_size(&self) -> u32 {
        self.data.dt.len() as u32
    }

    pub fn aboot_image(&self) -> &[u8] {
        &self.data.aboot
    }

    pub fn set_aboot_image(&mut self, data: Vec<u8>) {
        self.data.aboot = data;
    }

    pub fn ipl_image(&self) -> &[u8] {
        &self.data.ipl
    }

    pub fn set_ipl_image(&mut self, data: Vec<u8>) {
        self.data.ipl = data;
    }

    pub fn rpm_image(&self) -> &[u8] {
        &self.data.rpm
    }

    pub fn set_rpm_image(&mut self, data: Vec<u8>) {
        self.data.rpm = data;
    }

    pub fn appsbl_image(&self) -> &[u8] {
        &self.data.appsbl
    }

    pub fn set_appsbl_image(&mut self, data: Vec<u8>) {
        self.data.appsbl = data;
    }

    pub fn sin_image(&self) -> &[u8] {
        &self.data.sin_image
    }

    pub fn set_sin_image(&mut self, data: Vec<u8>) {
        self.data.sin_image = data;
    }

    pub fn sin_header(&self) -> &[u8] {
        &self.data.sin_header
    }

    pub fn set_sin_header(&mut self, data: Vec<u8>) {
        self.data.sin_header = data;
    }
}

impl Default for BootImage {
    fn default() -> Self {
        Self {
            data: BootImageData::default(),
            target_type: Type::Android,
            source_type: None,
        }
    }
}

impl PartialEq for BootImage {
    /// Compare the payloads, addresses, and metadata. This doesn't care if
    /// eg. one boot image is loki'd and the other is not as long as the
    /// contents are the same. The entrypoint slot is also excluded since
    /// only some variants carry it.
    fn eq(&self, other: &Self) -> bool {
        let a = &self.data;
        let b = &other.data;

        // Images.
        a.kernel == b.kernel
            && a.ramdisk == b.ramdisk
            && a.second == b.second
            && a.dt == b.dt
            && a.aboot == b.aboot
            // Sony images.
            && a.ipl == b.ipl
            && a.rpm == b.rpm
            && a.appsbl == b.appsbl
            && a.sin_image == b.sin_image
            && a.sin_header == b.sin_header
            // Header's integral values.
            && a.kernel_addr == b.kernel_addr
            && a.ramdisk_addr == b.ramdisk_addr
            && a.second_addr == b.second_addr
            && a.tags_addr == b.tags_addr
            && a.page_size == b.page_size
            // ID.
            && a.id == b.id
            // Header's string values.
            && a.board_name == b.board_name
            && a.cmdline == b.cmdline
    }
}

impl Eq for BootImage {}

impl fmt::Debug for BootImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootImage")
            .field("data", &self.data)
            .field("target_type", &self.target_type)
            .field("source_type", &self.source_type)
            .finish()
    }
}

impl fmt::Display for BootImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Boot image header:")?;
        writeln!(f, "- Kernel size:          {}", self.kernel_size())?;
        writeln!(f, "- Kernel address:       {:#x}", self.kernel_address())?;
        writeln!(f, "- Ramdisk size:         {}", self.ramdisk_size())?;
        writeln!(f, "- Ramdisk address:      {:#x}", self.ramdisk_address())?;
        writeln!(
            f,
            "- Second stage size:    {}",
            self.second_bootloader_size()
        )?;
        writeln!(
            f,
            "- Second stage address: {:#x}",
            self.second_bootloader_address()
        )?;
        writeln!(
            f,
            "- Kernel tags address:  {:#x}",
            self.kernel_tags_address()
        )?;
        writeln!(f, "- Device tree size:     {}", self.device_tree_size())?;
        writeln!(f, "- Page size:            {}", self.page_size())?;
        writeln!(f, "- Board name:           {:?}", self.board_name())?;
        writeln!(f, "- Kernel cmdline:       {:?}", self.kernel_cmdline())?;
        write!(f, "- ID:                   {:08x?}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::{BootImage, Type};

    #[test]
    fn defaults() {
        let image = BootImage::new();

        assert_eq!(image.kernel_address(), 0x10008000);
        assert_eq!(image.ramdisk_address(), 0x11000000);
        assert_eq!(image.second_bootloader_address(), 0x10f00000);
        assert_eq!(image.kernel_tags_address(), 0x10000100);
        assert_eq!(image.page_size(), 2048);
        assert_eq!(image.board_name(), "");
        assert_eq!(image.kernel_cmdline(), "");
        assert_eq!(image.ipl_address(), 0);
        assert_eq!(image.rpm_address(), 0);
        assert_eq!(image.appsbl_address(), 0);
        assert_eq!(image.entrypoint_address(), 0);
        assert_eq!(image.target_type(), Type::Android);
        assert_eq!(image.was_type(), None);
    }

    #[test]
    fn resets_restore_defaults() {
        let mut image = BootImage::new();
        image.set_board_name("jflte");
        image.set_kernel_cmdline("androidboot.hardware=qcom");
        image.set_page_size(4096);
        image.set_addresses(0x80000000, 0x8000, 0x1000000, 0xf00000, 0x100);
        image.set_entrypoint_address(0x80208000);

        assert_eq!(image.kernel_address(), 0x80008000);
        assert_eq!(image.ramdisk_address(), 0x81000000);
        assert_eq!(image.second_bootloader_address(), 0x80f00000);
        assert_eq!(image.kernel_tags_address(), 0x80000100);

        image.reset_board_name();
        image.reset_kernel_cmdline();
        image.reset_page_size();
        image.reset_kernel_address();
        image.reset_ramdisk_address();
        image.reset_second_bootloader_address();
        image.reset_kernel_tags_address();
        image.reset_entrypoint_address();

        assert_eq!(image, BootImage::new());
        assert_eq!(image.entrypoint_address(), 0);
    }

    #[test]
    fn size_tracks_payload() {
        let mut image = BootImage::new();
        assert_eq!(image.kernel_size(), 0);

        image.set_kernel_image(vec![0xaa; 123]);
        assert_eq!(image.kernel_size(), 123);

        image.set_kernel_image(vec![]);
        assert_eq!(image.kernel_size(), 0);

        image.set_ramdisk_image(vec![0xbb; 45]);
        assert_eq!(image.ramdisk_size(), 45);

        image.set_second_bootloader_image(vec![0xcc; 6]);
        assert_eq!(image.second_bootloader_size(), 6);

        image.set_device_tree_image(vec![0xdd; 7]);
        assert_eq!(image.device_tree_size(), 7);
    }

    #[test]
    fn equality_ignores_wrapping_and_entrypoint() {
        let mut a = BootImage::new();
        a.set_kernel_image(b"kernel".to_vec());

        let mut b = a.clone();
        b.set_target_type(Type::Loki);
        b.set_entrypoint_address(0x1234);
        b.set_ipl_address(0x5678);
        assert_eq!(a, b);

        b.set_kernel_image(b"other".to_vec());
        assert_ne!(a, b);
    }
}
