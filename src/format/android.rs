/*
 * SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! The baseline AOSP `mkbootimg` layout. The Loki and Bump variants are
//! supersets of this format and delegate most of their work to this codec.

use std::io::{Cursor, Read, Seek, Write};

use memchr::memmem;
use ring::digest::{self, Context};
use tracing::warn;
use zerocopy::{little_endian, FromBytes, IntoBytes};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::{padding, padding::ZeroPadded, BootImageData, Error, ImageFormat, Result},
    stream::{CountingReader, CountingWriter, ReadDiscardExt, ReadFixedSizeExt},
};

pub const BOOT_MAGIC: [u8; 8] = *b"ANDROID!";
pub const BOOT_NAME_SIZE: usize = 16;
pub const BOOT_ARGS_SIZE: usize = 512;

/// The header magic must lie entirely within this many leading bytes. Some
/// factory dumps carry a small vendor preamble before the actual image.
pub const HEADER_SEARCH_LIMIT: usize = 512;

/// Page sizes the header may declare. Everything else is rejected on both
/// load and create.
pub const PAGE_SIZES: [u32; 7] = [2048, 4096, 8192, 16384, 32768, 65536, 131072];

/// Maximum size of any individual boot image component, like the kernel.
/// This limit is currently 64 MiB, which should be sufficient since there is
/// no known device where the entire boot image exceeds this size.
const COMPONENT_MAX_SIZE: u32 = 64 * 1024 * 1024;

/// Raw on-disk layout for the image header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
pub(crate) struct RawHeader {
    /// Magic value. This should be equal to [`BOOT_MAGIC`].
    pub(crate) magic: [u8; 8],
    pub(crate) kernel_size: little_endian::U32,
    pub(crate) kernel_addr: little_endian::U32,
    pub(crate) ramdisk_size: little_endian::U32,
    pub(crate) ramdisk_addr: little_endian::U32,
    pub(crate) second_size: little_endian::U32,
    pub(crate) second_addr: little_endian::U32,
    pub(crate) tags_addr: little_endian::U32,
    pub(crate) page_size: little_endian::U32,
    pub(crate) dt_size: little_endian::U32,
    pub(crate) unused: little_endian::U32,
    pub(crate) name: [u8; BOOT_NAME_SIZE],
    pub(crate) cmdline: [u8; BOOT_ARGS_SIZE],
    pub(crate) id: [little_endian::U32; 8],
}

/// Compute the SHA-1 image ID over the payloads and their sizes. The second
/// bootloader participates even when empty; the device tree only when
/// present.
pub(crate) fn compute_id(data: &BootImageData) -> [u8; 20] {
    let mut context = Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);

    context.update(&data.kernel);
    context.update(&(data.kernel.len() as u32).to_le_bytes());
    context.update(&data.ramdisk);
    context.update(&(data.ramdisk.len() as u32).to_le_bytes());
    context.update(&data.second);
    context.update(&(data.second.len() as u32).to_le_bytes());

    if !data.dt.is_empty() {
        context.update(&data.dt);
        context.update(&(data.dt.len() as u32).to_le_bytes());
    }

    let mut id = [0u8; 20];
    id.copy_from_slice(context.finish().as_ref());
    id
}

/// Spread the 20 digest bytes over the 8 little-endian id words. The last
/// 12 bytes of the id field stay zero.
pub(crate) fn id_words(digest: &[u8; 20]) -> [u32; 8] {
    let mut words = [0u32; 8];

    for (word, chunk) in words.iter_mut().zip(digest.chunks_exact(4)) {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(chunk);
        *word = u32::from_le_bytes(bytes);
    }

    words
}

/// Find the header magic within the bounded search window.
pub(crate) fn find_header(data: &[u8]) -> Option<usize> {
    let limit = HEADER_SEARCH_LIMIT.min(data.len());
    memmem::find(&data[..limit], &BOOT_MAGIC)
}

pub(crate) fn check_component_size(size: u32, field: &'static str) -> Result<()> {
    if size > COMPONENT_MAX_SIZE {
        return Err(Error::FieldOutOfBounds(field));
    }

    Ok(())
}

/// Decode the header's scalar and string fields into a fresh model. The
/// payloads are left empty for the caller to fill in.
pub(crate) fn header_to_data(raw: &RawHeader) -> Result<BootImageData> {
    let page_size = raw.page_size.get();
    if !PAGE_SIZES.contains(&page_size) {
        return Err(Error::InvalidFieldValue("page_size", page_size));
    }

    let name = raw.name.without_trailing_zeros();
    let name =
        std::str::from_utf8(name).map_err(|e| Error::StringNotUtf8("name", name.to_vec(), e))?;

    let cmdline = raw.cmdline.without_trailing_zeros();
    let cmdline = std::str::from_utf8(cmdline)
        .map_err(|e| Error::StringNotUtf8("cmdline", cmdline.to_vec(), e))?;

    let image = BootImageData {
        kernel_addr: raw.kernel_addr.get(),
        ramdisk_addr: raw.ramdisk_addr.get(),
        second_addr: raw.second_addr.get(),
        tags_addr: raw.tags_addr.get(),
        page_size,
        entrypoint: raw.unused.get(),
        id: raw.id.map(|w| w.get()),
        board_name: name.to_owned(),
        cmdline: cmdline.to_owned(),
        ..Default::default()
    };

    Ok(image)
}

/// Read one page-aligned payload run and skip the padding after it.
pub(crate) fn read_payload(
    mut reader: impl Read + Seek,
    size: u32,
    page_size: u32,
    field: &'static str,
) -> Result<Vec<u8>> {
    let payload = reader
        .read_vec_exact(size as usize)
        .map_err(|e| Error::ReadFieldError(field, e))?;
    padding::read_discard(&mut reader, page_size.into())?;

    Ok(payload)
}

/// Write one payload followed by zero padding up to the next page boundary.
pub(crate) fn write_payload(
    mut writer: impl Write + Seek,
    payload: &[u8],
    page_size: u32,
    field: &'static str,
) -> Result<()> {
    writer
        .write_all(payload)
        .map_err(|e| Error::WriteFieldError(field, e))?;
    padding::write_zeros(&mut writer, page_size.into())?;

    Ok(())
}

/// Compare the stored image ID against the payloads and complain if they
/// disagree. The stored value is kept either way so that an unmodified
/// model round-trips byte for byte.
pub(crate) fn verify_id(image: &BootImageData) {
    let digest = compute_id(image);

    if id_words(&digest) != image.id {
        warn!("Stored image ID does not match the SHA1 of the image contents");
    }
}

pub struct AndroidFormat;

impl ImageFormat for AndroidFormat {
    fn is_valid(data: &[u8]) -> bool {
        find_header(data).is_some()
    }

    fn load(data: &[u8]) -> Result<BootImageData> {
        let offset = find_header(data).ok_or(Error::UnknownFormat)?;

        // Page alignment is relative to the header, not the buffer, so any
        // vendor preamble is skipped before counting starts.
        let mut cursor = Cursor::new(data);
        cursor.read_discard_exact(offset as u64)?;
        let mut reader = CountingReader::new(cursor);

        let raw = RawHeader::read_from_io(&mut reader)?;
        let mut image = header_to_data(&raw)?;
        let page_size = image.page_size;

        check_component_size(raw.kernel_size.get(), "kernel_size")?;
        check_component_size(raw.ramdisk_size.get(), "ramdisk_size")?;
        check_component_size(raw.second_size.get(), "second_size")?;
        check_component_size(raw.dt_size.get(), "dt_size")?;

        padding::read_discard(&mut reader, page_size.into())?;

        image.kernel = read_payload(&mut reader, raw.kernel_size.get(), page_size, "kernel")?;
        image.ramdisk = read_payload(&mut reader, raw.ramdisk_size.get(), page_size, "ramdisk")?;
        image.second = read_payload(&mut reader, raw.second_size.get(), page_size, "second")?;
        image.dt = read_payload(&mut reader, raw.dt_size.get(), page_size, "dt")?;

        verify_id(&image);

        Ok(image)
    }

    fn create(data: &mut BootImageData) -> Result<Vec<u8>> {
        if !PAGE_SIZES.contains(&data.page_size) {
            return Err(Error::InvalidFieldValue("page_size", data.page_size));
        }

        check_component_size(data.kernel.len() as u32, "kernel_size")?;
        check_component_size(data.ramdisk.len() as u32, "ramdisk_size")?;
        check_component_size(data.second.len() as u32, "second_size")?;
        check_component_size(data.dt.len() as u32, "dt_size")?;

        data.id = id_words(&compute_id(data));

        let raw = RawHeader {
            magic: BOOT_MAGIC,
            kernel_size: (data.kernel.len() as u32).into(),
            kernel_addr: data.kernel_addr.into(),
            ramdisk_size: (data.ramdisk.len() as u32).into(),
            ramdisk_addr: data.ramdisk_addr.into(),
            second_size: (data.second.len() as u32).into(),
            second_addr: data.second_addr.into(),
            tags_addr: data.tags_addr.into(),
            page_size: data.page_size.into(),
            dt_size: (data.dt.len() as u32).into(),
            unused: data.entrypoint.into(),
            name: data.board_name.as_bytes().to_truncated_array(),
            cmdline: data.cmdline.as_bytes().to_truncated_array(),
            id: data.id.map(|w| w.into()),
        };

        let mut writer = CountingWriter::new(Cursor::new(Vec::new()));

        raw.write_to_io(&mut writer)?;
        padding::write_zeros(&mut writer, data.page_size.into())?;

        write_payload(&mut writer, &data.kernel, data.page_size, "kernel")?;
        write_payload(&mut writer, &data.ramdisk, data.page_size, "ramdisk")?;
        write_payload(&mut writer, &data.second, data.page_size, "second")?;
        write_payload(&mut writer, &data.dt, data.page_size, "dt")?;

        let (cursor, _) = writer.finish();

        Ok(cursor.into_inner())
    }
}
