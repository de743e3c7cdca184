/*
 * SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Loki'd images are Android images post-processed to satisfy certain locked
//! bootloaders. A trailer at the end of the file records the original values
//! of the header fields the patcher clobbered. Early patcher versions wrote
//! zeros for the original sizes, so loading those requires rediscovering the
//! payload boundaries heuristically. Output is always new-style.

use std::io::Cursor;

use memchr::memmem;
use tracing::debug;
use zerocopy::{little_endian, FromBytes, IntoBytes};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::{
        android::{self, AndroidFormat, RawHeader, BOOT_MAGIC},
        padding, BootImageData, Error, ImageFormat, Result,
    },
    stream::{CountingReader, ReadDiscardExt},
};

pub const LOKI_MAGIC: [u8; 4] = *b"LOKI";

/// Values the patcher writes into the header's ramdisk fields. Bootloaders
/// that look at the patched header see these; the trailer carries the real
/// ones.
pub const SENTINEL_RAMDISK_SIZE: u32 = 0x200;
pub const SENTINEL_RAMDISK_ADDR: u32 = 0x88f0_0000;

/// Shellcode residue that immediately follows the kernel in old-style
/// images. Finding it is the cheap way to locate the kernel's end.
const SHELLCODE_MARKER: [u8; 4] = [0x88, 0x16, 0x88, 0x58];

/// How many page-aligned candidates to probe when looking for the residual
/// Android header in an old-style image.
const OLD_HEADER_SCAN_PAGES: usize = 32;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];
const LZ4_LEGACY_MAGIC: [u8; 4] = [0x02, 0x21, 0x4c, 0x18];

/// Raw on-disk layout for the trailer occupying the final bytes of the
/// image.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawLokiTrailer {
    /// Magic value. This should be equal to [`LOKI_MAGIC`].
    magic: [u8; 4],
    /// 0 for boot images, 1 for recovery images.
    recovery: little_endian::U32,
    patched_kernel_size: little_endian::U32,
    ramdisk_addr: little_endian::U32,
    orig_kernel_size: little_endian::U32,
    orig_ramdisk_size: little_endian::U32,
}

const TRAILER_SIZE: usize = std::mem::size_of::<RawLokiTrailer>();

fn looks_like_ramdisk(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
        || data.starts_with(&LZ4_FRAME_MAGIC)
        || data.starts_with(&LZ4_LEGACY_MAGIC)
}

/// Load an image whose trailer carries the original sizes. The layout is a
/// plain Android image aside from the patched ramdisk header fields.
fn load_new(body: &[u8], trailer: &RawLokiTrailer) -> Result<BootImageData> {
    let offset = android::find_header(body).ok_or(Error::UnknownFormat)?;

    let mut cursor = Cursor::new(body);
    cursor.read_discard_exact(offset as u64)?;
    let mut reader = CountingReader::new(cursor);

    let raw = RawHeader::read_from_io(&mut reader)?;
    let mut image = android::header_to_data(&raw)?;
    let page_size = image.page_size;

    let kernel_size = trailer.orig_kernel_size.get();
    let ramdisk_size = trailer.orig_ramdisk_size.get();

    android::check_component_size(kernel_size, "orig_kernel_size")?;
    android::check_component_size(ramdisk_size, "orig_ramdisk_size")?;
    android::check_component_size(raw.second_size.get(), "second_size")?;
    android::check_component_size(raw.dt_size.get(), "dt_size")?;

    image.ramdisk_addr = trailer.ramdisk_addr.get();

    padding::read_discard(&mut reader, page_size.into())?;

    image.kernel = android::read_payload(&mut reader, kernel_size, page_size, "kernel")?;
    image.ramdisk = android::read_payload(&mut reader, ramdisk_size, page_size, "ramdisk")?;
    image.second = android::read_payload(&mut reader, raw.second_size.get(), page_size, "second")?;
    image.dt = android::read_payload(&mut reader, raw.dt_size.get(), page_size, "dt")?;

    android::verify_id(&image);

    Ok(image)
}

/// Recover an image whose trailer has zero original sizes. The payload
/// boundaries are rediscovered from the bytes; the second bootloader and
/// device tree fields of this era are unreliable and stay empty.
fn load_old(body: &[u8], trailer: &RawLokiTrailer) -> Result<BootImageData> {
    let offset = android::find_header(body).ok_or(Error::UnknownFormat)?;

    let raw = RawHeader::read_from_io(Cursor::new(&body[offset..]))?;
    let mut image = android::header_to_data(&raw)?;
    let page_size = image.page_size as usize;

    // Quirk of the old patcher: the trailer's ramdisk address slot holds the
    // kernel's original load address.
    image.kernel_addr = trailer.ramdisk_addr.get();

    // The kernel occupies the page run after the residual header.
    let mut header_index = None;
    for page in 0..OLD_HEADER_SCAN_PAGES {
        let candidate = page * page_size;
        if candidate + BOOT_MAGIC.len() > body.len() {
            break;
        }
        if body[candidate..].starts_with(&BOOT_MAGIC) {
            header_index = Some(candidate);
            break;
        }
    }
    let header_index =
        header_index.ok_or(Error::InvalidData("No page-aligned Android header found"))?;

    let kernel_start = header_index + page_size;
    if kernel_start >= body.len() {
        return Err(Error::InvalidData("Kernel falls outside the image"));
    }

    let (kernel_size, ramdisk_start) = match memmem::find(&body[kernel_start..], &SHELLCODE_MARKER)
    {
        Some(pos) => {
            let marker_end = kernel_start + pos + SHELLCODE_MARKER.len();
            let ramdisk_start = padding::round(marker_end, page_size)
                .unwrap_or(body.len())
                .min(body.len());

            (pos, ramdisk_start)
        }
        None => {
            // No shellcode marker. Probe the later page boundaries for
            // something that looks like a compressed ramdisk instead.
            let mut found = None;
            let mut candidate = kernel_start + page_size;
            while candidate < body.len() {
                if looks_like_ramdisk(&body[candidate..]) {
                    found = Some(candidate);
                    break;
                }
                candidate += page_size;
            }

            let ramdisk_start = found.ok_or(Error::InvalidData(
                "No compressed ramdisk found after the kernel",
            ))?;

            (ramdisk_start - kernel_start, ramdisk_start)
        }
    };

    // The ramdisk runs up to the trailer. Its true size was never recorded,
    // so only the zero padding of the final page can be reclaimed.
    let mut ramdisk_end = body.len();
    let floor = ramdisk_start.max(body.len().saturating_sub(page_size));
    while ramdisk_end > floor && body[ramdisk_end - 1] == 0 {
        ramdisk_end -= 1;
    }

    image.kernel = body[kernel_start..kernel_start + kernel_size].to_vec();
    image.ramdisk = body[ramdisk_start..ramdisk_end].to_vec();

    Ok(image)
}

pub struct LokiFormat;

impl ImageFormat for LokiFormat {
    fn is_valid(data: &[u8]) -> bool {
        data.len() >= TRAILER_SIZE
            && data[data.len() - TRAILER_SIZE..].starts_with(&LOKI_MAGIC)
            && AndroidFormat::is_valid(data)
    }

    fn load(data: &[u8]) -> Result<BootImageData> {
        if data.len() < TRAILER_SIZE {
            return Err(Error::InvalidData("Image is too small to hold the trailer"));
        }

        let trailer_offset = data.len() - TRAILER_SIZE;
        let trailer = RawLokiTrailer::read_from_bytes(&data[trailer_offset..])
            .map_err(|_| Error::InvalidData("Loki trailer is malformed"))?;

        if trailer.magic != LOKI_MAGIC {
            return Err(Error::InvalidData("Loki trailer is malformed"));
        }

        let body = &data[..trailer_offset];

        if trailer.orig_kernel_size.get() != 0 && trailer.orig_ramdisk_size.get() != 0 {
            debug!("Loki trailer carries the original sizes");
            load_new(body, &trailer)
        } else {
            debug!("Old-style Loki image; recovering payload boundaries");
            load_old(body, &trailer)
        }
    }

    fn create(data: &mut BootImageData) -> Result<Vec<u8>> {
        // Zero sizes in the trailer are the old-style discriminator, so an
        // image without both payloads cannot be represented.
        if data.kernel.is_empty() || data.ramdisk.is_empty() {
            return Err(Error::InvalidData(
                "Loki images require a kernel and a ramdisk",
            ));
        }

        let kernel_size = data.kernel.len() as u32;
        let ramdisk_size = data.ramdisk.len() as u32;
        let ramdisk_addr = data.ramdisk_addr;

        let mut buf = AndroidFormat::create(data)?;

        let (raw, _) = RawHeader::mut_from_prefix(buf.as_mut_slice())
            .map_err(|_| Error::InvalidData("Image is too small to hold the header"))?;
        raw.ramdisk_size = SENTINEL_RAMDISK_SIZE.into();
        raw.ramdisk_addr = SENTINEL_RAMDISK_ADDR.into();

        let trailer = RawLokiTrailer {
            magic: LOKI_MAGIC,
            recovery: 0u32.into(),
            patched_kernel_size: kernel_size.into(),
            ramdisk_addr: ramdisk_addr.into(),
            orig_kernel_size: kernel_size.into(),
            orig_ramdisk_size: ramdisk_size.into(),
        };
        buf.extend_from_slice(trailer.as_bytes());

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use zerocopy::IntoBytes;

    use super::{
        LokiFormat, RawLokiTrailer, LOKI_MAGIC, SENTINEL_RAMDISK_ADDR, SENTINEL_RAMDISK_SIZE,
        SHELLCODE_MARKER, TRAILER_SIZE,
    };
    use crate::format::{android::AndroidFormat, BootImageData, Error, ImageFormat};

    fn old_style_trailer(kernel_addr: u32) -> RawLokiTrailer {
        RawLokiTrailer {
            magic: LOKI_MAGIC,
            recovery: 0u32.into(),
            patched_kernel_size: 0u32.into(),
            ramdisk_addr: kernel_addr.into(),
            orig_kernel_size: 0u32.into(),
            orig_ramdisk_size: 0u32.into(),
        }
    }

    #[test]
    fn trailer_layout() {
        assert_eq!(mem::size_of::<RawLokiTrailer>(), 24);
        assert_eq!(TRAILER_SIZE, 24);
    }

    #[test]
    fn new_style_round_trip() {
        let mut data = BootImageData {
            kernel: b"kernel data".to_vec(),
            ramdisk: b"ramdisk data".to_vec(),
            second: b"second data".to_vec(),
            dt: b"dt data".to_vec(),
            ..Default::default()
        };

        let buf = LokiFormat::create(&mut data).unwrap();

        // Patched header fields.
        assert_eq!(&buf[16..20], &SENTINEL_RAMDISK_SIZE.to_le_bytes());
        assert_eq!(&buf[20..24], &SENTINEL_RAMDISK_ADDR.to_le_bytes());
        // Trailer with the real values.
        let trailer = &buf[buf.len() - TRAILER_SIZE..];
        assert_eq!(&trailer[..4], &LOKI_MAGIC);
        assert_eq!(&trailer[16..20], &11u32.to_le_bytes());
        assert_eq!(&trailer[20..24], &12u32.to_le_bytes());

        assert!(LokiFormat::is_valid(&buf));
        let image = LokiFormat::load(&buf).unwrap();

        assert_eq!(image.kernel, data.kernel);
        assert_eq!(image.ramdisk, data.ramdisk);
        assert_eq!(image.second, data.second);
        assert_eq!(image.dt, data.dt);
        assert_eq!(image.ramdisk_addr, data.ramdisk_addr);
        assert_eq!(image.id, data.id);
    }

    #[test]
    fn old_style_recovery_with_marker() {
        // The fixture kernel is 100 bytes followed by the shellcode marker
        // within the same page run.
        let mut kernel = vec![0x11; 100];
        kernel.extend_from_slice(&SHELLCODE_MARKER);

        let mut data = BootImageData {
            kernel,
            ramdisk: vec![0xbb; 32],
            ..Default::default()
        };
        let mut buf = AndroidFormat::create(&mut data).unwrap();
        buf.extend_from_slice(old_style_trailer(0x8200_0000).as_bytes());

        assert!(LokiFormat::is_valid(&buf));
        let image = LokiFormat::load(&buf).unwrap();

        assert_eq!(image.kernel, vec![0x11; 100]);
        assert_eq!(image.ramdisk, vec![0xbb; 32]);
        assert_eq!(image.kernel_addr, 0x8200_0000);
    }

    #[test]
    fn old_style_recovery_with_gzip_probe() {
        // No marker this time; recovery has to fall back to probing for the
        // gzip magic at a page boundary. The recovered kernel keeps its page
        // padding because its true end is unknowable.
        let mut ramdisk = vec![0x1f, 0x8b, 0x08, 0x00];
        ramdisk.extend_from_slice(&[0xcc; 60]);
        ramdisk.push(0x01);

        let mut data = BootImageData {
            kernel: vec![0x22; 300],
            ramdisk: ramdisk.clone(),
            ..Default::default()
        };
        let mut buf = AndroidFormat::create(&mut data).unwrap();
        buf.extend_from_slice(old_style_trailer(0x8200_8000).as_bytes());

        let image = LokiFormat::load(&buf).unwrap();

        assert_eq!(image.kernel.len(), 2048);
        assert_eq!(&image.kernel[..300], &[0x22; 300][..]);
        assert!(image.kernel[300..].iter().all(|b| *b == 0));
        assert_eq!(image.ramdisk, ramdisk);
        assert_eq!(image.kernel_addr, 0x8200_8000);
    }

    #[test]
    fn create_requires_kernel_and_ramdisk() {
        let mut data = BootImageData {
            kernel: b"kernel".to_vec(),
            ..Default::default()
        };

        assert!(matches!(
            LokiFormat::create(&mut data),
            Err(Error::InvalidData(_))
        ));
    }
}
