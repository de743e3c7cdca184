/*
 * SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Sony boot images are ELF32 executables whose program segments each carry
//! one payload. The segment's `p_vaddr` slot holds a vendor tag naming the
//! payload kind and `p_paddr` holds the load address where one applies. The
//! SIN header segment is preserved verbatim so that an image can be
//! repackaged without understanding it.

use std::{
    io::{Cursor, Write},
    str,
};

use num_traits::ToPrimitive;
use tracing::warn;
use zerocopy::{little_endian, FromBytes, IntoBytes};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::{padding, padding::ZeroPadded, BootImageData, Error, ImageFormat, Result},
    stream::CountingWriter,
};

pub const ELF_MAGIC: [u8; 4] = *b"\x7fELF";

const ELF_CLASS_32: u8 = 1;
const ELF_DATA_LSB: u8 = 1;
const ELF_VERSION: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_ARM: u16 = 40;

const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;

/// Real images carry at most one segment per payload kind.
const MAX_PROGRAM_HEADERS: usize = 8;

/// Vendor tags stored in `p_vaddr` identifying the payload carried by a
/// segment.
pub const SONY_SEGMENT_KERNEL: u32 = 0x0000_0001;
pub const SONY_SEGMENT_RAMDISK: u32 = 0x0000_0002;
pub const SONY_SEGMENT_CMDLINE: u32 = 0x0000_0004;
pub const SONY_SEGMENT_IPL: u32 = 0x0000_0008;
pub const SONY_SEGMENT_RPM: u32 = 0x0000_0010;
pub const SONY_SEGMENT_APPSBL: u32 = 0x0000_0020;
pub const SONY_SEGMENT_SIN_IMAGE: u32 = 0x0000_0040;
pub const SONY_SEGMENT_SIN_HEADER: u32 = 0x0000_0080;

/// Raw on-disk layout for the ELF32 file header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawElfHeader {
    /// Magic value. This should be equal to [`ELF_MAGIC`].
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    osabi: u8,
    abiversion: u8,
    pad: [u8; 7],
    e_type: little_endian::U16,
    e_machine: little_endian::U16,
    e_version: little_endian::U32,
    e_entry: little_endian::U32,
    e_phoff: little_endian::U32,
    e_shoff: little_endian::U32,
    e_flags: little_endian::U32,
    e_ehsize: little_endian::U16,
    e_phentsize: little_endian::U16,
    e_phnum: little_endian::U16,
    e_shentsize: little_endian::U16,
    e_shnum: little_endian::U16,
    e_shstrndx: little_endian::U16,
}

/// Raw on-disk layout for an ELF32 program header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawProgramHeader {
    p_type: little_endian::U32,
    p_offset: little_endian::U32,
    p_vaddr: little_endian::U32,
    p_paddr: little_endian::U32,
    p_filesz: little_endian::U32,
    p_memsz: little_endian::U32,
    p_flags: little_endian::U32,
    p_align: little_endian::U32,
}

const EHDR_SIZE: usize = std::mem::size_of::<RawElfHeader>();
const PHDR_SIZE: usize = std::mem::size_of::<RawProgramHeader>();

pub struct SonyElfFormat;

impl ImageFormat for SonyElfFormat {
    fn is_valid(data: &[u8]) -> bool {
        let Ok((raw, _)) = RawElfHeader::read_from_prefix(data) else {
            return false;
        };

        raw.magic == ELF_MAGIC
            && raw.class == ELF_CLASS_32
            && (1..=MAX_PROGRAM_HEADERS).contains(&usize::from(raw.e_phnum.get()))
    }

    fn load(data: &[u8]) -> Result<BootImageData> {
        let (raw, _) = RawElfHeader::read_from_prefix(data)
            .map_err(|_| Error::InvalidData("ELF header is truncated"))?;

        if raw.magic != ELF_MAGIC || raw.class != ELF_CLASS_32 || raw.data != ELF_DATA_LSB {
            return Err(Error::InvalidData("Not a little-endian ELF32 image"));
        }

        let phnum = usize::from(raw.e_phnum.get());
        if !(1..=MAX_PROGRAM_HEADERS).contains(&phnum) {
            return Err(Error::InvalidFieldValue("e_phnum", raw.e_phnum.get().into()));
        }
        if usize::from(raw.e_phentsize.get()) != PHDR_SIZE {
            return Err(Error::InvalidFieldValue(
                "e_phentsize",
                raw.e_phentsize.get().into(),
            ));
        }

        let mut image = BootImageData {
            entrypoint: raw.e_entry.get(),
            ..Default::default()
        };

        let phoff = raw.e_phoff.get() as usize;

        for i in 0..phnum {
            let offset = phoff
                .checked_add(i * PHDR_SIZE)
                .ok_or(Error::FieldOutOfBounds("e_phoff"))?;
            let bytes = data
                .get(offset..offset + PHDR_SIZE)
                .ok_or(Error::FieldOutOfBounds("e_phoff"))?;
            let phdr = RawProgramHeader::read_from_bytes(bytes)
                .map_err(|_| Error::InvalidData("Program header is malformed"))?;

            let start = phdr.p_offset.get() as usize;
            let end = start
                .checked_add(phdr.p_filesz.get() as usize)
                .ok_or(Error::FieldOutOfBounds("p_filesz"))?;
            let payload = data
                .get(start..end)
                .ok_or(Error::FieldOutOfBounds("p_filesz"))?;

            match phdr.p_vaddr.get() {
                SONY_SEGMENT_KERNEL => {
                    image.kernel = payload.to_vec();
                    image.kernel_addr = phdr.p_paddr.get();
                }
                SONY_SEGMENT_RAMDISK => {
                    image.ramdisk = payload.to_vec();
                    image.ramdisk_addr = phdr.p_paddr.get();
                }
                SONY_SEGMENT_CMDLINE => {
                    let cmdline = payload.without_trailing_zeros();
                    image.cmdline = str::from_utf8(cmdline)
                        .map_err(|e| Error::StringNotUtf8("cmdline", cmdline.to_vec(), e))?
                        .to_owned();
                }
                SONY_SEGMENT_IPL => {
                    image.ipl = payload.to_vec();
                    image.ipl_addr = phdr.p_paddr.get();
                }
                SONY_SEGMENT_RPM => {
                    image.rpm = payload.to_vec();
                    image.rpm_addr = phdr.p_paddr.get();
                }
                SONY_SEGMENT_APPSBL => {
                    image.appsbl = payload.to_vec();
                    image.appsbl_addr = phdr.p_paddr.get();
                }
                SONY_SEGMENT_SIN_IMAGE => {
                    image.sin_image = payload.to_vec();
                }
                SONY_SEGMENT_SIN_HEADER => {
                    image.sin_header = payload.to_vec();
                }
                tag => {
                    warn!("Skipping program segment with unknown tag {tag:#010x}");
                }
            }
        }

        Ok(image)
    }

    fn create(data: &mut BootImageData) -> Result<Vec<u8>> {
        // One (p_type, tag, address, payload) entry per present payload, in
        // the canonical segment order.
        let mut segments: Vec<(u32, u32, u32, &[u8])> = vec![];

        if !data.kernel.is_empty() {
            segments.push((PT_LOAD, SONY_SEGMENT_KERNEL, data.kernel_addr, &data.kernel));
        }
        if !data.ramdisk.is_empty() {
            segments.push((
                PT_LOAD,
                SONY_SEGMENT_RAMDISK,
                data.ramdisk_addr,
                &data.ramdisk,
            ));
        }
        if !data.cmdline.is_empty() {
            segments.push((PT_NOTE, SONY_SEGMENT_CMDLINE, 0, data.cmdline.as_bytes()));
        }
        if !data.ipl.is_empty() {
            segments.push((PT_LOAD, SONY_SEGMENT_IPL, data.ipl_addr, &data.ipl));
        }
        if !data.rpm.is_empty() {
            segments.push((PT_LOAD, SONY_SEGMENT_RPM, data.rpm_addr, &data.rpm));
        }
        if !data.appsbl.is_empty() {
            segments.push((PT_LOAD, SONY_SEGMENT_APPSBL, data.appsbl_addr, &data.appsbl));
        }
        if !data.sin_header.is_empty() {
            segments.push((PT_NOTE, SONY_SEGMENT_SIN_HEADER, 0, &data.sin_header));
        }
        if !data.sin_image.is_empty() {
            segments.push((PT_NOTE, SONY_SEGMENT_SIN_IMAGE, 0, &data.sin_image));
        }

        if segments.is_empty() {
            return Err(Error::InvalidData(
                "Sony ELF images require at least one payload",
            ));
        }

        let raw = RawElfHeader {
            magic: ELF_MAGIC,
            class: ELF_CLASS_32,
            data: ELF_DATA_LSB,
            version: ELF_VERSION,
            osabi: 0,
            abiversion: 0,
            pad: [0; 7],
            e_type: ET_EXEC.into(),
            e_machine: EM_ARM.into(),
            e_version: u32::from(ELF_VERSION).into(),
            e_entry: data.entrypoint.into(),
            e_phoff: (EHDR_SIZE as u32).into(),
            e_shoff: 0u32.into(),
            e_flags: 0u32.into(),
            e_ehsize: (EHDR_SIZE as u16).into(),
            e_phentsize: (PHDR_SIZE as u16).into(),
            e_phnum: (segments.len() as u16).into(),
            e_shentsize: 0u16.into(),
            e_shnum: 0u16.into(),
            e_shstrndx: 0u16.into(),
        };

        let mut writer = CountingWriter::new(Cursor::new(Vec::new()));

        raw.write_to_io(&mut writer)?;

        // Payloads follow the program header table, 4-byte aligned.
        let mut offset = EHDR_SIZE + segments.len() * PHDR_SIZE;

        for (p_type, tag, addr, payload) in &segments {
            offset = padding::round(offset, 4).ok_or(Error::FieldOutOfBounds("p_offset"))?;

            let p_offset = offset
                .to_u32()
                .ok_or(Error::FieldOutOfBounds("p_offset"))?;
            let p_filesz = payload
                .len()
                .to_u32()
                .ok_or(Error::FieldOutOfBounds("p_filesz"))?;

            let phdr = RawProgramHeader {
                p_type: (*p_type).into(),
                p_offset: p_offset.into(),
                p_vaddr: (*tag).into(),
                p_paddr: (*addr).into(),
                p_filesz: p_filesz.into(),
                p_memsz: p_filesz.into(),
                p_flags: 0u32.into(),
                p_align: 4u32.into(),
            };

            phdr.write_to_io(&mut writer)?;

            offset += payload.len();
        }

        for (_, _, _, payload) in &segments {
            padding::write_zeros(&mut writer, 4)?;
            writer
                .write_all(payload)
                .map_err(|e| Error::WriteFieldError("segment", e))?;
        }

        let (cursor, _) = writer.finish();

        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::{RawElfHeader, RawProgramHeader, SonyElfFormat, ELF_MAGIC};
    use crate::format::{BootImageData, Error, ImageFormat};

    #[test]
    fn raw_header_layouts() {
        assert_eq!(mem::size_of::<RawElfHeader>(), 52);
        assert_eq!(mem::size_of::<RawProgramHeader>(), 32);
    }

    #[test]
    fn round_trip() {
        let mut data = BootImageData {
            kernel: b"kernel data".to_vec(),
            ramdisk: b"ramdisk data".to_vec(),
            cmdline: "console=ttyMSM0".to_owned(),
            ipl: b"ipl data".to_vec(),
            rpm: b"rpm data".to_vec(),
            appsbl: b"appsbl data".to_vec(),
            sin_header: b"sin header".to_vec(),
            sin_image: b"sin image".to_vec(),
            kernel_addr: 0x80208000,
            ramdisk_addr: 0x81900000,
            ipl_addr: 0x00102000,
            rpm_addr: 0x00020000,
            appsbl_addr: 0x8ff00000,
            entrypoint: 0x80208000,
            ..Default::default()
        };

        let buf = SonyElfFormat::create(&mut data).unwrap();

        assert_eq!(&buf[..4], &ELF_MAGIC);
        assert!(SonyElfFormat::is_valid(&buf));

        let image = SonyElfFormat::load(&buf).unwrap();

        assert_eq!(image.kernel, data.kernel);
        assert_eq!(image.ramdisk, data.ramdisk);
        assert_eq!(image.cmdline, data.cmdline);
        assert_eq!(image.ipl, data.ipl);
        assert_eq!(image.rpm, data.rpm);
        assert_eq!(image.appsbl, data.appsbl);
        assert_eq!(image.sin_header, data.sin_header);
        assert_eq!(image.sin_image, data.sin_image);
        assert_eq!(image.kernel_addr, data.kernel_addr);
        assert_eq!(image.ramdisk_addr, data.ramdisk_addr);
        assert_eq!(image.ipl_addr, data.ipl_addr);
        assert_eq!(image.rpm_addr, data.rpm_addr);
        assert_eq!(image.appsbl_addr, data.appsbl_addr);
        assert_eq!(image.entrypoint, data.entrypoint);
    }

    #[test]
    fn unknown_segment_is_skipped() {
        let mut data = BootImageData {
            kernel: b"kernel data".to_vec(),
            ..Default::default()
        };
        let mut buf = SonyElfFormat::create(&mut data).unwrap();

        // Clobber the first program header's tag.
        buf[60..64].copy_from_slice(&0xdeadbeefu32.to_le_bytes());

        let image = SonyElfFormat::load(&buf).unwrap();
        assert!(image.kernel.is_empty());
    }

    #[test]
    fn create_requires_a_payload() {
        let mut data = BootImageData::default();

        assert!(matches!(
            SonyElfFormat::create(&mut data),
            Err(Error::InvalidData(_))
        ));
    }
}
