/*
 * SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Bump'd images are plain Android images with a sentinel trailer appended.
//! Certain bootloaders refuse to flash a boot partition unless the trailer
//! is present.

use crate::format::{android::AndroidFormat, BootImageData, ImageFormat, Result};

pub const BUMP_MAGIC: [u8; 8] = [0x41, 0xa9, 0xe4, 0x67, 0x74, 0x4d, 0x1d, 0x1b];

pub struct BumpFormat;

impl ImageFormat for BumpFormat {
    fn is_valid(data: &[u8]) -> bool {
        data.ends_with(&BUMP_MAGIC) && AndroidFormat::is_valid(data)
    }

    fn load(data: &[u8]) -> Result<BootImageData> {
        let body = data.strip_suffix(BUMP_MAGIC.as_slice()).unwrap_or(data);

        AndroidFormat::load(body)
    }

    fn create(data: &mut BootImageData) -> Result<Vec<u8>> {
        let mut buf = AndroidFormat::create(data)?;
        buf.extend_from_slice(&BUMP_MAGIC);

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::{BumpFormat, BUMP_MAGIC};
    use crate::format::{android::AndroidFormat, BootImageData, ImageFormat};

    #[test]
    fn trailer_follows_android_image() {
        let mut data = BootImageData {
            kernel: b"kernel".to_vec(),
            ramdisk: b"ramdisk".to_vec(),
            ..Default::default()
        };

        let bumped = BumpFormat::create(&mut data.clone()).unwrap();
        let plain = AndroidFormat::create(&mut data).unwrap();

        assert_eq!(&bumped[..plain.len()], plain.as_slice());
        assert_eq!(&bumped[plain.len()..], &BUMP_MAGIC);

        assert!(BumpFormat::is_valid(&bumped));
        assert!(!BumpFormat::is_valid(&plain));
    }
}
