/*
 * SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::io::{self, Read, Seek, Write};

use num_traits::PrimInt;

use crate::stream::{ReadDiscardExt, WriteZerosExt};

/// Number of bytes between `offset` and the next page boundary. Zero when
/// the offset is already aligned.
pub fn calc<N: PrimInt>(offset: N, page_size: N) -> N {
    (page_size - offset % page_size) % page_size
}

/// Smallest page multiple at or past `offset`.
pub fn round<N: PrimInt>(offset: N, page_size: N) -> Option<N> {
    offset.checked_add(&calc(offset, page_size))
}

/// Skip ahead to the next page boundary. [`Seek`] is only needed to query
/// the current position.
pub fn read_discard(mut reader: impl Read + Seek, page_size: u64) -> io::Result<u64> {
    let skip = calc(reader.stream_position()?, page_size);
    reader.read_discard_exact(skip)?;

    Ok(skip)
}

/// Fill with zeros up to the next page boundary. [`Seek`] is only needed to
/// query the current position.
pub fn write_zeros(mut writer: impl Write + Seek, page_size: u64) -> io::Result<u64> {
    let fill = calc(writer.stream_position()?, page_size);
    writer.write_zeros_exact(fill)?;

    Ok(fill)
}

pub trait ZeroPadded {
    /// The slice without its run of trailing zeros. Zeros before the last
    /// non-zero byte are kept.
    fn without_trailing_zeros(&self) -> &[u8];

    /// The slice as a zero-padded array. Slices longer than the array are
    /// truncated; the header string fields keep only the bytes that fit.
    fn to_truncated_array<const N: usize>(&self) -> [u8; N];
}

impl ZeroPadded for [u8] {
    fn without_trailing_zeros(&self) -> &[u8] {
        let mut end = self.len();
        while end > 0 && self[end - 1] == 0 {
            end -= 1;
        }

        &self[..end]
    }

    fn to_truncated_array<const N: usize>(&self) -> [u8; N] {
        let n = self.len().min(N);

        let mut result = [0u8; N];
        result[..n].copy_from_slice(&self[..n]);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::ZeroPadded;

    #[test]
    fn alignment() {
        assert_eq!(super::calc(0u32, 2048), 0);
        assert_eq!(super::calc(1u32, 2048), 2047);
        assert_eq!(super::calc(2048u32, 2048), 0);
        assert_eq!(super::round(2049u32, 2048), Some(4096));
        assert_eq!(super::round(u32::MAX, 2048), None);
    }

    #[test]
    fn without_trailing_zeros() {
        assert_eq!(b"foo\0bar\0\0".without_trailing_zeros(), b"foo\0bar");
        assert_eq!(b"\0\0".without_trailing_zeros(), b"");
        assert_eq!(b"foo".without_trailing_zeros(), b"foo");
    }

    #[test]
    fn to_truncated_array() {
        assert_eq!(b"foo".to_truncated_array::<5>(), *b"foo\0\0");
        assert_eq!(b"foobar".to_truncated_array::<3>(), *b"foo");
    }
}
