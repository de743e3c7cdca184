/*
 * SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! mbootimg reads, modifies, and writes Android-style boot images. Four
//! on-disk variants of the same logical container are supported: plain
//! Android images, Loki'd images (old-style input is upgraded to new-style
//! on output), Bump'd images, and Sony ELF32 images.
//!
//! [`bootimage::BootImage`] is the main entry point. It detects the variant
//! on load, exposes typed accessors for every header field and payload, and
//! serializes to whichever variant is selected as the target type. The
//! individual codecs in [`format`] can also be used directly.

pub mod bootimage;
pub mod format;
pub mod stream;
