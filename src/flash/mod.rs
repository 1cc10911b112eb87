// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Flash I/O primitive and region façades (spec.md §4.3/§4.4).
//!
//! `flash_op` is the single chunking engine behind every read and write
//! against either flash region; the four façades below are thin wrappers
//! that fix its region-specific parameters.

use log::{debug, info};

use crate::error::UpgradeError;
use crate::progress::{ProgressRange, ProgressSink};
use crate::transport::{Direction, RegisterFrame, RegisterTransport};

/// Which façade operation a [`UpgradeError::FlashIoError`] occurred during.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Erasing the image region.
    EraseImage,
    /// Erasing the image-info region.
    EraseImageInfo,
    /// Writing the image region.
    WriteImage,
    /// Writing the image-info region.
    WriteImageInfo,
    /// Reading the image region back (verification).
    ReadImage,
    /// Reading the image-info region back (verification).
    ReadImageInfo,
}

/// Static, compile-time layout of a flash region (spec.md §3).
#[derive(Debug, Clone, Copy)]
pub struct FlashRegion {
    /// Base address in flash address space.
    pub base_address: u32,
    /// Number of erasable pages.
    pub page_count: u32,
    /// Size of one page in bytes.
    pub page_size: u32,
    /// Permission key required to erase or write this region.
    pub key: u32,
    /// Address of the flash pointer register.
    pub pointer_register: u32,
    /// Address of the flash data register.
    pub data_register: u32,
    /// Address of the key/permission register.
    pub key_register: u32,
    /// Address of the erase-request register.
    pub erase_register: u32,
}

/// Shared register addresses for the T7 flash controller.
mod registers {
    pub const POINTER: u32 = 0xF000_0000;
    pub const DATA: u32 = 0xF000_0004;
    pub const ERASE: u32 = 0xF000_0008;
    pub const KEY: u32 = 0xF000_000C;
}

/// The image region: holds the firmware payload itself.
pub const IMAGE_REGION: FlashRegion = FlashRegion {
    base_address: 0x0000_0000,
    page_count: 256,
    page_size: 0x0001_0000,
    key: 0x7041_1C23,
    pointer_register: registers::POINTER,
    data_register: registers::DATA,
    key_register: registers::KEY,
    erase_register: registers::ERASE,
};

/// The image-info region: holds the 128-byte image header/metadata.
pub const IMAGE_INFO_REGION: FlashRegion = FlashRegion {
    base_address: 0x000F_0000,
    page_count: 1,
    page_size: 0x0000_1000,
    key: 0x7041_1C24,
    pointer_register: registers::POINTER,
    data_register: registers::DATA,
    key_register: registers::KEY,
    erase_register: registers::ERASE,
};

/// Default chunk size, in 32-bit words, for a single compound frame. Bounds
/// every `flash_op` chunk to the transport's frame limit (spec.md §4.3).
pub const DEFAULT_BLOCK_SIZE: u32 = 128;

/// The generic flash read-or-write primitive (spec.md §4.3).
///
/// Issues a sequence of compound register transactions, advancing the
/// flash pointer by `block_size * 4` bytes per chunk. The last chunk
/// handles the `length % block_size` remainder; no partial chunk is
/// emitted when the remainder is zero. Chunks are strictly sequential —
/// the next chunk is only issued after the previous one completes.
///
/// `on_chunk` is called after each successful chunk with the number of
/// words just transferred, so callers can drive progress reporting
/// without this function knowing about [`ProgressSink`] directly.
///
/// # Errors
///
/// Returns [`UpgradeError::FlashIoError`] on the first chunk failure,
/// carrying the stage and chunk index; no automatic retry is attempted.
#[allow(clippy::too_many_arguments, reason = "mirrors the wire-level transaction shape 1:1")]
pub fn flash_op<T: RegisterTransport>(
    device: &mut T,
    stage: Stage,
    start_address: u32,
    length: u32,
    block_size: u32,
    pointer_register: u32,
    data_register: u32,
    direction: Direction,
    key: Option<(u32, u32)>,
    data: Option<&[u8]>,
    mut on_chunk: impl FnMut(u32),
) -> Result<Vec<u8>, UpgradeError> {
    if let Direction::Write = direction {
        let data = data.ok_or(UpgradeError::ParseError("write requires a data buffer".to_owned()))?;
        if data.len() % 4 != 0 {
            return Err(UpgradeError::ParseError(format!(
                "write buffer length {} is not a multiple of 4 bytes",
                data.len()
            )));
        }
        if data.len() as u32 != length * 4 {
            return Err(UpgradeError::ParseError(format!(
                "write buffer is {} bytes, expected {} for length {length} words",
                data.len(),
                length * 4
            )));
        }
    }

    let mut offset_words = 0u32;
    let mut chunk_index = 0usize;
    let mut result = Vec::new();

    while offset_words < length {
        let this_chunk = block_size.min(length - offset_words);
        let frame = RegisterFrame {
            pointer_value: start_address + offset_words * 4,
            pointer_register,
            data_register,
            key,
            direction,
            count: this_chunk,
        };

        let write_words: Option<Vec<u32>> = if let Direction::Write = direction {
            let byte_offset = (offset_words * 4) as usize;
            let byte_len = (this_chunk * 4) as usize;
            let slice = &data.expect("validated above")[byte_offset..byte_offset + byte_len];
            Some(slice.chunks_exact(4).map(|w| u32::from_be_bytes(w.try_into().expect("chunk of 4"))).collect())
        } else {
            None
        };

        let words = device
            .rw_many(&frame, write_words.as_deref())
            .map_err(|cause| UpgradeError::FlashIoError {
                stage,
                chunk: chunk_index,
                cause,
            })?;

        if let Direction::Read = direction {
            result.extend(words.iter().flat_map(|w| w.to_be_bytes()));
        }

        on_chunk(this_chunk);
        offset_words += this_chunk;
        chunk_index += 1;
    }

    debug!("{stage:?}: moved {length} words across {chunk_index} chunks, final pointer {:#010X}", start_address + length * 4);
    Ok(result)
}

/// Erases the first `pages` pages of `region`, sequentially, each as a
/// (key, address) write pair rather than a streaming `flash_op` block
/// (spec.md §4.4). Only the pages that will actually be written are
/// erased — not the whole region — since a region is sized for the
/// largest possible image, not the one at hand.
///
/// # Errors
///
/// Returns [`UpgradeError::FlashIoError`] if any page's erase-register
/// write fails.
pub fn erase_region<T: RegisterTransport>(
    device: &mut T,
    region: &FlashRegion,
    stage: Stage,
    pages: u32,
    progress: &mut dyn ProgressSink,
    range: ProgressRange,
) -> Result<(), UpgradeError> {
    let pages = pages.min(region.page_count);
    for page in 0..pages {
        device
            .write_register(region.key_register, region.key)
            .map_err(|cause| UpgradeError::FlashIoError {
                stage,
                chunk: page as usize,
                cause,
            })?;

        let address = region.base_address + page * region.page_size;
        device
            .write_register(region.erase_register, address)
            .map_err(|cause| UpgradeError::FlashIoError {
                stage,
                chunk: page as usize,
                cause,
            })?;

        progress.update(range.scale(u64::from(page) + 1, u64::from(pages)), false);
    }
    info!("{stage:?}: erased {pages} pages");
    Ok(())
}

/// Number of whole pages of `region` needed to cover `byte_len` bytes.
#[must_use]
pub fn pages_for(region: &FlashRegion, byte_len: usize) -> u32 {
    byte_len.div_ceil(region.page_size as usize) as u32
}

/// Bulk write via [`flash_op`], using `region`'s permission key.
///
/// # Errors
///
/// Returns [`UpgradeError::FlashIoError`] on chunk failure, or a
/// parse error if `data`'s length is not a multiple of 4 bytes.
pub fn write_region<T: RegisterTransport>(
    device: &mut T,
    region: &FlashRegion,
    stage: Stage,
    data: &[u8],
    block_size: u32,
    progress: &mut dyn ProgressSink,
    range: ProgressRange,
) -> Result<(), UpgradeError> {
    let length_words = data.len() as u32 / 4;
    let total = u64::from(length_words);
    let mut moved = 0u64;
    flash_op(
        device,
        stage,
        region.base_address,
        length_words,
        block_size,
        region.pointer_register,
        region.data_register,
        Direction::Write,
        Some((region.key_register, region.key)),
        Some(data),
        |chunk_words| {
            moved += u64::from(chunk_words);
            progress.update(range.scale(moved, total), false);
        },
    )?;
    Ok(())
}

/// Bulk read via [`flash_op`], used for [`crate::verify::check_image`] and
/// [`crate::verify::check_erase`]. No permission key is required to read.
///
/// # Errors
///
/// Returns [`UpgradeError::FlashIoError`] on chunk failure.
pub fn read_region<T: RegisterTransport>(
    device: &mut T,
    region: &FlashRegion,
    stage: Stage,
    length_words: u32,
    block_size: u32,
) -> Result<Vec<u8>, UpgradeError> {
    flash_op(
        device,
        stage,
        region.base_address,
        length_words,
        block_size,
        region.pointer_register,
        region.data_register,
        Direction::Read,
        None,
        None,
        |_| {},
    )
}
