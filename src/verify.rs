// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Post-erase and post-write verification (spec.md §4.5).

use crate::error::UpgradeError;
use crate::flash::{self, Stage, DEFAULT_BLOCK_SIZE, IMAGE_INFO_REGION, IMAGE_REGION};
use crate::image::FirmwareBundle;
use crate::transport::RegisterTransport;

/// Reads back the pages that were just erased — the bytes about to be
/// written, not the whole static region — and confirms every word reads
/// as `0xFFFFFFFF`.
///
/// # Errors
///
/// Returns [`UpgradeError::EraseIncomplete`] naming the first offset that
/// did not read back blank, or [`UpgradeError::FlashIoError`] if the
/// verification read itself fails.
pub fn check_erase<T: RegisterTransport>(bundle: &mut FirmwareBundle<T>) -> Result<(), UpgradeError> {
    let image_pages = flash::pages_for(&IMAGE_REGION, bundle.image.len());
    let image_words = (image_pages * IMAGE_REGION.page_size) / 4;
    let info_pages = flash::pages_for(&IMAGE_INFO_REGION, crate::image::HEADER_SIZE);
    let info_words = (info_pages * IMAGE_INFO_REGION.page_size) / 4;

    let device = bundle.device.as_mut().expect("device open during verification");

    let image_bytes = flash::read_region(device, &IMAGE_REGION, Stage::ReadImage, image_words, DEFAULT_BLOCK_SIZE)?;
    check_all_blank(&image_bytes)?;

    let info_bytes = flash::read_region(device, &IMAGE_INFO_REGION, Stage::ReadImageInfo, info_words, DEFAULT_BLOCK_SIZE)?;
    check_all_blank(&info_bytes)?;

    Ok(())
}

fn check_all_blank(bytes: &[u8]) -> Result<(), UpgradeError> {
    for (index, word) in bytes.chunks_exact(4).enumerate() {
        let actual = u32::from_be_bytes(word.try_into().expect("chunks_exact(4) yields 4-byte slices"));
        if actual != 0xFFFF_FFFF {
            return Err(UpgradeError::EraseIncomplete {
                offset: (index * 4) as u32,
                actual,
            });
        }
    }
    Ok(())
}

/// Reads the image region back and compares it byte-for-byte against the
/// source image. Only run when [`crate::pipeline::PipelineConfig::verify_image`]
/// is set, since it doubles the time spent flashing.
///
/// # Errors
///
/// Returns [`UpgradeError::WriteMismatch`] at the first divergent byte, or
/// [`UpgradeError::FlashIoError`] if the verification read itself fails.
pub fn check_image<T: RegisterTransport>(bundle: &mut FirmwareBundle<T>) -> Result<(), UpgradeError> {
    let device = bundle.device.as_mut().expect("device open during verification");
    let length_words = bundle.image.len() as u32 / 4;
    let read_back = flash::read_region(device, &IMAGE_REGION, Stage::ReadImage, length_words, DEFAULT_BLOCK_SIZE)?;

    for (offset, (written, read)) in bundle.image.iter().zip(read_back.iter()).enumerate() {
        if written != read {
            return Err(UpgradeError::WriteMismatch { offset });
        }
    }
    Ok(())
}
