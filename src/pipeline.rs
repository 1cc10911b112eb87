// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Upgrade pipeline orchestration (spec.md §4.8) and its configuration
//! knobs (SPEC_FULL.md §11).

use std::time::Duration;

use log::info;

use crate::compat;
use crate::error::UpgradeError;
use crate::flash::{self, Stage, DEFAULT_BLOCK_SIZE, IMAGE_INFO_REGION, IMAGE_REGION};
use crate::image::{self, FirmwareBundle, ImageSource};
use crate::progress::{ProgressRange, ProgressSink};
use crate::reboot;
use crate::transport::{ConnectionType, RegisterTransport};
use crate::verify;
use crate::version;

/// Tunable knobs for one run of [`update_firmware`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Whether to read the image region back and compare it byte-for-byte
    /// against the source image after writing. Roughly doubles the time
    /// spent flashing; off by default.
    pub verify_image: bool,
    /// Upper bound on how long to wait for the device to re-enumerate
    /// after reboot.
    pub enumeration_timeout: Duration,
    /// Interval between enumeration polls while waiting for the device to
    /// come back.
    pub enumeration_poll_interval: Duration,
    /// Words per chunk for flash read/write operations.
    pub flash_block_size: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            verify_image: false,
            enumeration_timeout: Duration::from_secs(60),
            enumeration_poll_interval: Duration::from_secs(1),
            flash_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Runs the full upgrade pipeline against an already-open `device`:
/// load, check compatibility, erase, write, reboot, re-enumerate, and
/// confirm the new version, reporting progress at the fixed checkpoints
/// from spec.md §4.8.
///
/// # Errors
///
/// Returns the first [`UpgradeError`] raised by any stage. Transport
/// failures while closing the pre-reboot handle are logged and do not
/// fail the pipeline (see [`reboot::reboot_and_wait`]); every other
/// failure aborts the upgrade.
pub fn update_firmware<T: RegisterTransport>(
    device: T,
    source: &ImageSource,
    connection_type: ConnectionType,
    progress: &mut dyn ProgressSink,
    config: &PipelineConfig,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<T, UpgradeError> {
    progress.display_status_text("Loading image...", false);
    let mut bundle = image::load(device, source, connection_type)?;

    progress.display_status_text("Checking compatibility...", false);
    compat::check(&bundle)?;
    progress.update(10, false);
    check_cancelled(is_cancelled)?;

    progress.display_status_text("Erasing flash...", false);
    erase_both_regions(&mut bundle, progress)?;
    verify::check_erase(&mut bundle)?;
    progress.update(30, false);
    check_cancelled(is_cancelled)?;

    progress.display_status_text("Writing image...", false);
    write_image(&mut bundle, config, progress)?;
    progress.update(85, false);
    check_cancelled(is_cancelled)?;

    progress.display_status_text("Writing image info...", false);
    write_image_info(&mut bundle, config, progress)?;
    progress.update(90, false);

    if config.verify_image {
        progress.display_status_text("Verifying written image...", false);
        verify::check_image(&mut bundle)?;
    }

    progress.display_status_text("Restarting device...", false);
    reboot::reboot_and_wait(&mut bundle, config, is_cancelled)?;

    progress.display_status_text("Confirming version...", false);
    version::confirm(&mut bundle)?;
    progress.update(100, true);

    info!("upgrade of device {:#010X} complete", bundle.target_serial);
    Ok(bundle.device.expect("device reopened by reboot::reboot_and_wait"))
}

fn erase_both_regions<T: RegisterTransport>(bundle: &mut FirmwareBundle<T>, progress: &mut dyn ProgressSink) -> Result<(), UpgradeError> {
    let image_pages = flash::pages_for(&IMAGE_REGION, bundle.image.len());
    let info_pages = flash::pages_for(&IMAGE_INFO_REGION, crate::image::HEADER_SIZE);
    let device = bundle.device.as_mut().expect("device open during erase");
    flash::erase_region(device, &IMAGE_REGION, Stage::EraseImage, image_pages, progress, ProgressRange::new(10, 28))?;
    flash::erase_region(device, &IMAGE_INFO_REGION, Stage::EraseImageInfo, info_pages, progress, ProgressRange::new(28, 30))
}

fn write_image<T: RegisterTransport>(
    bundle: &mut FirmwareBundle<T>,
    config: &PipelineConfig,
    progress: &mut dyn ProgressSink,
) -> Result<(), UpgradeError> {
    let mut device = bundle.device.take().expect("device open during write");
    let result = flash::write_region(
        &mut device,
        &IMAGE_REGION,
        Stage::WriteImage,
        &bundle.image,
        config.flash_block_size,
        progress,
        ProgressRange::new(30, 85),
    );
    bundle.device = Some(device);
    result
}

fn write_image_info<T: RegisterTransport>(
    bundle: &mut FirmwareBundle<T>,
    config: &PipelineConfig,
    progress: &mut dyn ProgressSink,
) -> Result<(), UpgradeError> {
    let info_bytes = encode_image_info(bundle);
    let mut device = bundle.device.take().expect("device open during write");
    let result = flash::write_region(
        &mut device,
        &IMAGE_INFO_REGION,
        Stage::WriteImageInfo,
        &info_bytes,
        config.flash_block_size,
        progress,
        ProgressRange::new(85, 90),
    );
    bundle.device = Some(device);
    result
}

/// Re-encodes the 128-byte header that was parsed out of the source file,
/// since `bundle.image` holds only the payload bytes after it.
fn encode_image_info<T: RegisterTransport>(bundle: &FirmwareBundle<T>) -> Vec<u8> {
    let header = &bundle.header;
    let mut bytes = vec![0u8; image::HEADER_SIZE];
    bytes[0..4].copy_from_slice(&header.header_code.to_be_bytes());
    bytes[4..8].copy_from_slice(&header.intended_device.to_be_bytes());
    bytes[8..12].copy_from_slice(&header.contained_version.to_bits().to_be_bytes());
    bytes[12..16].copy_from_slice(&header.required_upgrader_version.to_bits().to_be_bytes());
    bytes[16..18].copy_from_slice(&header.image_number.to_be_bytes());
    bytes[18..20].copy_from_slice(&header.num_images_in_file.to_be_bytes());
    bytes[20..24].copy_from_slice(&header.start_of_next_image.to_be_bytes());
    bytes[24..28].copy_from_slice(&header.length_of_image.to_be_bytes());
    bytes[28..32].copy_from_slice(&header.image_offset.to_be_bytes());
    bytes[32..36].copy_from_slice(&header.sha_byte_count.to_be_bytes());
    bytes[72..76].copy_from_slice(&header.options.to_be_bytes());
    bytes
}

fn check_cancelled(is_cancelled: &dyn Fn() -> bool) -> Result<(), UpgradeError> {
    if is_cancelled() {
        return Err(UpgradeError::Cancelled);
    }
    Ok(())
}
