// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Firmware image loading and header parsing.
//!
//! Reads the file or URL body into memory, parses the structured
//! 128-byte header out of the front, and derives the declared version
//! from the filename for cross-checking against the header.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::UpgradeError;
use crate::transport::{ConnectionType, RegisterTransport};

/// Size in bytes of the fixed image header (spec.md §6.1).
pub const HEADER_SIZE: usize = 128;

/// Where to load a firmware image from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// A local filesystem path.
    Path(PathBuf),
    /// An HTTP(S) URL; the body is downloaded fully into memory.
    Url(String),
}

/// Parsed fields of the 128-byte image header (spec.md §6.1). All
/// multi-byte integers are big-endian.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    /// 32-bit constant identifying the firmware family.
    pub header_code: u32,
    /// Integer identifying which device variant this image targets.
    pub intended_device: u32,
    /// Declared firmware version, truncated to four decimal places when compared.
    pub contained_version: f32,
    /// Minimum upgrader version required to apply this image.
    pub required_upgrader_version: f32,
    /// Index of this image within a multi-image file.
    pub image_number: u16,
    /// Total number of images packed into this file.
    pub num_images_in_file: u16,
    /// Byte offset of the next image, for multi-image files.
    pub start_of_next_image: u32,
    /// Length of the image payload in bytes.
    pub length_of_image: u32,
    /// Offset of the image payload within the file.
    pub image_offset: u32,
    /// Number of bytes covered by the SHA fields.
    pub sha_byte_count: u32,
    /// Header option flags.
    pub options: u32,
}

impl Header {
    /// Parses the fixed-offset header fields from the first [`HEADER_SIZE`]
    /// bytes of an image file.
    ///
    /// # Errors
    ///
    /// Returns [`UpgradeError::InvalidImage`] if `bytes` is shorter than
    /// [`HEADER_SIZE`].
    pub fn parse(bytes: &[u8]) -> Result<Header, UpgradeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(UpgradeError::InvalidImage(bytes.len()));
        }

        let be_u32 = |offset: usize| -> u32 {
            u32::from_be_bytes(bytes[offset..offset + 4].try_into().expect("slice of len 4"))
        };
        let be_u16 = |offset: usize| -> u16 {
            u16::from_be_bytes(bytes[offset..offset + 2].try_into().expect("slice of len 2"))
        };
        let be_f32 = |offset: usize| -> f32 { f32::from_bits(be_u32(offset)) };

        Ok(Header {
            header_code: be_u32(0),
            intended_device: be_u32(4),
            contained_version: be_f32(8),
            required_upgrader_version: be_f32(12),
            image_number: be_u16(16),
            num_images_in_file: be_u16(18),
            start_of_next_image: be_u32(20),
            length_of_image: be_u32(24),
            image_offset: be_u32(28),
            sha_byte_count: be_u32(32),
            options: be_u32(72),
        })
    }
}

/// The unit of state carried through the upgrade pipeline (spec.md §3).
///
/// Created by [`load`], mutated once by re-enumeration (the `device`
/// field is replaced), and never shared across pipelines.
pub struct FirmwareBundle<T: RegisterTransport> {
    /// Raw image payload (file bytes after the 128-byte header), immutable after load.
    pub image: Box<[u8]>,
    /// Parsed header fields.
    pub header: Header,
    /// Declared firmware version, taken from the filename.
    pub firmware_version: f32,
    /// Open transport to the target device. `None` only during the brief
    /// window between closing the pre-reboot handle and successfully
    /// reopening the post-reboot one.
    pub device: Option<T>,
    /// Serial number captured before reboot, used to re-find the device.
    pub target_serial: u32,
    /// Connection type to search on when re-enumerating.
    pub connection_type: ConnectionType,
}

/// Loads an image from `source`, parses its header, and pairs it with an
/// already-open `device` to form a [`FirmwareBundle`].
///
/// # Errors
///
/// - [`UpgradeError::InvalidImage`] if the file is shorter than the header.
/// - [`UpgradeError::ParseError`] if the filename doesn't carry a version segment.
/// - [`UpgradeError::FetchError`] if `source` is a URL and the request fails or returns non-2xx.
/// - [`UpgradeError::VersionDisagreement`] if the filename-derived version and
///   the header's `containedVersion` disagree to three-decimal precision.
pub fn load<T: RegisterTransport>(
    device: T,
    source: &ImageSource,
    connection_type: ConnectionType,
) -> Result<FirmwareBundle<T>, UpgradeError> {
    let (name, bytes) = fetch(source)?;
    let header = Header::parse(&bytes)?;
    let firmware_version = version_from_filename(&name)?;

    if (firmware_version - header.contained_version).abs() >= 1e-3 {
        return Err(UpgradeError::VersionDisagreement {
            filename_version: firmware_version,
            header_version: header.contained_version,
        });
    }

    let target_serial = device.serial();
    info!(
        "loaded image '{name}': version {firmware_version:.4}, {} bytes of payload",
        bytes.len() - HEADER_SIZE
    );

    Ok(FirmwareBundle {
        image: bytes[HEADER_SIZE..].to_vec().into_boxed_slice(),
        header,
        firmware_version,
        device: Some(device),
        target_serial,
        connection_type,
    })
}

/// Reads the full file or URL body into memory, returning its display name
/// (used for version extraction) alongside the bytes.
fn fetch(source: &ImageSource) -> Result<(String, Vec<u8>), UpgradeError> {
    match source {
        ImageSource::Path(path) => {
            let bytes = std::fs::read(path).map_err(UpgradeError::FileError)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok((name, bytes))
        }
        ImageSource::Url(url) => {
            let response = reqwest::blocking::get(url).map_err(|e| UpgradeError::FetchError {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            if !response.status().is_success() {
                return Err(UpgradeError::FetchError {
                    url: url.clone(),
                    reason: format!("HTTP {}", response.status()),
                });
            }
            let bytes = response.bytes().map_err(|e| UpgradeError::FetchError {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            let name = Path::new(url)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok((name, bytes.to_vec()))
        }
    }
}

/// Extracts the firmware version from the segment between the first and
/// second underscore of `name`, e.g. `T7firmware_10290_2024.bin` -> `1.0290`.
fn version_from_filename(name: &str) -> Result<f32, UpgradeError> {
    let mut parts = name.splitn(3, '_');
    parts.next();
    let segment = parts
        .next()
        .ok_or_else(|| UpgradeError::ParseError(format!("filename '{name}' has no version segment")))?;
    let raw: u32 = segment
        .parse()
        .map_err(|_| UpgradeError::ParseError(format!("version segment '{segment}' is not an integer")))?;
    Ok(raw as f32 / 10000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header_bytes(header_code: u32, intended_device: u32, contained_version: f32) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE + 8];
        bytes[0..4].copy_from_slice(&header_code.to_be_bytes());
        bytes[4..8].copy_from_slice(&intended_device.to_be_bytes());
        bytes[8..12].copy_from_slice(&contained_version.to_bits().to_be_bytes());
        bytes
    }

    #[test]
    fn parses_fixed_offset_fields() {
        let bytes = sample_header_bytes(0x5437_0000, 7, 1.0290);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.header_code, 0x5437_0000);
        assert_eq!(header.intended_device, 7);
        assert!((header.contained_version - 1.0290).abs() < 1e-4);
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = vec![0u8; 64];
        assert!(matches!(Header::parse(&bytes), Err(UpgradeError::InvalidImage(64))));
    }

    #[test]
    fn version_from_filename_parses_middle_segment() {
        let version = version_from_filename("T7firmware_10290_release.bin").unwrap();
        assert!((version - 1.0290).abs() < 1e-4);
    }

    #[test]
    fn version_from_filename_rejects_missing_segment() {
        assert!(version_from_filename("noUnderscoresHere.bin").is_err());
    }
}
