// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Compatibility checker (spec.md §4.2).

use log::info;

use crate::error::{IncompatibleReason, UpgradeError};
use crate::image::Header;
use crate::transport::{DeviceFamily, RegisterTransport};

/// Family magic every valid T7 image header must declare.
pub const EXPECTED_FAMILY_MAGIC: u32 = DeviceFamily(0x5437_0000).0;

/// Device variants this upgrader is allowed to flash.
pub const ALLOWED_DEVICE_TYPES: &[u32] = &[7, 8];

/// Runs the three compatibility predicates from spec.md §4.2. All three
/// must hold; the first failure found is returned.
///
/// # Errors
///
/// Returns [`UpgradeError::Incompatible`] naming the specific predicate
/// that failed, so the pipeline can report which check rejected the image.
pub fn check<T: RegisterTransport>(bundle: &crate::image::FirmwareBundle<T>) -> Result<(), UpgradeError> {
    check_header(&bundle.header, bundle.firmware_version)
}

fn check_header(header: &Header, bundle_version: f32) -> Result<(), UpgradeError> {
    if header.header_code != EXPECTED_FAMILY_MAGIC {
        return Err(IncompatibleReason::Family {
            found: header.header_code,
            expected: EXPECTED_FAMILY_MAGIC,
        }
        .into());
    }

    if !ALLOWED_DEVICE_TYPES.contains(&header.intended_device) {
        return Err(IncompatibleReason::Device(header.intended_device).into());
    }

    if (header.contained_version - bundle_version).abs() >= 1e-4 {
        return Err(IncompatibleReason::Version {
            header: header.contained_version,
            bundle: bundle_version,
        }
        .into());
    }

    info!("compatibility check passed for firmware version {bundle_version:.4}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(header_code: u32, intended_device: u32, contained_version: f32) -> Header {
        Header {
            header_code,
            intended_device,
            contained_version,
            required_upgrader_version: 0.0,
            image_number: 0,
            num_images_in_file: 1,
            start_of_next_image: 0,
            length_of_image: 0,
            image_offset: 0,
            sha_byte_count: 0,
            options: 0,
        }
    }

    #[test]
    fn accepts_matching_header() {
        let h = header(EXPECTED_FAMILY_MAGIC, 7, 1.0290);
        assert!(check_header(&h, 1.0290).is_ok());
    }

    #[test]
    fn rejects_wrong_family() {
        let h = header(0xDEAD_BEEF, 7, 1.0290);
        assert!(matches!(
            check_header(&h, 1.0290),
            Err(UpgradeError::Incompatible(IncompatibleReason::Family { .. }))
        ));
    }

    #[test]
    fn rejects_wrong_device() {
        let h = header(EXPECTED_FAMILY_MAGIC, 9, 1.0290);
        assert!(matches!(
            check_header(&h, 1.0290),
            Err(UpgradeError::Incompatible(IncompatibleReason::Device(9)))
        ));
    }

    #[test]
    fn rejects_version_mismatch() {
        let h = header(EXPECTED_FAMILY_MAGIC, 7, 1.0300);
        assert!(matches!(
            check_header(&h, 1.0290),
            Err(UpgradeError::Incompatible(IncompatibleReason::Version { .. }))
        ));
    }
}
