// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Post-reboot version confirmation (spec.md §4.7).

use log::info;

use crate::error::UpgradeError;
use crate::image::FirmwareBundle;
use crate::transport::RegisterTransport;

/// Register reporting the currently-running firmware version, encoded as
/// an IEEE-754 big-endian `f32` the same way the image header's
/// `containedVersion` field is.
const FIRMWARE_VERSION_REGISTER: u32 = 0xF000_0014;

/// Reads back the reopened device's reported firmware version and
/// confirms it matches the version that was just flashed.
///
/// # Errors
///
/// Returns [`UpgradeError::VersionMismatch`] if the reported version
/// differs from `bundle.firmware_version` by four-decimal precision or
/// more.
pub fn confirm<T: RegisterTransport>(bundle: &mut FirmwareBundle<T>) -> Result<(), UpgradeError> {
    let device = bundle.device.as_mut().expect("device reopened before version confirmation");
    let raw = device.read_register(FIRMWARE_VERSION_REGISTER)?;
    let reported = f32::from_bits(raw);

    if (reported - bundle.firmware_version).abs() >= 1e-4 {
        return Err(UpgradeError::VersionMismatch {
            expected: bundle.firmware_version,
            got: reported,
        });
    }

    info!("device confirms firmware version {reported:.4}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{ConnectionType, DeviceFamily, RegisterFrame};

    #[derive(Debug)]
    struct FixedVersionTransport {
        version_bits: u32,
    }

    impl RegisterTransport for FixedVersionTransport {
        fn read_register(&mut self, address: u32) -> Result<u32, TransportError> {
            assert_eq!(address, FIRMWARE_VERSION_REGISTER);
            Ok(self.version_bits)
        }
        fn write_register(&mut self, _address: u32, _value: u32) -> Result<(), TransportError> {
            Ok(())
        }
        fn rw_many(&mut self, _frame: &RegisterFrame, _write_data: Option<&[u32]>) -> Result<Vec<u32>, TransportError> {
            Ok(Vec::new())
        }
        fn enumerate(_family: DeviceFamily, _connection: ConnectionType) -> Result<Vec<u32>, TransportError> {
            Ok(Vec::new())
        }
        fn open(_family: DeviceFamily, _connection: ConnectionType, _serial: u32) -> Result<Self, TransportError> {
            Ok(FixedVersionTransport { version_bits: 0 })
        }
        fn close(self) -> Result<(), TransportError> {
            Ok(())
        }
        fn identifier(&self) -> String {
            "fixed".to_owned()
        }
        fn serial(&self) -> u32 {
            0
        }
    }

    fn bundle_with(version_bits: u32, firmware_version: f32) -> FirmwareBundle<FixedVersionTransport> {
        FirmwareBundle {
            image: vec![].into_boxed_slice(),
            header: crate::image::Header {
                header_code: 0,
                intended_device: 0,
                contained_version: 0.0,
                required_upgrader_version: 0.0,
                image_number: 0,
                num_images_in_file: 1,
                start_of_next_image: 0,
                length_of_image: 0,
                image_offset: 0,
                sha_byte_count: 0,
                options: 0,
            },
            firmware_version,
            device: Some(FixedVersionTransport { version_bits }),
            target_serial: 0,
            connection_type: ConnectionType::Usb,
        }
    }

    #[test]
    fn matching_version_confirms() {
        let mut bundle = bundle_with(1.0290f32.to_bits(), 1.0290);
        assert!(confirm(&mut bundle).is_ok());
    }

    #[test]
    fn mismatched_version_fails() {
        let mut bundle = bundle_with(1.0300f32.to_bits(), 1.0290);
        assert!(matches!(confirm(&mut bundle), Err(UpgradeError::VersionMismatch { .. })));
    }
}
