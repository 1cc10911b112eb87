// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Reboot request and post-reboot re-enumeration (spec.md §4.6).
//!
//! Requests a reboot, then reconnects: the reconnect loop is built in
//! rather than left to the caller, since the device is expected to vanish
//! from the bus and come back under the same serial.

use std::thread::sleep;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::UpgradeError;
use crate::image::FirmwareBundle;
use crate::pipeline::PipelineConfig;
use crate::transport::RegisterTransport;

/// Register that requests a device reboot when written with any value.
const REBOOT_REGISTER: u32 = 0xF000_0010;

/// Requests a reboot, closes the handle, and blocks until the device
/// re-enumerates with the same serial number, reopening it in place.
///
/// Per spec.md's resolved open question, failures closing the pre-reboot
/// handle are logged and swallowed rather than propagated — the device is
/// about to disappear from the bus regardless.
///
/// # Errors
///
/// Returns [`UpgradeError::EnumerationTimeout`] if the device does not
/// reappear within `config.enumeration_timeout`, or
/// [`UpgradeError::Cancelled`] if `is_cancelled` returns `true` mid-poll.
pub fn reboot_and_wait<T: RegisterTransport>(
    bundle: &mut FirmwareBundle<T>,
    config: &PipelineConfig,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<(), UpgradeError> {
    let mut device = bundle.device.take().expect("device open before reboot");

    if let Err(error) = device.write_register(REBOOT_REGISTER, 1) {
        warn!("reboot request write failed (device may already be resetting): {error}");
    }

    if let Err(error) = device.close() {
        warn!("closing pre-reboot handle failed, continuing anyway: {error}");
    }

    info!("waiting for device {:#010X} to re-enumerate", bundle.target_serial);
    let deadline = Instant::now() + config.enumeration_timeout;
    sleep(config.enumeration_poll_interval);

    loop {
        if is_cancelled() {
            return Err(UpgradeError::Cancelled);
        }

        let present = T::enumerate(crate::transport::T7_FAMILY, bundle.connection_type)
            .unwrap_or_default()
            .contains(&bundle.target_serial);

        if present {
            match T::open(crate::transport::T7_FAMILY, bundle.connection_type, bundle.target_serial) {
                Ok(reopened) => {
                    info!("device {:#010X} re-enumerated", bundle.target_serial);
                    bundle.device = Some(reopened);
                    return Ok(());
                }
                Err(error) => {
                    warn!("device {:#010X} enumerated but reopen failed, retrying: {error}", bundle.target_serial);
                }
            }
        }

        if Instant::now() >= deadline {
            return Err(UpgradeError::EnumerationTimeout);
        }

        sleep(config.enumeration_poll_interval);
    }
}
