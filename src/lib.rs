// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Firmware upgrade pipeline for the T7 family of USB/Ethernet
//! data-acquisition devices.
//!
//! [`pipeline::update_firmware`] is the entry point: given an open
//! [`transport::RegisterTransport`] and an [`image::ImageSource`], it
//! flashes the image into external flash, reboots the device, and
//! confirms re-enumeration at the new firmware version.

pub mod compat;
pub mod error;
pub mod flash;
pub mod formatters;
pub mod image;
pub mod pipeline;
pub mod progress;
pub mod reboot;
pub mod transport;
pub mod verify;
pub mod version;

pub use error::UpgradeError;
pub use image::{FirmwareBundle, ImageSource};
pub use pipeline::{update_firmware, PipelineConfig};
pub use progress::{ProgressRange, ProgressSink};
pub use transport::{ConnectionType, RegisterTransport, T7_FAMILY};
