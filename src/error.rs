// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Error taxonomy for the T7 upgrade pipeline.
//!
//! Every stage of the pipeline surfaces its first failure as-is; the sole
//! exception is the close-before-reboot transition, whose errors are
//! logged and swallowed (see [`crate::reboot`]).

use crate::flash::Stage;

/// Errors that can occur while upgrading a T7 device's firmware.
#[derive(thiserror::Error, Debug)]
pub enum UpgradeError {
    /// The image file is shorter than the 128-byte header.
    #[error("image is too short to contain a valid header ({0} bytes)")]
    InvalidImage(usize),

    /// A header field could not be read or decoded.
    #[error("failed to parse image header: {0}")]
    ParseError(String),

    /// Fetching the image over HTTP(S) failed or returned a non-2xx status.
    #[error("failed to fetch image from {url}: {reason}")]
    FetchError {
        /// The URL that was requested.
        url: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The filename-derived version and the header's `containedVersion`
    /// disagree; the bundle is rejected before it ever reaches the device.
    #[error("filename implies firmware version {filename_version:.4} but header declares {header_version:.4}")]
    VersionDisagreement {
        /// Version parsed from the image filename.
        filename_version: f32,
        /// Version parsed from the header's `containedVersion` field.
        header_version: f32,
    },

    /// One of the three compatibility predicates failed.
    #[error("image is not compatible with the target device: {0}")]
    Incompatible(#[from] IncompatibleReason),

    /// A chunked flash read/write operation failed partway through.
    #[error("flash I/O failed during {stage:?}, chunk {chunk}: {cause}")]
    FlashIoError {
        /// Which façade operation was in progress.
        stage: Stage,
        /// Index of the chunk that failed.
        chunk: usize,
        /// Underlying transport error.
        #[source]
        cause: TransportError,
    },

    /// After erase, at least one word did not read back as `0xFFFFFFFF`.
    #[error("erase verification failed: word at offset {offset:#010X} reads {actual:#010X}, expected 0xFFFFFFFF")]
    EraseIncomplete {
        /// Byte offset, relative to the region's base address, of the first mismatching word.
        offset: u32,
        /// The value actually read back.
        actual: u32,
    },

    /// After write, a byte-for-byte comparison against the source image diverged.
    #[error("written image does not match source image at offset {offset}")]
    WriteMismatch {
        /// Byte offset of the first divergence.
        offset: usize,
    },

    /// The device did not reappear on the bus within the configured timeout.
    #[error("device did not re-enumerate within the timeout")]
    EnumerationTimeout,

    /// The device came back but reports an unexpected firmware version.
    #[error("device reports firmware version {got:.4}, expected {expected:.4}")]
    VersionMismatch {
        /// Version declared by the image that was just flashed.
        expected: f32,
        /// Version actually reported by the reopened device.
        got: f32,
    },

    /// The operation was cancelled via the cooperative cancellation signal.
    #[error("upgrade was cancelled")]
    Cancelled,

    /// A transport-level error not otherwise classified above.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Error while reading or writing a local file.
    #[error("file I/O error: {0}")]
    FileError(#[source] std::io::Error),
}

/// Which compatibility predicate (spec.md §4.2) was violated.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompatibleReason {
    /// `headerCode` did not match the expected family magic.
    #[error("header magic {found:#010X} does not match expected family magic {expected:#010X}")]
    Family {
        /// Value found in the header.
        found: u32,
        /// Expected family magic constant.
        expected: u32,
    },
    /// `intendedDevice` is not a member of the allowed device-type set.
    #[error("intended device {0} is not a supported T7 variant")]
    Device(u32),
    /// `containedVersion` does not equal the bundle's declared firmware version.
    #[error("header version {header:.4} does not match bundle version {bundle:.4}")]
    Version {
        /// Version declared in the header.
        header: f32,
        /// Version carried by the bundle (derived from the filename).
        bundle: f32,
    },
}

/// Errors raised by a [`crate::transport::RegisterTransport`] implementation.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// Error raised by the underlying HID library.
    #[error("USB-HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// General I/O error during a read/write over the transport.
    #[error("I/O error communicating with device")]
    Io(#[from] std::io::Error),

    /// The device responded with a malformed or truncated frame.
    #[error("malformed response frame from device")]
    InvalidFrame,

    /// No device matching the requested family/serial could be found.
    #[error("no device found matching serial {0:#010X}")]
    NotFound(u32),

    /// Operation timed out waiting for the device to respond.
    #[error("timeout waiting for device response")]
    Timeout,
}
