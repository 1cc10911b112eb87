// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Register-addressed transport abstraction.
//!
//! A single trait every physical medium (USB, Ethernet) implements, so
//! the flash-protocol driver in [`crate::flash`] never has to know which
//! wire it's talking over.
//!
//! The wire-level contract, from spec.md §6.2, is a compound frame of the
//! form `[write ptr] [write key (optional)] [read|write data x N]`, issued
//! as a single atomic transaction per chunk.

pub mod ethernet;
pub mod usb;

use std::fmt::Debug;

use crate::error::TransportError;

/// Which physical bus a device is reachable on, or `Any` to match either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// USB-HID.
    Usb,
    /// TCP/Ethernet.
    Ethernet,
    /// Match devices on either bus during enumeration.
    Any,
}

/// Identifies the T7 device family for enumeration/open calls.
///
/// Static for now (only one family is modeled), kept as a type rather than
/// a bare constant so the transport trait's signature matches what a
/// multi-family driver would need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFamily(pub u32);

/// The T7 device family identifier.
pub const T7_FAMILY: DeviceFamily = DeviceFamily(0x5437_0000);

/// Direction of a flash data-register access within a compound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read words from the data register into the host buffer.
    Read,
    /// Write words from the host buffer into the data register.
    Write,
}

/// One compound register transaction, per spec.md §6.2/§4.3:
/// write the pointer register, optionally write a permission key, then
/// read or write `count` words against the data register.
#[derive(Debug, Clone, Copy)]
pub struct RegisterFrame {
    /// Address written to the pointer register before the data phase.
    pub pointer_value: u32,
    /// Address of the pointer register.
    pub pointer_register: u32,
    /// Address of the data register.
    pub data_register: u32,
    /// Permission key to write before the data phase, if the region requires one.
    pub key: Option<(u32, u32)>,
    /// Read or write.
    pub direction: Direction,
    /// Number of 32-bit words to transfer in the data phase.
    pub count: u32,
}

/// Core transport trait implemented by each physical medium.
///
/// # Errors
///
/// Every method returns [`TransportError`]; implementations should not
/// retry internally — retry policy belongs to the caller (see
/// [`crate::flash::flash_op`], which never retries a failed chunk).
pub trait RegisterTransport: Debug {
    /// Read a single register.
    fn read_register(&mut self, address: u32) -> Result<u32, TransportError>;

    /// Write a single register.
    fn write_register(&mut self, address: u32, value: u32) -> Result<(), TransportError>;

    /// Issue one compound frame and return the words read (empty on write).
    fn rw_many(&mut self, frame: &RegisterFrame, write_data: Option<&[u32]>) -> Result<Vec<u32>, TransportError>;

    /// List serial numbers of devices of `family` visible on `connection`.
    fn enumerate(family: DeviceFamily, connection: ConnectionType) -> Result<Vec<u32>, TransportError>
    where
        Self: Sized;

    /// Open a specific device by (family, connection, serial).
    fn open(family: DeviceFamily, connection: ConnectionType, serial: u32) -> Result<Self, TransportError>
    where
        Self: Sized;

    /// Release the device. Implementations should make a best effort but
    /// the caller treats failures here as non-fatal (spec.md §4.6 step 2).
    fn close(self) -> Result<(), TransportError>
    where
        Self: Sized;

    /// Human-readable identifier for logging (serial, path, or address).
    fn identifier(&self) -> String;

    /// Serial number of the open device, as reported at open time.
    fn serial(&self) -> u32;
}
