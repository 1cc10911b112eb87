// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! USB-HID register transport.
//!
//! Each transaction is a fixed-size HID report, report ID selecting the
//! operation. There are four: register read, register write, and the two
//! halves of a compound `rw_many` frame.

use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use log::{debug, info};

use crate::error::TransportError;

use super::{ConnectionType, DeviceFamily, Direction, RegisterFrame, RegisterTransport};

/// Report IDs for the T7 USB-HID register protocol.
mod report {
    /// Host -> device: read/write a single register.
    pub const REG_ACCESS: u8 = 0x10;
    /// Host -> device: compound pointer+key+data frame.
    pub const RW_MANY: u8 = 0x11;
    /// Device -> host: response to either of the above.
    pub const RESPONSE: u8 = 0x12;
}

const MAX_REPORT_SIZE: usize = 1024;

#[derive(Debug)]
pub struct UsbTransport {
    device: HidDevice,
    serial: u32,
    timeout_ms: i32,
}

impl RegisterTransport for UsbTransport {
    fn read_register(&mut self, address: u32) -> Result<u32, TransportError> {
        let mut report = vec![0u8; 10];
        report[0] = report::REG_ACCESS;
        report[1] = 0; // read
        report[2..6].copy_from_slice(&address.to_be_bytes());
        self.write_report(&report)?;

        let response = self.read_response()?;
        Ok(u32::from_be_bytes(response[0..4].try_into().or(Err(TransportError::InvalidFrame))?))
    }

    fn write_register(&mut self, address: u32, value: u32) -> Result<(), TransportError> {
        let mut report = vec![0u8; 10];
        report[0] = report::REG_ACCESS;
        report[1] = 1; // write
        report[2..6].copy_from_slice(&address.to_be_bytes());
        report[6..10].copy_from_slice(&value.to_be_bytes());
        self.write_report(&report)?;
        self.read_response()?;
        Ok(())
    }

    fn rw_many(&mut self, frame: &RegisterFrame, write_data: Option<&[u32]>) -> Result<Vec<u32>, TransportError> {
        let count = frame.count as usize;
        let mut payload = Vec::with_capacity(4 + 4 + 4 + count * 4);
        payload.extend_from_slice(&frame.pointer_register.to_be_bytes());
        payload.extend_from_slice(&frame.pointer_value.to_be_bytes());
        if let Some((key_reg, key_val)) = frame.key {
            payload.extend_from_slice(&key_reg.to_be_bytes());
            payload.extend_from_slice(&key_val.to_be_bytes());
        }
        payload.extend_from_slice(&frame.data_register.to_be_bytes());
        payload.extend_from_slice(&u32::from(matches!(frame.direction, Direction::Write)).to_be_bytes());
        payload.extend_from_slice(&frame.count.to_be_bytes());
        if let Direction::Write = frame.direction {
            let data = write_data.ok_or(TransportError::InvalidFrame)?;
            for word in data {
                payload.extend_from_slice(&word.to_be_bytes());
            }
        }

        let mut report = vec![report::RW_MANY];
        report.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        report.extend(payload);
        self.write_report(&report)?;

        if let Direction::Read = frame.direction {
            let response = self.read_response()?;
            if response.len() < count * 4 {
                return Err(TransportError::InvalidFrame);
            }
            Ok(response[..count * 4]
                .chunks_exact(4)
                .map(|w| u32::from_be_bytes(w.try_into().expect("chunks_exact(4) yields 4-byte slices")))
                .collect())
        } else {
            self.read_response()?;
            Ok(Vec::new())
        }
    }

    fn enumerate(family: DeviceFamily, connection: ConnectionType) -> Result<Vec<u32>, TransportError> {
        if connection == ConnectionType::Ethernet {
            return Ok(Vec::new());
        }
        let api = HidApi::new().map_err(TransportError::Hid)?;
        let serials = api
            .device_list()
            .filter(|info| u32::from(info.vendor_id()) << 16 | u32::from(info.product_id()) == family.0)
            .filter_map(|info| info.serial_number())
            .filter_map(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .collect();
        Ok(serials)
    }

    fn open(family: DeviceFamily, connection: ConnectionType, serial: u32) -> Result<Self, TransportError> {
        if connection == ConnectionType::Ethernet {
            return Err(TransportError::NotFound(serial));
        }
        let vid = (family.0 >> 16) as u16;
        let pid = family.0 as u16;
        let api = HidApi::new().map_err(TransportError::Hid)?;
        let device = api.open_serial(vid, pid, &format!("{serial:08X}")).map_err(TransportError::Hid)?;
        info!("opened USB T7 device, serial {serial:#010X}");
        Ok(UsbTransport {
            device,
            serial,
            timeout_ms: 5000,
        })
    }

    fn close(self) -> Result<(), TransportError> {
        // hidapi closes on drop; nothing to flush explicitly.
        drop(self);
        Ok(())
    }

    fn identifier(&self) -> String {
        format!("usb:{:#010X}", self.serial)
    }

    fn serial(&self) -> u32 {
        self.serial
    }
}

impl UsbTransport {
    /// Open with an explicit timeout, used by the pipeline when the caller
    /// overrides defaults. Not part of the trait so callers needing this
    /// must downcast to the concrete type rather than go through
    /// `RegisterTransport::open`.
    pub fn open_with_timeout(
        family: DeviceFamily,
        serial: u32,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut transport = Self::open(family, ConnectionType::Usb, serial)?;
        transport.timeout_ms = timeout.as_millis().try_into().unwrap_or(i32::MAX);
        Ok(transport)
    }

    fn write_report(&self, report: &[u8]) -> Result<(), TransportError> {
        debug!("TX: {report:02X?}");
        self.device.write(report).map_err(TransportError::Hid)?;
        Ok(())
    }

    fn read_response(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; MAX_REPORT_SIZE];
        let size = self.device.read_timeout(&mut buf, self.timeout_ms).map_err(TransportError::Hid)?;
        if size < 1 || buf[0] != report::RESPONSE {
            return Err(TransportError::InvalidFrame);
        }
        debug!("RX: {:02X?}", &buf[..size]);
        Ok(buf[1..size].to_vec())
    }
}
