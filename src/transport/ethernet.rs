// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Ethernet (TCP) register transport.
//!
//! The T7 family also exposes its register protocol over a raw TCP
//! connection; frames are the same logical shape as the USB transport's
//! but length-prefixed instead of HID-report-framed, since there's no
//! report-descriptor boundary to lean on.
//!
//! Enumeration has no bus-level device list the way USB-HID does, so it's
//! done with a UDP broadcast: a discovery packet goes out to the subnet
//! and any device of the right family replies with its serial and the
//! port it listens for register traffic on.

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use log::{debug, info, warn};

use crate::error::TransportError;

use super::{ConnectionType, DeviceFamily, Direction, RegisterFrame, RegisterTransport};

mod opcode {
    pub const READ_REGISTER: u8 = 0x20;
    pub const WRITE_REGISTER: u8 = 0x21;
    pub const RW_MANY: u8 = 0x22;
    pub const DISCOVER: u8 = 0x23;
}

/// Port devices listen for UDP discovery broadcasts on.
const DISCOVERY_PORT: u16 = 7001;
/// How long to keep collecting discovery replies after the broadcast.
const DISCOVERY_WINDOW: Duration = Duration::from_millis(500);
/// Timeout used when `open` reconnects to a discovered address directly.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct EthernetTransport {
    stream: TcpStream,
    serial: u32,
    address: String,
}

impl RegisterTransport for EthernetTransport {
    fn read_register(&mut self, address: u32) -> Result<u32, TransportError> {
        let mut frame = vec![opcode::READ_REGISTER];
        frame.extend_from_slice(&address.to_be_bytes());
        self.send_frame(&frame)?;
        let response = self.recv_frame()?;
        Ok(u32::from_be_bytes(response[0..4].try_into().or(Err(TransportError::InvalidFrame))?))
    }

    fn write_register(&mut self, address: u32, value: u32) -> Result<(), TransportError> {
        let mut frame = vec![opcode::WRITE_REGISTER];
        frame.extend_from_slice(&address.to_be_bytes());
        frame.extend_from_slice(&value.to_be_bytes());
        self.send_frame(&frame)?;
        self.recv_frame()?;
        Ok(())
    }

    fn rw_many(&mut self, frame: &RegisterFrame, write_data: Option<&[u32]>) -> Result<Vec<u32>, TransportError> {
        let mut payload = vec![opcode::RW_MANY];
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
        self.send_frame(&payload)?;

        if let Direction::Read = frame.direction {
            let response = self.recv_frame()?;
            let count = frame.count as usize;
            if response.len() < count * 4 {
                return Err(TransportError::InvalidFrame);
            }
            Ok(response[..count * 4]
                .chunks_exact(4)
                .map(|w| u32::from_be_bytes(w.try_into().expect("chunks_exact(4) yields 4-byte slices")))
                .collect())
        } else {
            self.recv_frame()?;
            Ok(Vec::new())
        }
    }

    fn enumerate(family: DeviceFamily, connection: ConnectionType) -> Result<Vec<u32>, TransportError> {
        if connection == ConnectionType::Usb {
            return Ok(Vec::new());
        }
        Ok(discover(family)?.into_iter().map(|(serial, _)| serial).collect())
    }

    fn open(family: DeviceFamily, connection: ConnectionType, serial: u32) -> Result<Self, TransportError> {
        if connection == ConnectionType::Usb {
            return Err(TransportError::NotFound(serial));
        }
        let addr = discover(family)?
            .into_iter()
            .find(|(found, _)| *found == serial)
            .map(|(_, addr)| addr)
            .ok_or(TransportError::NotFound(serial))?;
        EthernetTransport::connect(&addr.to_string(), serial, DEFAULT_CONNECT_TIMEOUT)
    }

    fn close(self) -> Result<(), TransportError> {
        self.stream.shutdown(std::net::Shutdown::Both).map_err(TransportError::Io)
    }

    fn identifier(&self) -> String {
        format!("eth:{} ({:#010X})", self.address, self.serial)
    }

    fn serial(&self) -> u32 {
        self.serial
    }
}

impl EthernetTransport {
    /// Connect directly by host:port and serial, bypassing enumeration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the TCP connection cannot be established.
    pub fn connect(address: &str, serial: u32, timeout: Duration) -> Result<Self, TransportError> {
        let socket_addr = address
            .to_socket_addrs()
            .map_err(TransportError::Io)?
            .next()
            .ok_or(TransportError::NotFound(serial))?;
        let stream = TcpStream::connect_timeout(&socket_addr, timeout).map_err(TransportError::Io)?;
        stream.set_read_timeout(Some(timeout)).map_err(TransportError::Io)?;
        info!("opened Ethernet T7 device at {address}, serial {serial:#010X}");
        Ok(EthernetTransport {
            stream,
            serial,
            address: address.to_owned(),
        })
    }

    fn send_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        debug!("TX: {payload:02X?}");
        let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).map_err(TransportError::Io)
    }

    fn recv_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).map_err(TransportError::Io)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).map_err(TransportError::Io)?;
        debug!("RX: {buf:02X?}");
        Ok(buf)
    }
}

/// Broadcasts a discovery packet on [`DISCOVERY_PORT`] and collects replies
/// for [`DISCOVERY_WINDOW`], returning each responding device's serial and
/// the address it can be reached on for register traffic.
///
/// Replies are `[serial: u32 BE][port: u16 BE]`; the device's IP comes from
/// the reply's source address.
fn discover(family: DeviceFamily) -> Result<Vec<(u32, SocketAddr)>, TransportError> {
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(TransportError::Io)?;
    socket.set_broadcast(true).map_err(TransportError::Io)?;
    socket.set_read_timeout(Some(DISCOVERY_WINDOW)).map_err(TransportError::Io)?;

    let mut packet = vec![opcode::DISCOVER];
    packet.extend_from_slice(&family.0.to_be_bytes());
    socket.send_to(&packet, (std::net::Ipv4Addr::BROADCAST, DISCOVERY_PORT)).map_err(TransportError::Io)?;

    let mut found = Vec::new();
    let mut buf = [0u8; 6];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((6, from)) => {
                let serial = u32::from_be_bytes(buf[0..4].try_into().expect("slice of len 4"));
                let port = u16::from_be_bytes(buf[4..6].try_into().expect("slice of len 2"));
                found.push((serial, SocketAddr::new(from.ip(), port)));
            }
            Ok(_) => {} // short reply, ignore
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => {
                warn!("discovery broadcast read failed: {e}");
                break;
            }
        }
    }
    debug!("discovered {} device(s) of family {:#010X}", found.len(), family.0);
    Ok(found)
}
