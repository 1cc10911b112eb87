//! End-to-end pipeline tests against an in-memory mock device.
//!
//! `MockTransport` models the flash array and register file in-process so
//! the full `update_firmware` orchestration can be exercised without any
//! real USB or TCP device.
//!
//! Each test gets its own serial number and its own entry in a global
//! registry, so tests running concurrently (the `cargo test` default)
//! never see each other's flash state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use t7_upgrade::error::{TransportError, UpgradeError};
use t7_upgrade::image::ImageSource;
use t7_upgrade::pipeline::{update_firmware, PipelineConfig};
use t7_upgrade::progress::NullProgressSink;
use t7_upgrade::transport::{ConnectionType, DeviceFamily, Direction, RegisterFrame, RegisterTransport, T7_FAMILY};

const IMAGE_INFO_BASE: u32 = 0x000F_0000;
const FIRMWARE_VERSION_REGISTER: u32 = 0xF000_0014;
const ERASE_REGISTER: u32 = 0xF000_0008;
const REBOOT_REGISTER: u32 = 0xF000_0010;

static NEXT_SERIAL: AtomicU32 = AtomicU32::new(0x1000);

#[derive(Clone, Copy, Debug)]
enum EnumerationScript {
    /// Device comes back immediately with the expected serial.
    Immediate,
    /// Device never comes back; every poll returns empty.
    NeverReturns,
}

#[derive(Debug)]
struct DeviceState {
    flash: HashMap<u32, u32>,
    reported_version_bits: u32,
    script: EnumerationScript,
    /// Fails the N-th `rw_many` write call with a transport error, to
    /// simulate a chunk failing partway through a write.
    fail_write_call: Option<usize>,
    write_calls: usize,
    /// Set if the reboot register is ever written, so tests can assert a
    /// reboot was never attempted.
    reboot_register_written: bool,
}

fn registry() -> &'static Mutex<HashMap<u32, Arc<Mutex<DeviceState>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u32, Arc<Mutex<DeviceState>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A register-addressed flash device backed by a per-serial entry in
/// [`registry`], so the pre-reboot and post-reboot handles created by
/// `reboot_and_wait`'s close-then-reopen share the same simulated flash.
#[derive(Debug)]
struct MockTransport {
    serial: u32,
    state: Arc<Mutex<DeviceState>>,
}

impl MockTransport {
    fn fresh(script: EnumerationScript, reported_version: f32) -> Self {
        Self::fresh_with_write_failure(script, reported_version, None)
    }

    fn fresh_with_write_failure(script: EnumerationScript, reported_version: f32, fail_write_call: Option<usize>) -> Self {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(Mutex::new(DeviceState {
            flash: HashMap::new(),
            reported_version_bits: reported_version.to_bits(),
            script,
            fail_write_call,
            write_calls: 0,
            reboot_register_written: false,
        }));
        registry().lock().unwrap().insert(serial, Arc::clone(&state));
        MockTransport { serial, state }
    }
}

impl RegisterTransport for MockTransport {
    fn read_register(&mut self, address: u32) -> Result<u32, TransportError> {
        let state = self.state.lock().unwrap();
        if address == FIRMWARE_VERSION_REGISTER {
            return Ok(state.reported_version_bits);
        }
        Ok(state.flash.get(&address).copied().unwrap_or(0xFFFF_FFFF))
    }

    fn write_register(&mut self, address: u32, value: u32) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if address == REBOOT_REGISTER {
            state.reboot_register_written = true;
        }
        if address == ERASE_REGISTER {
            let page_size = if value < IMAGE_INFO_BASE { 0x0001_0000 } else { 0x0000_1000 };
            for offset in (0..page_size).step_by(4) {
                state.flash.insert(value + offset, 0xFFFF_FFFF);
            }
        }
        Ok(())
    }

    fn rw_many(&mut self, frame: &RegisterFrame, write_data: Option<&[u32]>) -> Result<Vec<u32>, TransportError> {
        let mut state = self.state.lock().unwrap();
        match frame.direction {
            Direction::Write => {
                let call = state.write_calls;
                state.write_calls += 1;
                if state.fail_write_call == Some(call) {
                    return Err(TransportError::Timeout);
                }
                let data = write_data.ok_or(TransportError::InvalidFrame)?;
                for (i, word) in data.iter().enumerate() {
                    state.flash.insert(frame.pointer_value + (i as u32) * 4, *word);
                }
                Ok(Vec::new())
            }
            Direction::Read => Ok((0..frame.count)
                .map(|i| state.flash.get(&(frame.pointer_value + i * 4)).copied().unwrap_or(0xFFFF_FFFF))
                .collect()),
        }
    }

    fn enumerate(_family: DeviceFamily, _connection: ConnectionType) -> Result<Vec<u32>, TransportError> {
        // Every device currently registered reports its own script; the
        // pipeline filters by target_serial, so returning every serial
        // whose script says "present" is sufficient for these tests.
        let registry = registry().lock().unwrap();
        Ok(registry
            .iter()
            .filter(|(_, state)| matches!(state.lock().unwrap().script, EnumerationScript::Immediate))
            .map(|(serial, _)| *serial)
            .collect())
    }

    fn open(_family: DeviceFamily, _connection: ConnectionType, serial: u32) -> Result<Self, TransportError> {
        let state = registry().lock().unwrap().get(&serial).cloned().ok_or(TransportError::NotFound(serial))?;
        Ok(MockTransport { serial, state })
    }

    fn close(self) -> Result<(), TransportError> {
        Ok(())
    }

    fn identifier(&self) -> String {
        format!("mock:{:#010X}", self.serial)
    }

    fn serial(&self) -> u32 {
        self.serial
    }
}

fn sample_image(contained_version: f32, intended_device: u32, header_code: u32, payload_len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; 128 + payload_len];
    bytes[0..4].copy_from_slice(&header_code.to_be_bytes());
    bytes[4..8].copy_from_slice(&intended_device.to_be_bytes());
    bytes[8..12].copy_from_slice(&contained_version.to_bits().to_be_bytes());
    for (i, byte) in bytes[128..].iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    bytes
}

/// Writes `bytes` under a directory unique to this call, so concurrent
/// tests never collide, while leaving `name` itself untouched — the
/// pipeline reads the firmware version out of the filename.
fn write_temp_image(name: &str, bytes: &[u8]) -> std::path::PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let dir = std::env::temp_dir().join(format!("t7-upgrade-test-{}-{}", std::process::id(), COUNTER.fetch_add(1, Ordering::SeqCst)));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        enumeration_timeout: Duration::from_millis(200),
        enumeration_poll_interval: Duration::from_millis(5),
        ..PipelineConfig::default()
    }
}

#[test]
fn successful_upgrade_reaches_one_hundred_percent() {
    let bytes = sample_image(1.0290, 7, T7_FAMILY.0, 4096);
    let path = write_temp_image("t7firmware_10290_ok.bin", &bytes);
    let source = ImageSource::Path(path);

    let device = MockTransport::fresh(EnumerationScript::Immediate, 1.0290);
    let mut sink = NullProgressSink;
    let result = update_firmware(device, &source, ConnectionType::Usb, &mut sink, &fast_config(), &|| false);
    assert!(result.is_ok(), "expected success, got {result:?}");
}

#[test]
fn version_disagreement_between_filename_and_header_is_rejected() {
    let bytes = sample_image(1.0300, 7, T7_FAMILY.0, 1024);
    let path = write_temp_image("t7firmware_10290_mismatch.bin", &bytes);
    let source = ImageSource::Path(path);

    let device = MockTransport::fresh(EnumerationScript::Immediate, 1.0290);
    let mut sink = NullProgressSink;
    let result = update_firmware(device, &source, ConnectionType::Usb, &mut sink, &fast_config(), &|| false);
    assert!(matches!(result, Err(UpgradeError::VersionDisagreement { .. })));
}

#[test]
fn wrong_family_magic_is_rejected_before_any_flash_io() {
    let bytes = sample_image(1.0290, 7, 0xDEAD_BEEF, 1024);
    let path = write_temp_image("t7firmware_10290_wrongfamily.bin", &bytes);
    let source = ImageSource::Path(path);

    let device = MockTransport::fresh(EnumerationScript::Immediate, 1.0290);
    let mut sink = NullProgressSink;
    let result = update_firmware(device, &source, ConnectionType::Usb, &mut sink, &fast_config(), &|| false);
    assert!(matches!(result, Err(UpgradeError::Incompatible(_))));
}

#[test]
fn unsupported_device_type_is_rejected() {
    let bytes = sample_image(1.0290, 99, T7_FAMILY.0, 1024);
    let path = write_temp_image("t7firmware_10290_baddevice.bin", &bytes);
    let source = ImageSource::Path(path);

    let device = MockTransport::fresh(EnumerationScript::Immediate, 1.0290);
    let mut sink = NullProgressSink;
    let result = update_firmware(device, &source, ConnectionType::Usb, &mut sink, &fast_config(), &|| false);
    assert!(matches!(result, Err(UpgradeError::Incompatible(_))));
}

#[test]
fn enumeration_timeout_surfaces_as_its_own_error() {
    let bytes = sample_image(1.0290, 7, T7_FAMILY.0, 512);
    let path = write_temp_image("t7firmware_10290_timeout.bin", &bytes);
    let source = ImageSource::Path(path);

    let device = MockTransport::fresh(EnumerationScript::NeverReturns, 1.0290);
    let mut sink = NullProgressSink;
    let result = update_firmware(device, &source, ConnectionType::Usb, &mut sink, &fast_config(), &|| false);
    assert!(matches!(result, Err(UpgradeError::EnumerationTimeout)));
}

#[test]
fn cancellation_before_erase_aborts_without_touching_flash() {
    let bytes = sample_image(1.0290, 7, T7_FAMILY.0, 512);
    let path = write_temp_image("t7firmware_10290_cancel.bin", &bytes);
    let source = ImageSource::Path(path);

    let device = MockTransport::fresh(EnumerationScript::Immediate, 1.0290);
    let mut sink = NullProgressSink;
    let result = update_firmware(device, &source, ConnectionType::Usb, &mut sink, &fast_config(), &|| true);
    assert!(matches!(result, Err(UpgradeError::Cancelled)));
}

#[test]
fn mid_write_chunk_failure_aborts_before_any_reboot_attempt() {
    // 4096-byte payload / 128-word (512-byte) chunks = 8 write chunks for
    // the image region; fail the 4th so the failure is mid-write, not on
    // the first or last chunk.
    let bytes = sample_image(1.0290, 7, T7_FAMILY.0, 4096);
    let path = write_temp_image("t7firmware_10290_chunkfail.bin", &bytes);
    let source = ImageSource::Path(path);

    let device = MockTransport::fresh_with_write_failure(EnumerationScript::Immediate, 1.0290, Some(3));
    let serial = device.serial;
    let mut sink = NullProgressSink;
    let result = update_firmware(device, &source, ConnectionType::Usb, &mut sink, &fast_config(), &|| false);

    match result {
        Err(UpgradeError::FlashIoError { chunk, .. }) => assert_eq!(chunk, 3),
        other => panic!("expected FlashIoError, got {other:?}"),
    }

    let state = registry().lock().unwrap().get(&serial).cloned().unwrap();
    assert!(!state.lock().unwrap().reboot_register_written, "reboot must not be attempted after a failed write");
}
