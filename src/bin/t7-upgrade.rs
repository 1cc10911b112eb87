// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Command-line front end for the T7 firmware upgrade pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use color_print::cstr;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn, LevelFilter};

use t7_upgrade::error::UpgradeError;
use t7_upgrade::formatters::{BinaryBytesOne, OnOffBool};
use t7_upgrade::progress::ProgressSink;
use t7_upgrade::transport::{ethernet::EthernetTransport, usb::UsbTransport, ConnectionType, RegisterTransport};
use t7_upgrade::{image::ImageSource, pipeline, T7_FAMILY};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Bus {
    Usb,
    Ethernet,
}

/// Flash a new firmware image into a T7 device and confirm it comes back up.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Which bus to reach the device on.
    #[arg(long, value_enum, default_value_t = Bus::Usb)]
    bus: Bus,

    /// Serial number of the target device (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_serial)]
    serial: u32,

    /// Ethernet host:port to connect to. Required when `--bus ethernet`.
    #[arg(long, required_if_eq("bus", "ethernet"))]
    address: Option<String>,

    /// Path or http(s):// URL of the firmware image to flash.
    image: String,

    /// Read the image region back and compare it against the source file after writing.
    #[arg(long)]
    verify: bool,

    /// Seconds to wait for the device to re-enumerate after reboot.
    #[arg(long, default_value_t = 60)]
    enumeration_timeout: u64,

    /// Increase log verbosity; repeat for more (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_serial(raw: &str) -> Result<u32, String> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        raw.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

struct IndicatifProgressSink {
    bar: ProgressBar,
}

impl IndicatifProgressSink {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{msg:<28} [{bar:40}] {percent}%")
                .expect("static template is valid")
                .progress_chars("=> "),
        );
        IndicatifProgressSink { bar }
    }
}

impl ProgressSink for IndicatifProgressSink {
    fn update(&mut self, percent: u8, done: bool) {
        self.bar.set_position(u64::from(percent));
        if done {
            self.bar.finish();
        }
    }

    fn display_status_text(&mut self, text: &str, done: bool) {
        self.bar.set_message(text.to_owned());
        if done {
            self.bar.finish_with_message(text.to_owned());
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::builder()
        .filter_level(match cli.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = Arc::clone(&cancelled);
        if let Err(err) = ctrlc::set_handler(move || cancelled.store(true, Ordering::SeqCst)) {
            warn!("failed to install Ctrl-C handler, cancellation will not be available: {err}");
        }
    }

    let source = if cli.image.starts_with("http://") || cli.image.starts_with("https://") {
        ImageSource::Url(cli.image.clone())
    } else {
        let path: std::path::PathBuf = cli.image.clone().into();
        if let Ok(metadata) = std::fs::metadata(&path) {
            info!("reading {} ({})", path.display(), BinaryBytesOne(metadata.len()));
        }
        ImageSource::Path(path)
    };

    let config = pipeline::PipelineConfig {
        verify_image: cli.verify,
        enumeration_timeout: Duration::from_secs(cli.enumeration_timeout),
        ..pipeline::PipelineConfig::default()
    };
    info!("post-write verification: {}", OnOffBool(config.verify_image));

    let mut sink = IndicatifProgressSink::new();
    let is_cancelled = move || cancelled.load(Ordering::SeqCst);

    let result: Result<(), UpgradeError> = match cli.bus {
        Bus::Usb => UsbTransport::open_with_timeout(T7_FAMILY, cli.serial, Duration::from_secs(5))
            .map_err(UpgradeError::from)
            .and_then(|device| pipeline::update_firmware(device, &source, ConnectionType::Usb, &mut sink, &config, &is_cancelled))
            .map(|_| ()),
        Bus::Ethernet => {
            let address = cli.address.expect("required_if_eq enforces this at parse time");
            EthernetTransport::connect(&address, cli.serial, Duration::from_secs(5))
                .map_err(UpgradeError::from)
                .and_then(|device| pipeline::update_firmware(device, &source, ConnectionType::Ethernet, &mut sink, &config, &is_cancelled))
                .map(|_| ())
        }
    };

    match result {
        Ok(()) => {
            println!("{}", cstr!("<green,bold>Upgrade complete.</>"));
            Ok(())
        }
        Err(err) => {
            eprintln!("{}: {err}", cstr!("<red,bold>Upgrade failed"));
            Err(err.into())
        }
    }
}
