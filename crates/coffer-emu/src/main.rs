//! Coffer device emulator.
//!
//! Runs an application- or bootloader-mode device over TCP. Clients send
//! and receive raw 64-byte HID packets; the emulated button is driven
//! with two out-of-band bytes (`0x00` press, `0x01` release) on the same
//! stream, distinguished from packets by a one-byte frame tag.
//!
//! ```bash
//! # Wallet mode on the default port
//! coffer-emu --bind 127.0.0.1:21324
//!
//! # Bootloader mode, verbose
//! coffer-emu --bootloader --log-level debug
//! ```
//!
//! Wire framing per direction: `[tag:u8][payload]` where tag `0x50` is a
//! 64-byte HID packet and tag `0x42` is a single button byte
//! (client-to-emulator only).

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    time::Instant,
};

use clap::Parser;
use coffer_core::{Device, DeviceAction, DeviceEvent, MemFlash, OsEntropy, Screen};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TAG_PACKET: u8 = 0x50;
const TAG_BUTTON: u8 = 0x42;

/// Coffer hardware wallet emulator
#[derive(Parser, Debug)]
#[command(name = "coffer-emu")]
#[command(about = "Runs the Coffer device core over TCP")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:21324")]
    bind: String,

    /// Start in bootloader mode
    #[arg(long)]
    bootloader: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(bind = %args.bind, bootloader = args.bootloader, "coffer emulator starting");
    tracing::warn!("emulated flash is volatile; state is lost when the process exits");

    let listener = TcpListener::bind(&args.bind)?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    for stream in listener.incoming() {
        let stream = stream?;
        tracing::info!(peer = %stream.peer_addr()?, "host connected");
        if let Err(error) = serve(stream, args.bootloader) {
            tracing::warn!(%error, "session ended");
        }
    }
    Ok(())
}

fn serve(mut stream: TcpStream, bootloader: bool) -> std::io::Result<()> {
    let flash = MemFlash::new();
    let mut device = if bootloader {
        Device::bootloader(flash, OsEntropy)
    } else {
        Device::application(flash, OsEntropy)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?
    };

    let mut tag = [0u8; 1];
    loop {
        if stream.read_exact(&mut tag).is_err() {
            return Ok(()); // peer hung up
        }
        let event = match tag[0] {
            TAG_PACKET => {
                let mut packet = [0u8; 64];
                stream.read_exact(&mut packet)?;
                DeviceEvent::Packet { bytes: packet.to_vec(), now: Instant::now() }
            }
            TAG_BUTTON => {
                let mut edge = [0u8; 1];
                stream.read_exact(&mut edge)?;
                if edge[0] == 0 {
                    DeviceEvent::ButtonPressed { now: Instant::now() }
                } else {
                    DeviceEvent::ButtonReleased { now: Instant::now() }
                }
            }
            other => {
                tracing::warn!(tag = other, "unknown frame tag");
                continue;
            }
        };

        let mut actions = device.handle(event);
        // A tick right after each event keeps hold timers moving without
        // a timer thread.
        actions.extend(device.handle(DeviceEvent::Tick { now: Instant::now() }));

        for action in actions {
            match action {
                DeviceAction::Transmit(packet) => {
                    stream.write_all(&[TAG_PACKET])?;
                    stream.write_all(packet.as_bytes())?;
                }
                DeviceAction::Display(screen) => log_screen(&screen),
            }
        }
        stream.flush()?;
    }
}

fn log_screen(screen: &Screen) {
    match screen {
        Screen::Home => tracing::info!("[display] home"),
        Screen::Notify { title, body } => tracing::info!("[display] {title}: {body}"),
        Screen::Warning { body } => tracing::warn!("[display] WARNING: {body}"),
        Screen::Confirm { title, body } => {
            tracing::info!("[display] CONFIRM {title}: {body} (hold button)");
        }
        Screen::PinMatrix { digits } => {
            let d: Vec<char> = digits.iter().map(|&b| char::from(b)).collect();
            tracing::info!(
                "[display] PIN matrix: {} {} {} / {} {} {} / {} {} {}",
                d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7], d[8]
            );
        }
        Screen::Cipher { cipher, word_hint } => {
            tracing::info!("[display] cipher {cipher} ({word_hint})");
        }
        Screen::Words { sentence } => tracing::info!("[display] WRITE DOWN: {sentence}"),
        Screen::Fingerprint { hex } => tracing::info!("[display] fingerprint {hex}"),
    }
}
