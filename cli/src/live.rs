//! Subcommands that talk to real sound cards.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use audiomodem_core::audio::cpal_backend::CpalBackend;
use audiomodem_core::{AudioBackend, ModemConfig, ModemEngine, ModemEvent, Packet};

pub fn devices_command() -> Result<(), Box<dyn std::error::Error>> {
    let backend = CpalBackend::new();
    let default_in = backend.default_input_device();
    let default_out = backend.default_output_device();

    for device in backend.devices()? {
        let mut marks = Vec::new();
        if Some(device.id) == default_in {
            marks.push("default input");
        }
        if Some(device.id) == default_out {
            marks.push("default output");
        }
        println!(
            "{:>3}  {}  (in: {}, out: {}, {} Hz){}",
            device.id,
            device.name,
            device.max_input_channels,
            device.max_output_channels,
            device.default_sample_rate,
            if marks.is_empty() {
                String::new()
            } else {
                format!("  [{}]", marks.join(", "))
            }
        );
    }
    Ok(())
}

pub fn listen_command(
    seconds: Option<u64>,
    out_dir: &Path,
    config: &ModemConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = ModemEngine::new(Arc::new(CpalBackend::new()), config.clone())?;
    let events = engine.subscribe();
    engine.start_stream()?;
    engine.start_demodulate()?;
    println!(
        "Listening with {} at {} baud{}",
        config.codec,
        config.baud_rate,
        seconds.map_or(String::new(), |s| format!(" for {s} s"))
    );

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while deadline.map_or(true, |d| Instant::now() < d) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(ModemEvent::PacketReceived) => {
                while let Some(packet) = engine.pop_packet() {
                    crate::deliver(&packet, out_dir)?;
                }
            }
            Ok(ModemEvent::PacketLost) => eprintln!("Lost sync in the middle of a packet"),
            Ok(ModemEvent::PacketCorrupted { id }) => eprintln!("Packet {id} failed its checksum"),
            Ok(_) | Err(_) => {}
        }
    }

    engine.stop_demodulate();
    engine.stop_stream();
    Ok(())
}

pub fn send_command(packet: &Packet, config: &ModemConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = ModemEngine::new(Arc::new(CpalBackend::new()), config.clone())?;
    engine.start_stream()?;
    let samples = engine.transmit(packet)?;
    println!(
        "Sending {}-byte packet ({:.1} s of audio)",
        packet.len(),
        samples as f64 / config.sample_rate as f64
    );

    while engine.is_transmitting() {
        thread::sleep(Duration::from_millis(50));
    }
    // Let the device play out its last buffers.
    thread::sleep(Duration::from_millis(250));
    engine.stop_stream();
    Ok(())
}
