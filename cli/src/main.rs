use clap::{Args, Parser, Subcommand};
use hound::WavSpec;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use audiomodem_core::audio::loopback::LoopbackBackend;
use audiomodem_core::{
    new_codec, CodecType, ModemConfig, ModemEngine, Packet, PacketReceiver, Payload,
    ReceiveEvent, MIN_WINDOW_BAUDS,
};

#[cfg(feature = "cpal")]
mod live;

#[derive(Parser)]
#[command(name = "audiomodem")]
#[command(about = "Send text and files over sound with FSK or QPSK")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modulate a text message or file into a WAV recording
    Encode {
        #[command(flatten)]
        message: MessageArgs,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// Recover packets from a WAV recording
    Decode {
        /// Input WAV file (mono, 16-bit PCM or 32-bit float)
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Directory for received files
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// Send a message through the engine over an in-process loopback device
    Simulate {
        #[command(flatten)]
        message: MessageArgs,

        /// Directory for received files
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        modem: ModemArgs,
    },

    /// List audio devices
    #[cfg(feature = "cpal")]
    Devices,

    /// Receive from the sound card until interrupted or the time runs out
    #[cfg(feature = "cpal")]
    Listen {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,

        /// Directory for received files
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// Transmit a message through the sound card
    #[cfg(feature = "cpal")]
    Send {
        #[command(flatten)]
        message: MessageArgs,

        #[command(flatten)]
        modem: ModemArgs,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct MessageArgs {
    /// Text message to send
    #[arg(short, long)]
    text: Option<String>,

    /// File to send
    #[arg(short, long, value_name = "PATH")]
    file: Option<PathBuf>,
}

#[derive(Args)]
struct ModemArgs {
    /// JSON config file; flags below override it
    #[arg(long, value_name = "CONFIG.JSON")]
    config: Option<PathBuf>,

    /// Modulation: fsk or qpsk
    #[arg(long)]
    codec: Option<CodecType>,

    /// Symbols per second
    #[arg(long)]
    baud: Option<u32>,

    /// Sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Samples per audio callback chunk
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Unsupported WAV format: {0}")]
    UnsupportedWav(String),

    #[error("File name '{0}' cannot be used")]
    BadFileName(String),

    #[error("No packet received within {0:?}")]
    Timeout(Duration),
}

impl ModemArgs {
    fn load(&self) -> Result<ModemConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ModemConfig::from_json_file(path)?,
            None => ModemConfig::default(),
        };
        if let Some(codec) = self.codec {
            config.codec = codec;
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(chunk) = self.chunk_size {
            config.chunk_size = chunk;
        }
        config.validate()?;
        Ok(config)
    }
}

impl MessageArgs {
    fn to_packet(&self) -> Result<Packet, Box<dyn std::error::Error>> {
        let id = rand::random::<u8>();
        if let Some(path) = &self.file {
            let data = fs::read(path)?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| CliError::BadFileName(path.display().to_string()))?;
            println!("Read {} bytes from {}", data.len(), path.display());
            return Ok(Packet::file(id, name, &data)?);
        }
        Ok(Packet::text(id, self.text.as_deref().unwrap_or_default())?)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Encode { message, output, modem } => encode_command(&message, &output, &modem)?,
        Commands::Decode { input, out_dir, modem } => decode_command(&input, &out_dir, &modem)?,
        Commands::Simulate { message, out_dir, modem } => {
            simulate_command(&message, &out_dir, &modem)?
        }
        Commands::Config { modem } => println!("{}", modem.load()?.to_json_string()?),
        #[cfg(feature = "cpal")]
        Commands::Devices => live::devices_command()?,
        #[cfg(feature = "cpal")]
        Commands::Listen { seconds, out_dir, modem } => {
            live::listen_command(seconds, &out_dir, &modem.load()?)?
        }
        #[cfg(feature = "cpal")]
        Commands::Send { message, modem } => {
            live::send_command(&message.to_packet()?, &modem.load()?)?
        }
    }

    Ok(())
}

fn encode_command(
    message: &MessageArgs,
    output_path: &Path,
    modem: &ModemArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = modem.load()?;
    let packet = message.to_packet()?;
    let codec = new_codec(config.codec, config.sample_rate, config.baud_rate)?;

    let spb = codec.samples_per_baud();
    let mut samples = vec![0i16; 4 * spb];
    samples.extend(codec.modulate(packet.as_bytes()));
    samples.resize(samples.len() + (MIN_WINDOW_BAUDS + 4) * spb, 0);
    println!(
        "Encoded {}-byte packet with {} at {} baud to {} samples",
        packet.len(),
        config.codec,
        config.baud_rate,
        samples.len()
    );

    write_wav(output_path, config.sample_rate, &samples)?;
    println!("Wrote {}", output_path.display());
    Ok(())
}

fn decode_command(
    input_path: &Path,
    out_dir: &Path,
    modem: &ModemArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = modem.load()?;
    let (sample_rate, samples) = read_wav(input_path)?;
    println!("Read {} samples at {} Hz", samples.len(), sample_rate);

    let mut codec = new_codec(config.codec, sample_rate, config.baud_rate)?;
    let mut receiver = PacketReceiver::new();
    receiver.extend(&samples);
    // Flush the codec's look-ahead window past the end of the recording.
    receiver.extend(&vec![0; (MIN_WINDOW_BAUDS + 1) * codec.samples_per_baud()]);

    let mut decoded = 0;
    for event in receiver.drain(codec.as_mut()) {
        match event {
            ReceiveEvent::Completed(packet) => {
                decoded += 1;
                deliver(&packet, out_dir)?;
            }
            ReceiveEvent::Corrupted { id } => eprintln!("Packet {id} failed its checksum"),
            ReceiveEvent::Lost => eprintln!("Lost sync in the middle of a packet"),
            ReceiveEvent::Locked | ReceiveEvent::Progress { .. } => {}
        }
    }

    log::debug!("{} trailing samples left undecoded", receiver.backlog());
    println!("Decoded {decoded} packet(s)");
    Ok(())
}

fn simulate_command(
    message: &MessageArgs,
    out_dir: &Path,
    modem: &ModemArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = modem.load()?;
    let packet = message.to_packet()?;
    let backend = Arc::new(LoopbackBackend::new());
    let mut engine = ModemEngine::new(backend.clone(), config)?;
    engine.start_stream()?;
    engine.start_demodulate()?;
    let queued = engine.transmit(&packet)?;
    log::info!("queued {queued} samples on the loopback device");

    let timeout = Duration::from_secs(60);
    let deadline = Instant::now() + timeout;
    let received = loop {
        if let Some(packet) = engine.pop_packet() {
            break packet;
        }
        if Instant::now() > deadline {
            return Err(CliError::Timeout(timeout).into());
        }
        backend.tick_loopback();
        std::thread::sleep(Duration::from_millis(2));
    };

    deliver(&received, out_dir)?;
    engine.stop_demodulate();
    engine.stop_stream();
    Ok(())
}

/// Print a text payload or store a file payload under `out_dir`.
pub(crate) fn deliver(packet: &Packet, out_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let id = packet.header().map_or(0, |h| h.id);
    match packet.payload()? {
        Payload::Text(text) => println!("[{id}] {text}"),
        Payload::File { name, data } => {
            fs::create_dir_all(out_dir)?;
            let path = unique_path(out_dir, &name)?;
            fs::write(&path, &data)?;
            println!("[{id}] Saved {} bytes to {}", data.len(), path.display());
        }
    }
    Ok(())
}

/// `dir/name`, or `dir/stem (n).ext` with the first free `n`.
fn unique_path(dir: &Path, name: &str) -> Result<PathBuf, CliError> {
    let name = Path::new(name)
        .file_name()
        .ok_or_else(|| CliError::BadFileName(name.to_string()))?;
    let candidate = dir.join(name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let name = Path::new(name);
    let stem = name.file_stem().unwrap_or_default().to_string_lossy();
    let ext = name.extension().map(|e| e.to_string_lossy());
    let mut n = 1;
    loop {
        let file = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(file);
        if !candidate.exists() {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) -> Result<(), Box<dyn std::error::Error>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(File::create(path)?, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// First channel of a WAV file as 16-bit samples.
fn read_wav(path: &Path) -> Result<(u32, Vec<i16>), Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::new(File::open(path)?)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .step_by(channels)
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .step_by(channels)
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i16))
            .collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(CliError::UnsupportedWav(format!("{bits}-bit {format:?}")).into());
        }
    };
    Ok((spec.sample_rate, samples))
}
