//! Acoustic data modem: turns a mono audio input/output pair into a
//! half-duplex data link.
//!
//! Bytes are modulated with binary FSK or QPSK, recovered from a live
//! sample stream by a preamble-locked demodulator, and reassembled into
//! checksummed, length-delimited packets.

pub mod audio;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fsk;
pub mod packet;
pub mod qpsk;
pub mod receiver;

pub use audio::{AudioBackend, AudioStream, DeviceId, DeviceInfo, StreamHandler, StreamParams};
pub use buffer::{InboundRing, IoBuffers, OutboundQueue};
pub use codec::{new_codec, CodecType, DemodStatus, PhyCodec, SyncStatus};
pub use config::ModemConfig;
pub use engine::ModemEngine;
pub use error::{ModemError, Result};
pub use events::{EventBus, ModemEvent};
pub use fsk::FskCodec;
pub use packet::{ControlFlags, FileHeader, Packet, PacketHeader, PacketQueue, Payload};
pub use qpsk::QpskCodec;
pub use receiver::{PacketReceiver, ReceiveEvent};

/// Full-scale amplitude used to normalize 16-bit samples.
pub const FULL_SCALE: f64 = 32767.0;

/// Fraction of full scale used when synthesizing symbols.
pub const TX_AMPLITUDE: f64 = 0.9;

/// Normalized correlation power above which a carrier is considered present.
pub const DETECTION_THRESHOLD: f64 = 0.5;

/// Baud intervals that must remain buffered before sync/demodulation proceeds.
pub const MIN_WINDOW_BAUDS: usize = 20;

/// Idle baud intervals preceding the start symbol of every preamble.
pub const PREAMBLE_IDLE_SYMBOLS: usize = 6;

/// Bytes carried between two preambles. Transmitter and receiver must agree
/// on this out of band; it is never negotiated on the wire.
pub const BYTES_PER_SYNC: usize = 128;

/// Silent baud intervals the engine appends after every transmission, so a
/// receiver drops lock between back-to-back packets.
pub const INTER_FRAME_GAP_BAUDS: usize = 4;

// Engine defaults
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_CHUNK_SIZE: usize = 2048;
pub const DEFAULT_BAUD_RATE: u32 = 1225;
pub const DEFAULT_RING_CAPACITY: usize = 128;

/// Buffered samples the demodulation worker waits for before processing.
pub const MIN_DEMOD_SAMPLES: usize = 4096;

/// Worker back-off while waiting for samples.
pub const WORKER_POLL_MS: u64 = 50;

/// Smallest baud interval (in samples) a codec accepts.
pub const MIN_SAMPLES_PER_BAUD: usize = 4;
