//! The modem engine: stream lifecycle, transmit path, demodulation worker
//! and hot reconfiguration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use crate::audio::{resolve_devices, AudioBackend, AudioStream, DeviceInfo, StreamHandler, StreamParams};
use crate::buffer::IoBuffers;
use crate::codec::{new_codec, PhyCodec};
use crate::config::ModemConfig;
use crate::error::{ModemError, Result};
use crate::events::{EventBus, ModemEvent};
use crate::packet::{Packet, PacketQueue, MAX_PACKET_SIZE};
use crate::receiver::{PacketReceiver, ReceiveEvent};
use crate::{INTER_FRAME_GAP_BAUDS, MIN_DEMOD_SAMPLES, WORKER_POLL_MS};

type SharedCodec = Arc<Mutex<Box<dyn PhyCodec>>>;

#[derive(Debug, Clone, Copy)]
struct Gains {
    input: f32,
    output: f32,
}

/// Audio callback side: moves chunks between the device and the buffers.
struct AudioIo {
    buffers: Arc<IoBuffers>,
    gains: Arc<Mutex<Gains>>,
}

impl StreamHandler for AudioIo {
    fn capture(&self, input: &[i16]) {
        let gain = self.gains.lock().input;
        self.buffers.input.push_scaled(input, gain);
    }

    fn render(&self, output: &mut [i16]) {
        if !self.buffers.output.pop(output) {
            output.fill(0);
            return;
        }
        let gain = self.gains.lock().output;
        if gain != 1.0 {
            for s in output.iter_mut() {
                *s = (*s as f32 * gain) as i16;
            }
        }
    }
}

/// Half-duplex acoustic modem over an [`AudioBackend`].
///
/// Streaming and demodulation are independent switches, but demodulation
/// can only start while streaming. Received packets are validated before
/// they reach the [`PacketQueue`]; everything else is reported through
/// [`ModemEvent`]s.
pub struct ModemEngine {
    backend: Arc<dyn AudioBackend>,
    config: ModemConfig,
    codec: SharedCodec,
    buffers: Arc<IoBuffers>,
    gains: Arc<Mutex<Gains>>,
    stream: Option<Box<dyn AudioStream>>,
    demodulating: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    packets: Arc<PacketQueue>,
    events: Arc<EventBus>,
}

impl ModemEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, config: ModemConfig) -> Result<Self> {
        config.validate()?;
        let codec = new_codec(config.codec, config.sample_rate, config.baud_rate)?;
        log::debug!(
            "engine created on '{}' backend: {} at {} baud, {} Hz",
            backend.name(),
            config.codec,
            config.baud_rate,
            config.sample_rate
        );

        Ok(Self {
            backend,
            codec: Arc::new(Mutex::new(codec)),
            buffers: Arc::new(IoBuffers::new(config.chunk_size)),
            gains: Arc::new(Mutex::new(Gains {
                input: config.input_volume as f32,
                output: config.output_volume as f32,
            })),
            config,
            stream: None,
            demodulating: Arc::new(AtomicBool::new(false)),
            worker: None,
            packets: Arc::new(PacketQueue::new()),
            events: Arc::new(EventBus::new()),
        })
    }

    pub fn start_stream(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(ModemError::AlreadyStreaming);
        }

        let (input_device, output_device) = resolve_devices(
            self.backend.as_ref(),
            self.config.input_device,
            self.config.output_device,
        )?;
        let params = StreamParams {
            input_device,
            output_device,
            sample_rate: self.config.sample_rate,
            chunk_size: self.config.chunk_size,
        };
        let handler = Arc::new(AudioIo {
            buffers: Arc::clone(&self.buffers),
            gains: Arc::clone(&self.gains),
        });

        let stream = self.backend.open_duplex(&params, handler)?;
        self.stream = Some(stream);
        log::info!(
            "stream started: input {input_device}, output {output_device}, {} Hz, chunk {}",
            params.sample_rate,
            params.chunk_size
        );
        Ok(())
    }

    /// Returns false when no stream was running.
    pub fn stop_stream(&mut self) -> bool {
        let Some(mut stream) = self.stream.take() else {
            return false;
        };
        if let Err(e) = stream.stop() {
            log::warn!("error while stopping stream: {e}");
        }
        self.buffers.clear();
        log::info!("stream stopped");
        true
    }

    pub fn start_demodulate(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Err(ModemError::NotStreaming);
        }
        if self.worker.is_some() {
            return Ok(());
        }

        self.buffers.input.clear();
        self.codec.lock().reset();
        self.demodulating.store(true, Ordering::Release);

        let worker = Worker {
            running: Arc::clone(&self.demodulating),
            buffers: Arc::clone(&self.buffers),
            codec: Arc::clone(&self.codec),
            packets: Arc::clone(&self.packets),
            events: Arc::clone(&self.events),
        };
        let spawned = thread::Builder::new()
            .name("audiomodem-demod".into())
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.demodulating.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stops and joins the worker. Returns false when it was not running.
    pub fn stop_demodulate(&mut self) -> bool {
        let Some(handle) = self.worker.take() else {
            return false;
        };
        self.demodulating.store(false, Ordering::Release);
        if handle.join().is_err() {
            log::warn!("demodulation worker panicked");
        }
        self.buffers.input.clear();
        true
    }

    /// Modulate raw bytes and queue them for playback.
    ///
    /// Returns the number of samples queued, trailing gap included.
    pub fn modulate(&self, bytes: &[u8]) -> Result<usize> {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(ModemError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_PACKET_SIZE,
            });
        }

        let samples = {
            let codec = self.codec.lock();
            let mut samples = codec.modulate(bytes);
            let gap = INTER_FRAME_GAP_BAUDS * codec.samples_per_baud();
            samples.resize(samples.len() + gap, 0);
            samples
        };
        let queued = samples.len();
        self.buffers.output.push(samples);
        Ok(queued)
    }

    pub fn transmit(&self, packet: &Packet) -> Result<usize> {
        if let Some(header) = packet.header() {
            log::info!("transmitting packet {} ({} bytes)", header.id, packet.len());
        }
        self.modulate(packet.as_bytes())
    }

    /// Send a text message under a random id, which is returned.
    pub fn send_text(&self, text: &str) -> Result<u8> {
        let id = rand::random::<u8>();
        self.transmit(&Packet::text(id, text)?)?;
        Ok(id)
    }

    /// Send a file under a random id, which is returned.
    pub fn send_file(&self, name: &str, data: &[u8]) -> Result<u8> {
        let id = rand::random::<u8>();
        self.transmit(&Packet::file(id, name, data)?)?;
        Ok(id)
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Adopt `config`.
    ///
    /// Volumes take effect immediately. Any other change stops
    /// demodulation and the stream, swaps in a fresh codec and emits
    /// [`ModemEvent::ConfigurationChanged`]; restarting is up to the caller.
    /// An invalid config is rejected before anything is touched.
    pub fn set_config(&mut self, config: ModemConfig) -> Result<()> {
        config.validate()?;
        self.apply_volume(config.input_volume, config.output_volume);

        if !self.config.needs_restart(&config) {
            return Ok(());
        }

        let codec = new_codec(config.codec, config.sample_rate, config.baud_rate)?;
        self.stop_demodulate();
        self.stop_stream();

        if config.chunk_size != self.buffers.chunk_size() {
            self.buffers = Arc::new(IoBuffers::new(config.chunk_size));
        }
        *self.codec.lock() = codec;
        log::info!(
            "reconfigured: {} at {} baud, {} Hz, chunk {}",
            config.codec,
            config.baud_rate,
            config.sample_rate,
            config.chunk_size
        );
        self.config = config;
        self.events.emit(ModemEvent::ConfigurationChanged);
        Ok(())
    }

    /// Current `(input, output)` volume.
    pub fn volume(&self) -> (f64, f64) {
        (self.config.input_volume, self.config.output_volume)
    }

    pub fn set_volume(&mut self, input: f64, output: f64) -> Result<()> {
        ModemConfig {
            input_volume: input,
            output_volume: output,
            ..self.config.clone()
        }
        .validate()?;
        self.apply_volume(input, output);
        Ok(())
    }

    fn apply_volume(&mut self, input: f64, output: f64) {
        self.config.input_volume = input;
        self.config.output_volume = output;
        *self.gains.lock() = Gains {
            input: input as f32,
            output: output as f32,
        };
    }

    pub fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.backend.devices()
    }

    pub fn pop_packet(&self) -> Option<Packet> {
        self.packets.pop()
    }

    pub fn has_packets(&self) -> bool {
        !self.packets.is_empty()
    }

    pub fn packet_queue(&self) -> Arc<PacketQueue> {
        Arc::clone(&self.packets)
    }

    pub fn subscribe(&self) -> Receiver<ModemEvent> {
        self.events.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_demodulating(&self) -> bool {
        self.worker.is_some()
    }

    /// Queued audio has not been fully handed to the device yet.
    pub fn is_transmitting(&self) -> bool {
        !self.buffers.output.is_empty()
    }
}

impl Drop for ModemEngine {
    fn drop(&mut self) {
        self.stop_demodulate();
        self.stop_stream();
    }
}

/// State moved onto the demodulation thread.
struct Worker {
    running: Arc<AtomicBool>,
    buffers: Arc<IoBuffers>,
    codec: SharedCodec,
    packets: Arc<PacketQueue>,
    events: Arc<EventBus>,
}

impl Worker {
    fn run(self) {
        log::debug!("demodulation worker started");
        let mut receiver = PacketReceiver::new();
        let mut step_events = Vec::new();
        let poll = Duration::from_millis(WORKER_POLL_MS);

        while self.running.load(Ordering::Acquire) {
            while self.buffers.input.pop_into(receiver.samples_mut()) {}

            if receiver.backlog() < MIN_DEMOD_SAMPLES {
                thread::sleep(poll);
                continue;
            }

            let before = receiver.backlog();
            {
                let mut codec = self.codec.lock();
                receiver.step(&mut **codec, &mut step_events);
            }
            for event in step_events.drain(..) {
                self.dispatch(event);
            }

            // Not enough for the codec's window yet.
            if receiver.backlog() == before {
                thread::sleep(poll);
            }
        }
        log::debug!("demodulation worker exited");
    }

    fn dispatch(&self, event: ReceiveEvent) {
        match event {
            ReceiveEvent::Locked => {}
            ReceiveEvent::Progress { received, total } => {
                self.events.emit(ModemEvent::Progress { received, total });
            }
            ReceiveEvent::Completed(packet) => {
                if let Some(header) = packet.header() {
                    log::info!("received packet {} ({} bytes)", header.id, packet.len());
                }
                self.packets.push(packet);
                self.events.emit(ModemEvent::PacketReceived);
            }
            ReceiveEvent::Corrupted { id } => {
                self.events.emit(ModemEvent::PacketCorrupted { id });
            }
            ReceiveEvent::Lost => {
                log::info!("sync lost mid-packet");
                self.events.emit(ModemEvent::PacketLost);
            }
        }
    }
}
