//! In-process audio backend with virtual devices.
//!
//! Nothing runs on its own: the owner calls [`LoopbackBackend::tick`] (or
//! [`LoopbackBackend::tick_loopback`]) to play the role of the sound card,
//! one chunk at a time. This makes stream behavior fully deterministic.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioBackend, AudioStream, DeviceId, DeviceInfo, StreamHandler, StreamParams};
use crate::error::{ModemError, Result};
use crate::DEFAULT_SAMPLE_RATE;

#[derive(Default)]
struct LoopbackState {
    handler: Option<Arc<dyn StreamHandler>>,
    params: Option<StreamParams>,
    generation: u64,
    fail_next_open: Option<String>,
    last_output: Vec<i16>,
}

/// Virtual devices: `0` is duplex, `1` input only, `2` output only.
pub struct LoopbackBackend {
    devices: Vec<DeviceInfo>,
    state: Arc<Mutex<LoopbackState>>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBackend {
    pub fn new() -> Self {
        let device = |id, name: &str, inputs, outputs| DeviceInfo {
            id,
            name: name.to_string(),
            max_input_channels: inputs,
            max_output_channels: outputs,
            default_sample_rate: DEFAULT_SAMPLE_RATE,
        };
        Self::with_devices(vec![
            device(0, "Loopback Duplex", 1, 1),
            device(1, "Loopback Microphone", 1, 0),
            device(2, "Loopback Speaker", 0, 1),
        ])
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            state: Arc::new(Mutex::new(LoopbackState::default())),
        }
    }

    /// Make the next `open_duplex` fail with a stream error.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_open = Some(reason.into());
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().handler.is_some()
    }

    pub fn params(&self) -> Option<StreamParams> {
        self.state.lock().params.clone()
    }

    /// Deliver `input` as one captured chunk and render one output chunk.
    ///
    /// `input` is zero-padded or cut to the chunk size. Returns `None` when
    /// no stream is open.
    pub fn tick(&self, input: &[i16]) -> Option<Vec<i16>> {
        let (handler, chunk) = {
            let state = self.state.lock();
            (state.handler.clone()?, state.params.as_ref()?.chunk_size)
        };

        let mut captured = vec![0i16; chunk];
        let n = input.len().min(chunk);
        captured[..n].copy_from_slice(&input[..n]);
        handler.capture(&captured);

        let mut output = vec![0i16; chunk];
        handler.render(&mut output);

        self.state.lock().last_output.clone_from(&output);
        Some(output)
    }

    /// Tick with the previous tick's output as input, wiring the virtual
    /// speaker straight into the virtual microphone.
    pub fn tick_loopback(&self) -> Option<Vec<i16>> {
        let previous = std::mem::take(&mut self.state.lock().last_output);
        self.tick(&previous)
    }

    /// Run `n` loopback ticks; returns how many ran.
    pub fn run_loopback(&self, n: usize) -> usize {
        (0..n).take_while(|_| self.tick_loopback().is_some()).count()
    }
}

impl AudioBackend for LoopbackBackend {
    fn name(&self) -> &str {
        "loopback"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn default_input_device(&self) -> Option<DeviceId> {
        self.devices.iter().find(|d| d.is_input()).map(|d| d.id)
    }

    fn default_output_device(&self) -> Option<DeviceId> {
        self.devices.iter().find(|d| d.is_output()).map(|d| d.id)
    }

    fn open_duplex(
        &self,
        params: &StreamParams,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<Box<dyn AudioStream>> {
        for id in [params.input_device, params.output_device] {
            self.device_info(id)?;
        }

        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_open.take() {
            return Err(ModemError::Stream(reason));
        }
        if state.handler.is_some() {
            return Err(ModemError::Stream("loopback device busy".into()));
        }

        state.handler = Some(handler);
        state.params = Some(params.clone());
        state.last_output.clear();
        state.generation += 1;
        log::debug!("loopback stream opened with {params:?}");

        Ok(Box::new(LoopbackStream {
            state: Arc::clone(&self.state),
            generation: state.generation,
            stopped: false,
        }))
    }
}

struct LoopbackStream {
    state: Arc<Mutex<LoopbackState>>,
    generation: u64,
    stopped: bool,
}

impl AudioStream for LoopbackStream {
    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let mut state = self.state.lock();
        // A newer stream may own the device by now.
        if state.generation == self.generation {
            state.handler = None;
            state.params = None;
            state.last_output.clear();
        }
        Ok(())
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        captured: AtomicUsize,
        rendered: AtomicUsize,
    }

    impl StreamHandler for Counter {
        fn capture(&self, input: &[i16]) {
            self.captured.fetch_add(input.len(), Ordering::SeqCst);
        }

        fn render(&self, output: &mut [i16]) {
            output.fill(7);
            self.rendered.fetch_add(output.len(), Ordering::SeqCst);
        }
    }

    fn params(chunk_size: usize) -> StreamParams {
        StreamParams {
            input_device: 0,
            output_device: 0,
            sample_rate: 48000,
            chunk_size,
        }
    }

    #[test]
    fn test_tick_drives_handler() {
        let backend = LoopbackBackend::new();
        assert!(backend.tick(&[1, 2, 3]).is_none());

        let handler = Arc::new(Counter::default());
        let mut stream = backend.open_duplex(&params(64), handler.clone()).unwrap();

        let out = backend.tick(&[1, 2, 3]).unwrap();
        assert_eq!(out, vec![7; 64]);
        assert_eq!(handler.captured.load(Ordering::SeqCst), 64);
        assert_eq!(backend.run_loopback(3), 3);
        assert_eq!(handler.rendered.load(Ordering::SeqCst), 4 * 64);

        stream.stop().unwrap();
        assert!(!backend.is_open());
        assert!(backend.tick(&[]).is_none());
    }

    #[test]
    fn test_device_busy_and_fault_injection() {
        let backend = LoopbackBackend::new();
        let handler = Arc::new(Counter::default());

        backend.fail_next_open("unplugged");
        let err = backend.open_duplex(&params(32), handler.clone()).err().unwrap();
        assert!(matches!(err, ModemError::Stream(ref r) if r == "unplugged"));

        let _stream = backend.open_duplex(&params(32), handler.clone()).unwrap();
        assert!(backend.open_duplex(&params(32), handler).is_err());
    }

    #[test]
    fn test_drop_closes_stream() {
        let backend = LoopbackBackend::new();
        let stream = backend
            .open_duplex(&params(16), Arc::new(Counter::default()))
            .unwrap();
        assert!(backend.is_open());
        drop(stream);
        assert!(!backend.is_open());
    }

    #[test]
    fn test_unknown_device_rejected() {
        let backend = LoopbackBackend::new();
        let bad = StreamParams { input_device: 42, ..params(16) };
        let err = backend
            .open_duplex(&bad, Arc::new(Counter::default()))
            .err()
            .unwrap();
        assert!(matches!(err, ModemError::DeviceUnavailable(_)));
    }
}
