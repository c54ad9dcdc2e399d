//! Sound-card backend on top of `cpal`.
//!
//! cpal streams are not `Send`, so each duplex stream lives on its own
//! thread which builds both directions, starts them and parks until told to
//! stop. Device callbacks deliver buffers of whatever size the host picks;
//! both directions are re-chunked to the configured chunk size before the
//! handler sees them.

use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, StreamConfig};
use crossbeam::channel::{self, Sender};

use super::{AudioBackend, AudioStream, DeviceId, DeviceInfo, StreamHandler, StreamParams};
use crate::error::{ModemError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn host_devices() -> Result<Vec<Device>> {
    let host = cpal::default_host();
    let devices = host
        .devices()
        .map_err(|e| ModemError::DeviceUnavailable(format!("device enumeration failed: {e}")))?;
    Ok(devices.collect())
}

fn describe(id: DeviceId, device: &Device) -> DeviceInfo {
    let input = device.default_input_config().ok();
    let output = device.default_output_config().ok();
    let default_sample_rate = output
        .as_ref()
        .or(input.as_ref())
        .map(|c| c.sample_rate().0)
        .unwrap_or(0);

    DeviceInfo {
        id,
        name: device.name().unwrap_or_else(|_| format!("device {id}")),
        max_input_channels: input.map(|c| c.channels()).unwrap_or(0),
        max_output_channels: output.map(|c| c.channels()).unwrap_or(0),
        default_sample_rate,
    }
}

fn position_of(default: Option<Device>) -> Option<DeviceId> {
    let name = default?.name().ok()?;
    host_devices()
        .ok()?
        .iter()
        .position(|d| d.name().ok().as_deref() == Some(name.as_str()))
}

fn device_at(devices: &[Device], id: DeviceId) -> Result<Device> {
    devices
        .get(id)
        .cloned()
        .ok_or_else(|| ModemError::DeviceUnavailable(format!("no device with id {id}")))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(host_devices()?
            .iter()
            .enumerate()
            .map(|(id, device)| describe(id, device))
            .collect())
    }

    fn default_input_device(&self) -> Option<DeviceId> {
        position_of(cpal::default_host().default_input_device())
    }

    fn default_output_device(&self) -> Option<DeviceId> {
        position_of(cpal::default_host().default_output_device())
    }

    fn open_duplex(
        &self,
        params: &StreamParams,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<Box<dyn AudioStream>> {
        let (ready_tx, ready_rx) = channel::bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let params = params.clone();

        let thread = std::thread::Builder::new()
            .name("audiomodem-cpal".into())
            .spawn(move || {
                let streams = match build_streams(&params, handler) {
                    Ok(streams) => streams,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Disconnect also counts as stop.
                let _ = stop_rx.recv();
                drop(streams);
                log::debug!("cpal streams closed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(ModemError::Stream("audio thread exited during setup".into()))
            }
        }
    }
}

fn build_streams(
    params: &StreamParams,
    handler: Arc<dyn StreamHandler>,
) -> Result<(cpal::Stream, cpal::Stream)> {
    let devices = host_devices()?;
    let input_device = device_at(&devices, params.input_device)?;
    let output_device = device_at(&devices, params.output_device)?;

    let chunk = params.chunk_size;
    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(params.sample_rate),
        buffer_size: BufferSize::Fixed(chunk as u32),
    };

    let capture_handler = Arc::clone(&handler);
    let mut pending: Vec<i16> = Vec::with_capacity(chunk * 2);
    let input = input_device
        .build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                pending.extend_from_slice(data);
                let whole = pending.len() / chunk * chunk;
                for block in pending[..whole].chunks_exact(chunk) {
                    capture_handler.capture(block);
                }
                pending.drain(..whole);
            },
            |err| log::warn!("input stream error: {err}"),
            None,
        )
        .map_err(|e| ModemError::Stream(format!("cannot open input stream: {e}")))?;

    let mut rendered = vec![0i16; chunk];
    let mut cursor = chunk;
    let output = output_device
        .build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut written = 0;
                while written < data.len() {
                    if cursor == chunk {
                        handler.render(&mut rendered);
                        cursor = 0;
                    }
                    let n = (chunk - cursor).min(data.len() - written);
                    data[written..written + n].copy_from_slice(&rendered[cursor..cursor + n]);
                    cursor += n;
                    written += n;
                }
            },
            |err| log::warn!("output stream error: {err}"),
            None,
        )
        .map_err(|e| ModemError::Stream(format!("cannot open output stream: {e}")))?;

    input
        .play()
        .map_err(|e| ModemError::Stream(format!("cannot start input stream: {e}")))?;
    output
        .play()
        .map_err(|e| ModemError::Stream(format!("cannot start output stream: {e}")))?;

    log::info!(
        "cpal duplex stream running at {} Hz, {} samples per chunk",
        params.sample_rate,
        chunk
    );
    Ok((input, output))
}

struct CpalStream {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioStream for CpalStream {
    fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| ModemError::Stream("audio thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
